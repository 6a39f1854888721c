//! Classification of raw backend response bodies.
//!
//! A body that decodes as UTF-8 and looks like a JSON document becomes
//! structured results; one that does not decode is an opaque binary payload
//! whose MIME type is sniffed from its magic number. Anything else is
//! reported as unsupported.

use bytes::Bytes;

use crate::constants::backend::FALLBACK_CONTENT_TYPE;
use crate::types::InferenceOutcome;

/// Classify a response body with no declared content type.
pub fn classify(body: &Bytes, model_name: &str) -> InferenceOutcome {
    classify_with_hint(body, model_name, None)
}

/// Classify a response body.
///
/// # Arguments
/// * `body` - Raw bytes returned by the backend.
/// * `model_name` - Model that produced the body.
/// * `declared` - The response's `Content-Type`, used for binary bodies only
///   when the magic number is not recognized.
pub fn classify_with_hint(
    body: &Bytes,
    model_name: &str,
    declared: Option<&str>,
) -> InferenceOutcome {
    let model_name = model_name.to_string();

    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(_) => {
            return InferenceOutcome::Binary {
                model_name,
                content_type: sniff_content_type(body, declared),
                bytes: body.clone(),
            }
        }
    };

    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return InferenceOutcome::Unsupported { model_name };
    }

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => InferenceOutcome::Structured {
            model_name,
            results: items,
        },
        Ok(value) => InferenceOutcome::Structured {
            model_name,
            results: vec![value],
        },
        Err(_) => InferenceOutcome::Unsupported { model_name },
    }
}

fn sniff_content_type(body: &[u8], declared: Option<&str>) -> String {
    if let Some(kind) = infer::get(body) {
        return kind.mime_type().to_string();
    }

    declared
        .map(|value| value.split(';').next().unwrap_or(value).trim())
        .filter(|value| !value.is_empty() && !value.starts_with("text/") && *value != "application/json")
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

/// File extension used when offering a binary outcome as a download.
pub fn file_extension(content_type: &str, bytes: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(bytes) {
        return kind.extension();
    }

    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tif",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "audio/x-wav" | "audio/wav" => "wav",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    #[test]
    fn test_object_becomes_single_result() {
        let outcome = classify(&Bytes::from_static(br#"{"a":1}"#), "m");
        assert_eq!(
            outcome,
            InferenceOutcome::Structured {
                model_name: "m".into(),
                results: vec![json!({"a": 1})],
            }
        );
    }

    #[test]
    fn test_array_keeps_order() {
        let outcome = classify(&Bytes::from_static(b"  [3, {\"b\":2}, \"x\"]\n"), "m");
        assert_eq!(
            outcome,
            InferenceOutcome::Structured {
                model_name: "m".into(),
                results: vec![json!(3), json!({"b": 2}), json!("x")],
            }
        );
    }

    #[test]
    fn test_png_is_binary() {
        let body = Bytes::from_static(PNG_HEADER);
        match classify(&body, "segmenter") {
            InferenceOutcome::Binary {
                content_type,
                bytes,
                ..
            } => {
                assert_eq!(content_type, "image/png");
                assert_eq!(bytes, body);
            }
            other => panic!("expected binary outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_is_unsupported() {
        for body in [&b"hello world"[..], &b""[..], &b"{not json"[..]] {
            assert_eq!(
                classify(&Bytes::copy_from_slice(body), "m"),
                InferenceOutcome::Unsupported {
                    model_name: "m".into()
                }
            );
        }
    }

    #[test]
    fn test_unknown_binary_uses_declared_type() {
        let body = Bytes::from_static(&[0xc3, 0x28, 0xa0, 0xa1]);

        let hinted = classify_with_hint(&body, "m", Some("audio/basic; rate=8000"));
        assert!(matches!(
            hinted,
            InferenceOutcome::Binary { ref content_type, .. } if content_type == "audio/basic"
        ));

        let bare = classify(&body, "m");
        assert!(matches!(
            bare,
            InferenceOutcome::Binary { ref content_type, .. } if content_type == FALLBACK_CONTENT_TYPE
        ));
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("image/png", PNG_HEADER), "png");
        assert_eq!(file_extension("image/jpeg", &[0x00]), "jpg");
        assert_eq!(file_extension("application/octet-stream", &[0x00]), "bin");
    }
}
