//! Loading of request payloads from their references.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::InferenceError;

/// Resolves a payload reference to the bytes sent to the backend.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn load(&self, reference: &str) -> Result<Bytes, InferenceError>;
}

/// Reads payloads from files under a fixed root directory.
#[derive(Debug, Clone)]
pub struct FsPayloadSource {
    root: PathBuf,
}

impl FsPayloadSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a reference to a path inside the root.
    ///
    /// Relative references are joined onto the root. Absolute references are
    /// accepted only when they already point inside it. Parent components and
    /// NUL bytes are rejected outright.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, InferenceError> {
        let unavailable =
            |why: &str| InferenceError::PayloadUnavailable(format!("'{}' {}", reference, why));

        if reference.trim().is_empty() {
            return Err(unavailable("is empty"));
        }
        if reference.contains('\0') {
            return Err(unavailable("contains a NUL byte"));
        }

        let path = Path::new(reference);
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| unavailable("is outside the payload root"))?
        } else {
            path
        };

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(unavailable("escapes the payload root"));
                }
            }
        }

        if resolved == self.root {
            return Err(unavailable("does not name a file"));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl PayloadSource for FsPayloadSource {
    async fn load(&self, reference: &str) -> Result<Bytes, InferenceError> {
        let path = self.resolve(reference)?;
        let data = tokio::fs::read(&path).await.map_err(|e| {
            InferenceError::PayloadUnavailable(format!("cannot read '{}': {}", reference, e))
        })?;

        debug!("Loaded payload {} ({} bytes)", path.display(), data.len());
        Ok(Bytes::from(data))
    }
}
