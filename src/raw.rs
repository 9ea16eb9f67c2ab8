//! Read access to raw mail objects by opaque reference.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::model::RawObjectRef;

/// Where raw message bytes live.
#[async_trait]
pub trait RawObjectSource: Send + Sync {
    /// Load the full raw bytes of one object.
    async fn load(&self, raw_ref: &RawObjectRef) -> Result<Vec<u8>, PipelineError>;
}

/// Raw objects stored as files under a root directory.
pub struct FsRawStore {
    root: PathBuf,
}

impl FsRawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference to a path inside the root. References that are
    /// absolute or contain `..` are rejected.
    fn resolve(&self, raw_ref: &RawObjectRef) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(raw_ref.as_str());
        let safe = !raw_ref.as_str().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(PipelineError::RawObject {
                raw_ref: raw_ref.to_string(),
                reason: "reference escapes the raw object root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RawObjectSource for FsRawStore {
    async fn load(&self, raw_ref: &RawObjectRef) -> Result<Vec<u8>, PipelineError> {
        let path = self.resolve(raw_ref)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::RawObject {
                raw_ref: raw_ref.to_string(),
                reason: e.to_string(),
            })
    }
}
