//! Filesystem image store: `<root>/{request_id}_{hex image_id}.jpg`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::collab::ImageStore;

#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{request_id}_{hex(image_id)}.jpg`. Request ids are minted tokens
    /// without `_`, and the hex part has none either, so distinct
    /// (request, image) pairs never share a file.
    fn path_for(&self, request_id: &str, image_id: &str) -> anyhow::Result<PathBuf> {
        if request_id.is_empty()
            || !request_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            anyhow::bail!("request id {request_id:?} is not a storable token");
        }
        Ok(self
            .root
            .join(format!("{request_id}_{}.jpg", hex::encode(image_id))))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn store(&self, request_id: &str, image_id: &str, bytes: &Bytes) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(request_id, image_id)?;
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "image stored");
        Ok(())
    }

    async fn load(&self, request_id: &str, image_id: &str) -> anyhow::Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(request_id, image_id)?).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, request_id: &str, image_ids: &[String]) -> anyhow::Result<()> {
        for image_id in image_ids {
            let path = self.path_for(request_id, image_id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "image removal failed"),
            }
        }
        Ok(())
    }
}
