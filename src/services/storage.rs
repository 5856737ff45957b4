use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::{
    backend::{BackendError, ObjectStorage},
    models::file::Upload,
};

pub const TRIP_FILES_BUCKET: &str = "trip-files";

#[derive(Clone)]
pub struct StorageService {
    root: Arc<PathBuf>,
    public_base: Arc<Url>,
}

impl StorageService {
    pub fn new(root: PathBuf, public_base: Url) -> Self {
        Self {
            root: Arc::new(root),
            public_base: Arc::new(public_base),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_structure(&self) -> Result<(), BackendError> {
        fs::create_dir_all(self.root().join(TRIP_FILES_BUCKET)).await?;
        Ok(())
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if bucket.is_empty() || bucket.contains(['/', '\\', '.']) || path.is_empty() || escapes {
            return Err(BackendError::Invalid(format!(
                "storage path '{bucket}/{path}' is not allowed"
            )));
        }
        Ok(self.root().join(bucket).join(relative))
    }
}

#[async_trait]
impl ObjectStorage for StorageService {
    async fn upload(&self, bucket: &str, path: &str, upload: &Upload) -> Result<(), BackendError> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, &upload.bytes).await?;
        debug!(%bucket, %path, bytes = upload.bytes.len(), "object uploaded");
        Ok(())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        for path in paths {
            let target = self.object_path(bucket, path)?;
            match fs::remove_file(&target).await {
                Ok(()) => debug!(%bucket, %path, "object removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        let mut url = (*self.public_base).clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("storage").push(bucket);
            segments.extend(path.split('/'));
        }
        url.to_string()
    }
}
