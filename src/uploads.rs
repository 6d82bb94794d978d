use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::Result;

/// URL prefix under which stored files are served.
pub const PUBLIC_PREFIX: &str = "uploads";

/// A file received in a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Writes uploaded files to a directory and hands back opaque relative paths.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stores the file under a random name, keeping a sane extension, and
    /// returns `uploads/<name>`.
    pub async fn store(&self, file: &UploadedFile) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = match file.file_name.as_deref().and_then(extension_of) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        tokio::fs::write(self.dir.join(&name), &file.bytes).await?;

        tracing::debug!("Stored upload {} ({} bytes)", name, file.bytes.len());
        Ok(format!("{}/{}", PUBLIC_PREFIX, name))
    }

    /// Removes a file previously returned by [`UploadStore::store`]. Used when
    /// the record that would have referenced it was never saved.
    pub async fn discard(&self, public_path: &str) {
        let Some(name) = public_path
            .strip_prefix(PUBLIC_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains('/') && !name.contains(".."))
        else {
            tracing::warn!("Refusing to discard unexpected upload path {}", public_path);
            return;
        };

        if let Err(e) = tokio::fs::remove_file(self.dir.join(name)).await {
            tracing::warn!("Failed to remove orphaned upload {}: {}", name, e);
        }
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    let valid = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
