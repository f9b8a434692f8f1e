//! Temporary preview image files

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A preview image written to the working directory
///
/// The file is removed when the value is dropped, whichever way the
/// dispatch that created it ends.
#[derive(Debug)]
pub struct PreviewImage {
    path: PathBuf,
}

impl PreviewImage {
    /// Write `bytes` to a new file named after the resource id
    pub async fn write(dir: &Path, resource_id: &str, bytes: &[u8]) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let image = Self {
            path: dir.join(file_name(resource_id)),
        };
        tokio::fs::write(&image.path, bytes).await?;

        debug!(path = %image.path.display(), "Saved preview image");
        Ok(image)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PreviewImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed preview image"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove preview image"),
        }
    }
}

/// Unique per call, so redelivery of the same resource cannot collide
fn file_name(resource_id: &str) -> String {
    let key: String = resource_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("{}-{}.png", key, Uuid::new_v4().simple())
}
