//! Uploader implementations.
//!
//! The core only hands over the path of a closed file; what happens next is up to
//! the uploader. `LocalCopyUploader` copies the file into a destination folder
//! (typically one that a cloud-drive client keeps in sync) on a background task.

use crate::config::UploadConfig;
use crate::core::Uploader;
use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinSet;

/// Copies each closed file into `destination` without blocking the caller.
///
/// Copies run on the runtime the uploader was created in; [`Uploader::drain`]
/// waits for all of them.
pub struct LocalCopyUploader {
    destination: PathBuf,
    runtime: Handle,
    copies: Mutex<JoinSet<()>>,
}

impl LocalCopyUploader {
    /// Fails when called outside a tokio runtime.
    pub fn new(destination: impl Into<PathBuf>) -> AppResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            LoggerError::Configuration(format!("upload needs a tokio runtime: {e}"))
        })?;
        Ok(Self {
            destination: destination.into(),
            runtime,
            copies: Mutex::new(JoinSet::new()),
        })
    }

    fn copies(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.copies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Uploader for LocalCopyUploader {
    fn submit(&self, path: &Path) {
        let Some(name) = path.file_name() else {
            tracing::warn!(path = %path.display(), "Not uploading a path without a file name");
            return;
        };
        let source = path.to_path_buf();
        let target = self.destination.join(name);
        let destination = self.destination.clone();

        self.copies().spawn_on(
            async move {
                tracing::info!(file = %source.display(), "Trying to upload data...");
                if let Err(e) = tokio::fs::create_dir_all(&destination).await {
                    tracing::warn!(error = %e, destination = %destination.display(), "Could not create upload folder");
                    return;
                }
                match tokio::fs::copy(&source, &target).await {
                    Ok(bytes) => {
                        tracing::info!(file = %target.display(), bytes, "File uploaded")
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, file = %source.display(), "Could not upload file")
                    }
                }
            },
            &self.runtime,
        );
    }

    async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.copies());
        if !pending.is_empty() {
            tracing::info!(uploads = pending.len(), "Waiting for pending uploads");
        }
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Upload task failed");
            }
        }
    }
}

/// Leaves closed files where they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUploader;

impl Uploader for NoopUploader {
    fn submit(&self, path: &Path) {
        tracing::debug!(file = %path.display(), "Upload disabled, keeping file locally");
    }
}

/// Build the uploader selected by configuration.
pub fn from_config(config: &UploadConfig) -> AppResult<Arc<dyn Uploader>> {
    let uploader: Arc<dyn Uploader> = match (config.enabled, &config.destination) {
        (true, Some(destination)) => Arc::new(LocalCopyUploader::new(destination.clone())?),
        _ => Arc::new(NoopUploader),
    };
    Ok(uploader)
}
