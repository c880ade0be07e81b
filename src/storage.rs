use async_trait::async_trait;
use image::{ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::AttachmentKind;

/// Images larger than this (on either side) are scaled down to fit, keeping aspect ratio.
pub const MAX_IMAGE_DIMENSION: u32 = 1200;

/// Re-encoding quality for JPEG uploads.
pub const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage file name: {0:?}")]
    InvalidName(String),
    #[error("simulated storage failure")]
    Simulated,
}

/// StoredFile
///
/// Where a saved upload ended up and how it is reachable over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub filename: String,
    pub url: String,
    pub size: i64,
}

/// Public URL of a stored file, served by the `/uploads` static route.
pub fn public_url(kind: AttachmentKind, filename: &str) -> String {
    format!("/uploads/{}/{}", kind.directory(), filename)
}

// 1. StorageService Contract
/// StorageService
///
/// Abstract contract for the media store, so handlers run against local disk in
/// production and an in-memory mock in tests.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the per-kind sub-directories. Called once at startup.
    async fn ensure_directories(&self) -> Result<(), StorageError>;

    /// Writes `bytes` as `filename` under the directory for `kind`.
    async fn save(
        &self,
        kind: AttachmentKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError>;

    /// Removes a stored file. Deleting a file that is already gone is not an error.
    async fn delete(&self, kind: AttachmentKind, filename: &str) -> Result<(), StorageError>;
}

// 2. The Real Implementation (local disk)
/// LocalDiskStorage
///
/// Stores uploads as `<root>/images/<file>` and `<root>/audio/<file>`.
#[derive(Clone, Debug)]
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, kind: AttachmentKind, filename: &str) -> Result<PathBuf, StorageError> {
        if sanitize_filename(filename) != filename {
            return Err(StorageError::InvalidName(filename.to_string()));
        }
        Ok(self.root.join(kind.directory()).join(filename))
    }
}

#[async_trait]
impl StorageService for LocalDiskStorage {
    async fn ensure_directories(&self) -> Result<(), StorageError> {
        for kind in [AttachmentKind::Image, AttachmentKind::Audio] {
            tokio::fs::create_dir_all(self.root.join(kind.directory())).await?;
        }
        Ok(())
    }

    async fn save(
        &self,
        kind: AttachmentKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let path = self.path_for(kind, filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        Ok(StoredFile {
            filename: filename.to_string(),
            url: public_url(kind, filename),
            size: bytes.len() as i64,
        })
    }

    async fn delete(&self, kind: AttachmentKind, filename: &str) -> Result<(), StorageError> {
        let path = self.path_for(kind, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// sanitize_filename
///
/// Reduces a client-supplied file name to a single safe path segment: directory parts are
/// dropped and only ASCII alphanumerics, `.`, `-` and `_` are kept.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// generated_filename
///
/// A fresh `<uuid>.<ext>` name; the extension comes from the client's original name.
pub fn generated_filename(original_name: &str) -> String {
    let sanitized = sanitize_filename(original_name);
    let extension = Path::new(&sanitized)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10)
        .map(str::to_ascii_lowercase);

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

/// process_image
///
/// Decodes an uploaded image, shrinks it to fit `MAX_IMAGE_DIMENSION` (never enlarging)
/// and re-encodes it in its own format. JPEG output uses `JPEG_QUALITY`.
pub fn process_image(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory_with_format(bytes, format)?;

    let img = if img.width() > MAX_IMAGE_DIMENSION || img.height() > MAX_IMAGE_DIMENSION {
        img.resize(MAX_IMAGE_DIMENSION, MAX_IMAGE_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };

    let mut buffer = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            img.to_rgb8().write_with_encoder(encoder)?;
        }
        other => img.write_to(&mut Cursor::new(&mut buffer), other)?,
    }

    Ok(buffer)
}

// 3. The Mock Implementation (For Unit Tests)
/// MockStorageService
///
/// Keeps "files" in memory, keyed by `<dir>/<filename>`, so tests can assert on what was
/// written and deleted without touching disk.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, every write fails.
    pub should_fail: bool,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    fn key(kind: AttachmentKind, filename: &str) -> String {
        format!("{}/{}", kind.directory(), filename)
    }

    /// Paths of every file currently held, sorted.
    pub fn stored_paths(&self) -> Vec<String> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn contents(&self, kind: AttachmentKind, filename: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.get(&Self::key(kind, filename)).cloned()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_directories(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save(
        &self,
        kind: AttachmentKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        if self.should_fail {
            return Err(StorageError::Simulated);
        }
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(Self::key(kind, filename), bytes.to_vec());

        Ok(StoredFile {
            filename: filename.to_string(),
            url: public_url(kind, filename),
            size: bytes.len() as i64,
        })
    }

    async fn delete(&self, kind: AttachmentKind, filename: &str) -> Result<(), StorageError> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.remove(&Self::key(kind, filename));
        Ok(())
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
