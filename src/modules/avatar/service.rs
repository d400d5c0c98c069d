use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::api_errors::AppError;

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("file too large")]
    TooLarge,
    #[error("unsupported image format")]
    UnknownFormat,
    #[error("file missing")]
    MissingFile,
    #[error("invalid avatar id")]
    InvalidId,
    #[error("avatar storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AvatarError> for AppError {
    fn from(err: AvatarError) -> Self {
        match err {
            AvatarError::TooLarge => AppError::payload_too_large(err.to_string()),
            AvatarError::UnknownFormat | AvatarError::MissingFile | AvatarError::InvalidId => {
                AppError::bad_request(err.to_string())
            }
            AvatarError::Io(_) => AppError::internal("internal error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 4] = [ImageFormat::Webp, ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif];

    /// Identify the format from its magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAvatar {
    pub avatar_id: String,
    pub file_name: String,
    pub url: String,
}

/// Content-addressed avatar files on disk.
pub struct AvatarService {
    dir: PathBuf,
    url_prefix: String,
    max_bytes: usize,
}

impl AvatarService {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate, hash and persist `bytes`. Storing the same bytes twice is a no-op.
    pub async fn store(&self, bytes: &[u8]) -> Result<StoredAvatar, AvatarError> {
        if bytes.len() > self.max_bytes {
            return Err(AvatarError::TooLarge);
        }
        let format = ImageFormat::sniff(bytes).ok_or(AvatarError::UnknownFormat)?;

        let avatar_id = hex_digest(bytes);
        let file_name = format!("{avatar_id}.{}", format.extension());
        let path = self.dir.join(&file_name);

        if tokio::fs::try_exists(&path).await? {
            debug!(avatar_id = %avatar_id, "avatar already stored");
        } else {
            tokio::fs::create_dir_all(&self.dir).await?;
            let tmp = self.dir.join(format!(".{file_name}.{}", uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;
            info!(avatar_id = %avatar_id, bytes = bytes.len(), "avatar stored");
        }

        Ok(StoredAvatar {
            url: format!("{}/{}", self.url_prefix, file_name),
            avatar_id,
            file_name,
        })
    }

    /// The stored file for `id`, if any.
    pub async fn find(&self, id: &str) -> Result<Option<PathBuf>, AvatarError> {
        if !is_valid_id(id) {
            return Err(AvatarError::InvalidId);
        }
        for format in ImageFormat::ALL {
            let path = self.dir.join(format!("{id}.{}", format.extension()));
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Ids are lowercase hex SHA-256 digests.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Smallest byte strings that pass format sniffing.
    pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    pub const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";
    pub const WEBP: &[u8] = b"RIFF\x1a\0\0\0WEBPVP8L";
    pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
}
