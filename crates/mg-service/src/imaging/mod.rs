//! Upload validation and image transcoding.
//!
//! The heavy lifting (decode, re-encode, thumbnail) is delegated to the
//! `image` codec crate and runs on the blocking pool so no request task or
//! lock is held across it. Artifacts land in a scratch directory under a
//! random name that embeds the artifact id and its expiry; deletion is
//! best-effort via a per-artifact timer, backed by a startup sweep plus a
//! periodic sweeper that remove anything stale the timers missed.

use crate::crypto::PayloadCrypto;
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default upload ceiling (50 MiB).
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Default artifact time-to-live.
pub const DEFAULT_ARTIFACT_TTL: Duration = Duration::from_secs(15 * 60);

/// Thumbnail bounding box.
const THUMBNAIL_EDGE: u32 = 300;

/// JPEG quality for normalized output.
const JPEG_QUALITY: u8 = 90;

/// JPEG quality for thumbnails.
const THUMBNAIL_QUALITY: u8 = 80;

/// Axis length below which a low-resolution warning is logged.
const SMALL_AXIS: u32 = 100;

/// Axis length above which an oversized warning is logged.
const LARGE_AXIS: u32 = 4096;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),
}

/// Preprocessor configuration, derived from the service config.
#[derive(Debug, Clone)]
pub struct ImagingConfig {
    pub max_bytes: usize,
    /// Allowed extensions / MIME subtypes, lowercase.
    pub allowed_formats: Vec<String>,
    pub scratch_dir: PathBuf,
    pub artifact_ttl: Duration,
}

impl ImagingConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            allowed_formats: default_formats(),
            scratch_dir: scratch_dir.into(),
            artifact_ttl: DEFAULT_ARTIFACT_TTL,
        }
    }
}

pub fn default_formats() -> Vec<String> {
    ["jpeg", "jpg", "png", "webp", "tiff", "tif", "bmp", "dcm", "dicom"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Normalized output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Tiff,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Tiff => "image/tiff",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Tiff => "tiff",
        }
    }
}

/// Format-level metadata carried forward with the artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub original_format: String,
    pub declared_mime: String,
    pub color_type: String,
}

/// A processed upload: normalized bytes, thumbnail, and scratch files that
/// share one expiry.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub id: String,
    pub content: Vec<u8>,
    pub thumbnail: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub metadata: ImageMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hashed owning-session id.
    pub session_hash: String,
    pub path: PathBuf,
    pub thumbnail_path: PathBuf,
}

/// Validates and transcodes uploads.
pub struct ImagePreprocessor {
    config: ImagingConfig,
    /// When set, artifact files are encrypted at rest; the in-memory bytes
    /// handed to the pipeline stay plaintext.
    crypto: Option<std::sync::Arc<PayloadCrypto>>,
}

impl ImagePreprocessor {
    pub fn new(config: ImagingConfig) -> Self {
        Self {
            config,
            crypto: None,
        }
    }

    pub fn with_crypto(mut self, crypto: std::sync::Arc<PayloadCrypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.config.max_bytes
    }

    /// Validate, transcode, store, and schedule deletion for one upload.
    #[instrument(skip_all, name = "mg.imaging.process", fields(filename = %filename))]
    pub async fn process(
        &self,
        bytes: Vec<u8>,
        declared_mime: &str,
        filename: &str,
        session_hash: &str,
    ) -> Result<ImageArtifact, ImagingError> {
        if bytes.len() > self.config.max_bytes {
            return Err(ImagingError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_bytes,
            });
        }

        let extension = file_extension(filename);
        if !self.format_allowed(&extension, declared_mime) {
            return Err(ImagingError::UnsupportedFormat(format!(
                "{extension}/{declared_mime}"
            )));
        }

        let wants_tiff = matches!(extension.as_str(), "tiff" | "tif" | "dcm" | "dicom")
            || declared_mime.to_ascii_lowercase().contains("dicom");

        // CPU-bound decode and re-encode happen off the async workers.
        let transcode = tokio::task::spawn_blocking(move || transcode(&bytes, wants_tiff))
            .await
            .map_err(|e| ImagingError::TranscodeFailed(format!("transcode task: {e}")))??;

        if transcode.width < SMALL_AXIS || transcode.height < SMALL_AXIS {
            warn!(
                target: "mg.imaging",
                width = transcode.width,
                height = transcode.height,
                "image resolution below the reliable analysis floor"
            );
        }
        if transcode.width > LARGE_AXIS || transcode.height > LARGE_AXIS {
            warn!(
                target: "mg.imaging",
                width = transcode.width,
                height = transcode.height,
                "image exceeds the expected clinical resolution range"
            );
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(self.config.artifact_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let expiry_ms = expires_at.timestamp_millis();

        let path = self.config.scratch_dir.join(format!(
            "{id}_{expiry_ms}.{}",
            transcode.format.extension()
        ));
        let thumbnail_path = self
            .config
            .scratch_dir
            .join(format!("{id}_{expiry_ms}_thumb.jpg"));

        tokio::fs::create_dir_all(&self.config.scratch_dir)
            .await
            .map_err(|e| ImagingError::TranscodeFailed(format!("scratch dir: {e}")))?;
        tokio::fs::write(&path, self.at_rest(&transcode.content)?)
            .await
            .map_err(|e| ImagingError::TranscodeFailed(format!("artifact write: {e}")))?;
        tokio::fs::write(&thumbnail_path, self.at_rest(&transcode.thumbnail)?)
            .await
            .map_err(|e| ImagingError::TranscodeFailed(format!("thumbnail write: {e}")))?;

        schedule_deletion(
            path.clone(),
            thumbnail_path.clone(),
            self.config.artifact_ttl,
        );

        debug!(
            target: "mg.imaging",
            artifact = %id,
            format = ?transcode.format,
            width = transcode.width,
            height = transcode.height,
            "artifact stored"
        );

        Ok(ImageArtifact {
            id,
            content: transcode.content,
            thumbnail: transcode.thumbnail,
            format: transcode.format,
            width: transcode.width,
            height: transcode.height,
            metadata: ImageMetadata {
                original_format: transcode.original_format,
                declared_mime: declared_mime.to_string(),
                color_type: transcode.color_type,
            },
            created_at,
            expires_at,
            session_hash: session_hash.to_string(),
            path,
            thumbnail_path,
        })
    }

    /// Delete every scratch file whose embedded expiry has passed. Run once
    /// at startup (timers do not survive restarts) and periodically after.
    #[instrument(skip_all, name = "mg.imaging.sweep")]
    pub async fn sweep_expired(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let mut removed = 0usize;

        let Ok(mut entries) = tokio::fs::read_dir(&self.config.scratch_dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(expiry_ms) = parse_expiry(name) else {
                continue;
            };
            if expiry_ms < now_ms && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(target: "mg.imaging", removed, "swept stale artifacts");
        }
        removed
    }

    /// Bytes as stored on disk: an encrypted envelope when crypto is
    /// configured, the plain transcode otherwise.
    fn at_rest(&self, bytes: &[u8]) -> Result<Vec<u8>, ImagingError> {
        match &self.crypto {
            Some(crypto) => {
                let envelope = crypto
                    .encrypt(bytes)
                    .map_err(|e| ImagingError::TranscodeFailed(format!("at-rest encrypt: {e}")))?;
                serde_json::to_vec(&envelope)
                    .map_err(|e| ImagingError::TranscodeFailed(format!("at-rest encode: {e}")))
            }
            None => Ok(bytes.to_vec()),
        }
    }

    fn format_allowed(&self, extension: &str, mime: &str) -> bool {
        let mime = mime.to_ascii_lowercase();
        let subtype = mime.rsplit('/').next().unwrap_or_default();
        let ext_ok = self
            .config
            .allowed_formats
            .iter()
            .any(|allowed| allowed == extension);
        let mime_ok = self
            .config
            .allowed_formats
            .iter()
            .any(|allowed| allowed == subtype || mime.contains(allowed.as_str()));
        ext_ok && mime_ok
    }
}

struct TranscodeOutput {
    content: Vec<u8>,
    thumbnail: Vec<u8>,
    format: OutputFormat,
    width: u32,
    height: u32,
    original_format: String,
    color_type: String,
}

fn transcode(bytes: &[u8], wants_tiff: bool) -> Result<TranscodeOutput, ImagingError> {
    let original_format = image::guess_format(bytes)
        .map(format_name)
        .unwrap_or("unknown");

    let decoded =
        image::load_from_memory(bytes).map_err(|e| ImagingError::InvalidImage(e.to_string()))?;

    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ImagingError::InvalidImage("empty dimensions".to_string()));
    }
    let color_type = format!("{:?}", decoded.color());
    let channels = decoded.color().channel_count();
    if !(1..=4).contains(&channels) {
        return Err(ImagingError::InvalidImage(format!(
            "unsupported channel count {channels}"
        )));
    }

    let (format, content) = if wants_tiff {
        (OutputFormat::Tiff, encode(&decoded, ImageOutputFormat::Tiff)?)
    } else {
        (
            OutputFormat::Jpeg,
            encode_jpeg(&decoded, JPEG_QUALITY)?,
        )
    };

    let thumbnail_image = decoded.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE);
    let thumbnail = encode_jpeg(&thumbnail_image, THUMBNAIL_QUALITY)?;

    Ok(TranscodeOutput {
        content,
        thumbnail,
        format,
        width,
        height,
        original_format: original_format.to_string(),
        color_type,
    })
}

/// JPEG cannot carry alpha; flatten first when needed.
fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let flattened;
    let source = if image.color().has_alpha() {
        flattened = DynamicImage::ImageRgb8(image.to_rgb8());
        &flattened
    } else {
        image
    };
    encode(source, ImageOutputFormat::Jpeg(quality))
}

fn encode(image: &DynamicImage, format: ImageOutputFormat) -> Result<Vec<u8>, ImagingError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(|e| ImagingError::TranscodeFailed(e.to_string()))?;
    Ok(out.into_inner())
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::WebP => "webp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Gif => "gif",
        _ => "other",
    }
}

fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Best-effort deletion at TTL; the sweeper catches anything this misses.
fn schedule_deletion(path: PathBuf, thumbnail_path: PathBuf, ttl: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(target: "mg.imaging", error = %e, "artifact already gone at expiry");
        }
        let _ = tokio::fs::remove_file(&thumbnail_path).await;
    });
}

/// Extract the embedded expiry from `{id}_{expiry_ms}[_thumb].{ext}`.
fn parse_expiry(filename: &str) -> Option<i64> {
    let stem = filename.split('.').next()?;
    let stem = stem.strip_suffix("_thumb").unwrap_or(stem);
    let (_, expiry) = stem.rsplit_once('_')?;
    expiry.parse().ok()
}
