use crate::{error::ConfigError, MediaKind};

use sd_utils::error::FileIOError;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKindsAllowed {
	Image,
	Video,
	#[default]
	Both,
}

impl MediaKindsAllowed {
	#[must_use]
	pub const fn allows(self, kind: MediaKind) -> bool {
		matches!(
			(self, kind),
			(Self::Both, _) | (Self::Image, MediaKind::Image) | (Self::Video, MediaKind::Video)
		)
	}
}

/// What to do with a captured video above the size budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCompression {
	/// Keep the original file and flag it as oversized.
	#[default]
	KeepOriginal,
	/// Re-encode it through the video transcoder collaborator.
	Transcode,
}

/// Configuration for an attachment pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
	/// Caps the length of the library segment
	#[serde(default = "default_max_candidate_count")]
	pub max_candidate_count: usize,

	/// Byte budget of a single attachment, drives compression and the size limit flag
	#[serde(default = "default_max_bytes_per_attachment")]
	pub max_bytes_per_attachment: u64,

	#[serde(default)]
	pub media_kinds_allowed: MediaKindsAllowed,

	/// JPEG quality (1-100) of the first compression attempt
	#[serde(default = "default_photo_quality")]
	pub photo_quality: u8,

	/// Compression gives up below this JPEG quality (1-100)
	#[serde(default = "default_minimum_photo_quality")]
	pub minimum_photo_quality: u8,

	#[serde(default = "default_quality_step")]
	pub quality_step: u8,

	/// Thumbnails are scaled down to about this many pixels per side
	#[serde(default = "default_thumbnail_dimension")]
	pub thumbnail_dimension: u32,

	/// WebP quality (0-100) of thumbnails
	#[serde(default = "default_thumbnail_quality")]
	pub thumbnail_quality: f32,

	#[serde(default)]
	pub video_compression: VideoCompression,
}

const fn default_max_candidate_count() -> usize {
	100
}

const fn default_max_bytes_per_attachment() -> u64 {
	10 * 1024 * 1024
}

const fn default_photo_quality() -> u8 {
	80
}

const fn default_minimum_photo_quality() -> u8 {
	10
}

const fn default_quality_step() -> u8 {
	10
}

const fn default_thumbnail_dimension() -> u32 {
	256
}

const fn default_thumbnail_quality() -> f32 {
	sd_images::DEFAULT_WEBP_QUALITY
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			max_candidate_count: default_max_candidate_count(),
			max_bytes_per_attachment: default_max_bytes_per_attachment(),
			media_kinds_allowed: MediaKindsAllowed::default(),
			photo_quality: default_photo_quality(),
			minimum_photo_quality: default_minimum_photo_quality(),
			quality_step: default_quality_step(),
			thumbnail_dimension: default_thumbnail_dimension(),
			thumbnail_quality: default_thumbnail_quality(),
			video_compression: VideoCompression::default(),
		}
	}
}

impl PipelineConfig {
	/// Reads a JSON configuration file, missing fields fall back to their defaults.
	pub async fn load(path: impl AsRef<Path> + Send) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let data = fs::read(path)
			.await
			.map_err(|e| FileIOError::from((path, e, "reading attachment pipeline config")))?;

		let config = serde_json::from_slice::<Self>(&data)?;
		config.validate()?;

		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_bytes_per_attachment == 0 {
			return Err(ConfigError::NonPositiveSizeLimit);
		}

		if self.max_candidate_count == 0 {
			return Err(ConfigError::ZeroCandidateCount);
		}

		for (field, value) in [
			("photo_quality", self.photo_quality),
			("minimum_photo_quality", self.minimum_photo_quality),
		] {
			if !(1..=100).contains(&value) {
				return Err(ConfigError::InvalidQuality { field, value });
			}
		}

		if self.minimum_photo_quality > self.photo_quality {
			return Err(ConfigError::QualityFloorAboveStart {
				minimum: self.minimum_photo_quality,
				initial: self.photo_quality,
			});
		}

		if self.quality_step == 0 {
			return Err(ConfigError::ZeroQualityStep);
		}

		if self.thumbnail_dimension == 0 {
			return Err(ConfigError::ZeroThumbnailDimension);
		}

		if !(0.0..=100.0).contains(&self.thumbnail_quality) {
			return Err(ConfigError::InvalidThumbnailQuality(self.thumbnail_quality));
		}

		Ok(())
	}

	/// Pixel budget handed to the thumbnail encoder.
	#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
	pub(crate) fn thumbnail_target_px(&self) -> f32 {
		(self.thumbnail_dimension as f32) * (self.thumbnail_dimension as f32)
	}
}
