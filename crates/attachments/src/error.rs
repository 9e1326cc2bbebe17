use crate::{AssetId, AttachmentStatus, MediaKind};

use sd_utils::error::FileIOError;

use std::path::PathBuf;

use tokio::task::JoinError;

/// Configuration rejected before the pipeline starts processing anything.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("max_bytes_per_attachment must be greater than zero")]
	NonPositiveSizeLimit,
	#[error("max_candidate_count must be greater than zero")]
	ZeroCandidateCount,
	#[error("invalid {field}, expected range [1, 100], received: {value}")]
	InvalidQuality { field: &'static str, value: u8 },
	#[error("minimum_photo_quality ({minimum}) is above photo_quality ({initial})")]
	QualityFloorAboveStart { minimum: u8, initial: u8 },
	#[error("quality_step must be greater than zero")]
	ZeroQualityStep,
	#[error("thumbnail_dimension must be greater than zero")]
	ZeroThumbnailDimension,
	#[error("invalid thumbnail_quality, expected range [0.0, 100.0], received: {0}")]
	InvalidThumbnailQuality(f32),
	#[error("video compression is set to transcode but no video transcoder was provided")]
	MissingTranscoder,
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to parse configuration: {0}")]
	Parse(#[from] serde_json::Error),
}

/// A request the pipeline refused, nothing was changed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
	#[error("unknown attachment identifier: <id='{0}'>")]
	UnknownIdentifier(AssetId),
	#[error("attachment is busy, ignoring request: <id='{id}', status={status:?}>")]
	Busy { id: AssetId, status: AttachmentStatus },
	#[error("media kind {0:?} is not allowed by the configuration")]
	KindNotAllowed(MediaKind),
	#[error("attachment doesn't come from the library: <id='{0}'>")]
	NotALibraryAsset(AssetId),
	#[error("attachment pipeline is closed")]
	Closed,
}

/// Errors reported by a [`LibraryFeed`](crate::LibraryFeed) implementation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LibraryFeedError {
	#[error("access to the media library was denied")]
	Unauthorized,
	#[error("failed to fetch library snapshot: {0}")]
	Fetch(String),
}

/// Errors reported by an [`AssetLoader`](crate::AssetLoader) implementation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AssetLoadError {
	#[error("asset is gone from the library: <id='{0}'>")]
	NotFound(AssetId),
	#[error("failed to load asset <id='{id}'>: {reason}")]
	Unavailable { id: AssetId, reason: String },
}

/// Errors reported by a [`MediaDecoder`](crate::MediaDecoder) implementation.
#[derive(thiserror::Error, Debug, Clone)]
#[error("failed to decode video frame: {0}")]
pub struct DecodeError(pub String);

/// Errors reported by a [`VideoTranscoder`](crate::VideoTranscoder) implementation.
#[derive(thiserror::Error, Debug, Clone)]
#[error("failed to transcode video: {0}")]
pub struct TranscodeError(pub String);

#[derive(thiserror::Error, Debug)]
pub enum ThumbnailError {
	#[error("failed to format image: {0}")]
	FormatImage(#[from] sd_images::Error),
	#[error("no media decoder available for video <path='{}'>", .0.display())]
	NoDecoder(PathBuf),
	#[error(transparent)]
	Decode(#[from] DecodeError),
	#[error("panic while generating thumbnail: {0}")]
	Panic(String),
	#[error("background thumbnail task failed: {0}")]
	BackgroundTaskFailed(#[from] JoinError),
}

#[derive(thiserror::Error, Debug)]
pub enum CompressionError {
	#[error("failed to re-encode image: {0}")]
	Image(#[from] sd_images::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	Transcode(#[from] TranscodeError),
	#[error("no video transcoder available")]
	NoTranscoder,
	#[error("panic while compressing: {0}")]
	Panic(String),
	#[error("background compression task failed: {0}")]
	BackgroundTaskFailed(#[from] JoinError),
}
