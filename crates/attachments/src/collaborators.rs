//! Capabilities the pipeline consumes from the platform: the device media library, the
//! video decoder and the optional video transcoder.

use crate::{
	error::{AssetLoadError, DecodeError, LibraryFeedError, TranscodeError},
	AssetDescriptor, MediaKindsAllowed, MediaSource, PipelineConfig,
};

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use sd_images::DynamicImage;

/// Query handed to the library feed. Snapshots are expected newest first, sorted by
/// creation date descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryQuery {
	pub kinds: MediaKindsAllowed,
	pub limit: usize,
}

impl From<&PipelineConfig> for LibraryQuery {
	fn from(config: &PipelineConfig) -> Self {
		Self {
			kinds: config.media_kinds_allowed,
			limit: config.max_candidate_count,
		}
	}
}

/// A fully materialized, ordered view of the library assets matching a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarySnapshot {
	pub assets: Vec<AssetDescriptor>,
}

impl LibrarySnapshot {
	#[must_use]
	pub fn new(assets: impl IntoIterator<Item = AssetDescriptor>) -> Self {
		Self {
			assets: assets.into_iter().collect(),
		}
	}
}

#[async_trait]
pub trait LibraryFeed: Send + 'static {
	/// First call yields the initial snapshot, subsequent calls wait until the library changes
	/// and yield a fresh snapshot. `None` means the feed is over.
	async fn next_snapshot(
		&mut self,
		query: &LibraryQuery,
	) -> Option<Result<LibrarySnapshot, LibraryFeedError>>;
}

/// A library asset materialized by an [`AssetLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAsset {
	pub media: MediaSource,
	pub size_bytes: u64,
}

#[async_trait]
pub trait AssetLoader: Send + Sync + 'static {
	/// Fetches the original media of a library asset, downloading it when it is cloud only.
	async fn load(&self, descriptor: &AssetDescriptor) -> Result<LoadedAsset, AssetLoadError>;
}

#[async_trait]
pub trait MediaDecoder: Send + Sync + 'static {
	/// Decodes a single frame of `video` at `timestamp`.
	async fn frame_at(&self, video: &Path, timestamp: Duration) -> Result<DynamicImage, DecodeError>;
}

#[async_trait]
pub trait VideoTranscoder: Send + Sync + 'static {
	/// Re-encodes `video` aiming at `target_bytes`, returning the path of the new file.
	async fn transcode(&self, video: &Path, target_bytes: u64) -> Result<PathBuf, TranscodeError>;
}

pub(crate) type SharedLoader = Arc<dyn AssetLoader>;
pub(crate) type SharedDecoder = Arc<dyn MediaDecoder>;
pub(crate) type SharedTranscoder = Arc<dyn VideoTranscoder>;
