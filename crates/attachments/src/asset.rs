use std::{fmt, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a candidate, unique across library assets and local captures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
	/// Fresh identifier for a local capture that the library knows nothing about.
	#[must_use]
	pub fn generate() -> Self {
		Self(Uuid::new_v4().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for AssetId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for AssetId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for AssetId {
	fn from(id: &str) -> Self {
		Self(id.to_owned())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
	Image,
	Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetOrigin {
	Library,
	Capture,
}

/// What the device library tells us about one of its assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
	pub id: AssetId,
	pub kind: MediaKind,
	#[serde(default)]
	pub created_at: Option<DateTime<Utc>>,
	/// Changes whenever the asset is edited, used to invalidate cached thumbnails.
	#[serde(default)]
	pub modified_at: Option<DateTime<Utc>>,
	/// Size of the original, when the library already knows it.
	#[serde(default)]
	pub size_bytes: Option<u64>,
	/// The original only lives in remote storage and must be downloaded before use.
	#[serde(default)]
	pub is_cloud_only: bool,
}

impl AssetDescriptor {
	#[must_use]
	pub fn new(id: impl Into<AssetId>, kind: MediaKind) -> Self {
		Self {
			id: id.into(),
			kind,
			created_at: None,
			modified_at: None,
			size_bytes: None,
			is_cloud_only: false,
		}
	}
}

/// Materialized media, either encoded image bytes or a video file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
	ImageBytes(Arc<[u8]>),
	VideoFile(PathBuf),
}

impl MediaSource {
	#[must_use]
	pub const fn kind(&self) -> MediaKind {
		match self {
			Self::ImageBytes(_) => MediaKind::Image,
			Self::VideoFile(_) => MediaKind::Video,
		}
	}
}

/// A capture handed over by the camera or the system picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
	pub media: MediaSource,
	/// The library asset this capture was picked from, if it wasn't freshly taken.
	pub library_descriptor: Option<AssetDescriptor>,
}

impl Capture {
	#[must_use]
	pub fn image(bytes: impl Into<Arc<[u8]>>) -> Self {
		Self {
			media: MediaSource::ImageBytes(bytes.into()),
			library_descriptor: None,
		}
	}

	#[must_use]
	pub fn video(path: impl Into<PathBuf>) -> Self {
		Self {
			media: MediaSource::VideoFile(path.into()),
			library_descriptor: None,
		}
	}

	#[must_use]
	pub fn picked_from(mut self, descriptor: AssetDescriptor) -> Self {
		self.library_descriptor = Some(descriptor);
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
	Library {
		descriptor: AssetDescriptor,
		/// Filled once the asset loader materialized the original.
		loaded: Option<MediaSource>,
	},
	Captured {
		media: MediaSource,
		/// Set when the capture was picked from the library instead of freshly taken.
		descriptor: Option<AssetDescriptor>,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Thumbnail {
	/// Not computed yet, or invalidated.
	#[default]
	Pending,
	/// WebP encoded preview.
	Ready(Arc<[u8]>),
	/// Extraction failed, render a placeholder.
	Unavailable,
}

impl Thumbnail {
	#[must_use]
	pub const fn is_resolved(&self) -> bool {
		!matches!(self, Self::Pending)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
	pub id: AssetId,
	pub kind: MediaKind,
	pub origin: AssetOrigin,
	pub size_bytes: Option<u64>,
	pub exceeded_size_limit: bool,
	pub thumbnail: Thumbnail,
	pub source: AssetSource,
}

impl MediaAsset {
	pub(crate) fn from_library(descriptor: AssetDescriptor, max_bytes: u64) -> Self {
		let known_size = descriptor.size_bytes;

		let mut asset = Self {
			id: descriptor.id.clone(),
			kind: descriptor.kind,
			origin: AssetOrigin::Library,
			size_bytes: None,
			exceeded_size_limit: false,
			thumbnail: Thumbnail::Pending,
			source: AssetSource::Library {
				descriptor,
				loaded: None,
			},
		};

		if let Some(size) = known_size {
			asset.set_size(size, max_bytes);
		}

		asset
	}

	pub(crate) fn from_capture(
		id: AssetId,
		media: MediaSource,
		descriptor: Option<AssetDescriptor>,
	) -> Self {
		Self {
			id,
			kind: media.kind(),
			origin: AssetOrigin::Capture,
			size_bytes: None,
			exceeded_size_limit: false,
			thumbnail: Thumbnail::Pending,
			source: AssetSource::Captured { media, descriptor },
		}
	}

	pub(crate) fn set_size(&mut self, size: u64, max_bytes: u64) {
		self.size_bytes = Some(size);
		self.exceeded_size_limit = size > max_bytes;
	}

	/// The library descriptor backing this asset, if any.
	#[must_use]
	pub const fn descriptor(&self) -> Option<&AssetDescriptor> {
		match &self.source {
			AssetSource::Library { descriptor, .. } => Some(descriptor),
			AssetSource::Captured { descriptor, .. } => descriptor.as_ref(),
		}
	}

	/// Media ready to be uploaded or previewed, `None` for library assets not loaded yet.
	#[must_use]
	pub const fn media(&self) -> Option<&MediaSource> {
		match &self.source {
			AssetSource::Library { loaded, .. } => loaded.as_ref(),
			AssetSource::Captured { media, .. } => Some(media),
		}
	}
}
