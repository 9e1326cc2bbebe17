//! Attachment candidates for a composer: library assets and local captures merged into a single
//! ordered list, with per item selection status, size limiting and lazy thumbnails.
//!
//! The [`AttachmentPipeline`] owns all of it and publishes an immutable
//! [`CandidatesSnapshot`] after every change.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::expect_used,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::as_conversions,
	clippy::dbg_macro
)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod asset;
mod blocking;
mod collaborators;
mod config;
mod error;
mod pipeline;
mod snapshot;
mod status;

pub mod reconciler;
pub mod size_limiter;
pub mod thumbnailer;

pub use asset::{
	AssetDescriptor, AssetId, AssetOrigin, AssetSource, Capture, MediaAsset, MediaKind,
	MediaSource, Thumbnail,
};
pub use collaborators::{
	AssetLoader, LibraryFeed, LibraryQuery, LibrarySnapshot, LoadedAsset, MediaDecoder,
	VideoTranscoder,
};
pub use config::{MediaKindsAllowed, PipelineConfig, VideoCompression};
pub use error::{
	AssetLoadError, CompressionError, ConfigError, DecodeError, LibraryFeedError, PipelineError,
	ThumbnailError, TranscodeError,
};
pub use pipeline::{AttachmentPipeline, AttachmentPipelineBuilder, PipelineEvent};
pub use snapshot::{Candidate, CandidatesSnapshot};
pub use status::{AttachmentStatus, InvalidTransition, PendingWork, StatusEvent};
