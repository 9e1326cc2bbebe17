use crate::{
	blocking::run_blocking, collaborators::MediaDecoder, error::ThumbnailError, AssetId,
	MediaSource, PipelineConfig,
};

use std::{sync::Arc, time::Duration};

use tracing::{instrument, trace};

/// Videos are previewed with their very first frame, which also exists for zero length videos.
pub const VIDEO_FRAME_TIMESTAMP: Duration = Duration::ZERO;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailSettings {
	/// Pixel budget of the preview.
	pub target_px: f32,
	/// WebP quality, between 0-100.
	pub quality: f32,
}

impl From<&PipelineConfig> for ThumbnailSettings {
	fn from(config: &PipelineConfig) -> Self {
		Self {
			target_px: config.thumbnail_target_px(),
			quality: config.thumbnail_quality,
		}
	}
}

/// Produces a small WebP preview of `source`.
///
/// Images are decoded from memory and downscaled, videos are sampled at
/// [`VIDEO_FRAME_TIMESTAMP`] through the `decoder` and downscaled the same way.
#[instrument(skip_all, fields(%id, kind = ?source.kind()))]
pub async fn extract_thumbnail(
	id: &AssetId,
	source: &MediaSource,
	decoder: Option<&dyn MediaDecoder>,
	settings: ThumbnailSettings,
) -> Result<Vec<u8>, ThumbnailError> {
	trace!("Generating thumbnail");

	let thumbnail = match source {
		MediaSource::ImageBytes(data) => {
			let data = Arc::clone(data);
			run_blocking(
				move || {
					let img = sd_images::format_image(&data)?;
					Ok(sd_images::to_webp_thumbnail(
						&img,
						settings.target_px,
						settings.quality,
					)?)
				},
				ThumbnailError::Panic,
			)
			.await?
		}

		MediaSource::VideoFile(path) => {
			let decoder = decoder.ok_or_else(|| ThumbnailError::NoDecoder(path.clone()))?;

			let frame = decoder.frame_at(path, VIDEO_FRAME_TIMESTAMP).await?;
			trace!("Decoded video frame");

			run_blocking(
				move || {
					Ok(sd_images::to_webp_thumbnail(
						&frame,
						settings.target_px,
						settings.quality,
					)?)
				},
				ThumbnailError::Panic,
			)
			.await?
		}
	};

	trace!(bytes = thumbnail.len(), "Generated thumbnail");

	Ok(thumbnail)
}
