use crate::{
	blocking::run_blocking, collaborators::VideoTranscoder, error::CompressionError,
	MediaSource, PipelineConfig, VideoCompression,
};

use sd_utils::error::FileIOError;

use std::{path::Path, sync::Arc};

use tokio::fs;
use tracing::{debug, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimit {
	pub max_bytes: u64,
	/// JPEG quality of the first attempt.
	pub initial_quality: u8,
	/// Lowest JPEG quality we are willing to go down to.
	pub minimum_quality: u8,
	pub quality_step: u8,
	pub video: VideoCompression,
}

impl From<&PipelineConfig> for SizeLimit {
	fn from(config: &PipelineConfig) -> Self {
		Self {
			max_bytes: config.max_bytes_per_attachment,
			initial_quality: config.photo_quality,
			minimum_quality: config.minimum_photo_quality,
			quality_step: config.quality_step,
			video: config.video_compression,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOutcome {
	/// The original already fit the budget.
	WithinBudget,
	/// Re-encoded as JPEG at the given quality.
	Compressed { quality: u8 },
	Transcoded,
	/// Nothing fit the budget, the original is kept.
	KeptOversized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeLimited {
	pub media: MediaSource,
	pub size_bytes: u64,
	pub outcome: LimitOutcome,
}

impl SizeLimited {
	#[must_use]
	pub const fn exceeded_size_limit(&self) -> bool {
		matches!(self.outcome, LimitOutcome::KeptOversized)
	}
}

fn byte_len(data: &[u8]) -> u64 {
	u64::try_from(data.len()).unwrap_or(u64::MAX)
}

/// Brings an encoded image under `limit.max_bytes` by re-encoding it as JPEG with decreasing
/// quality. Hitting the quality floor keeps the original bytes.
#[instrument(skip_all, fields(original_size = data.len(), max_bytes = limit.max_bytes))]
pub async fn limit_image(data: Arc<[u8]>, limit: SizeLimit) -> Result<SizeLimited, CompressionError> {
	let original_size = byte_len(&data);

	if original_size <= limit.max_bytes {
		trace!("Image already within budget");
		return Ok(SizeLimited {
			media: MediaSource::ImageBytes(data),
			size_bytes: original_size,
			outcome: LimitOutcome::WithinBudget,
		});
	}

	let compressed = run_blocking(
		{
			let data = Arc::clone(&data);
			move || compress_image(&data, limit)
		},
		CompressionError::Panic,
	)
	.await?;

	if let Some((quality, bytes)) = compressed {
		let size_bytes = byte_len(&bytes);
		debug!(quality, size_bytes, "Compressed image under budget");

		Ok(SizeLimited {
			media: MediaSource::ImageBytes(bytes.into()),
			size_bytes,
			outcome: LimitOutcome::Compressed { quality },
		})
	} else {
		debug!("Quality floor reached, keeping original image");

		Ok(SizeLimited {
			media: MediaSource::ImageBytes(data),
			size_bytes: original_size,
			outcome: LimitOutcome::KeptOversized,
		})
	}
}

fn compress_image(data: &[u8], limit: SizeLimit) -> Result<Option<(u8, Vec<u8>)>, CompressionError> {
	let img = sd_images::format_image(data)?;

	let mut quality = limit.initial_quality;
	loop {
		let encoded = sd_images::to_jpeg(&img, quality)?;
		trace!(quality, size = encoded.len(), "Encoded attempt");

		if byte_len(&encoded) <= limit.max_bytes {
			return Ok(Some((quality, encoded)));
		}

		if quality <= limit.minimum_quality {
			return Ok(None);
		}

		quality = quality
			.saturating_sub(limit.quality_step)
			.max(limit.minimum_quality);
	}
}

async fn file_size(path: &Path, context: &'static str) -> Result<u64, FileIOError> {
	fs::metadata(path)
		.await
		.map(|metadata| metadata.len())
		.map_err(|e| FileIOError::from((path, e, context)))
}

/// Checks a captured video against `limit.max_bytes`, transcoding it when the policy asks for
/// it. A transcode that still doesn't fit keeps the original file.
#[instrument(skip_all, fields(path = %path.display(), max_bytes = limit.max_bytes))]
pub async fn limit_video(
	path: &Path,
	limit: SizeLimit,
	transcoder: Option<&dyn VideoTranscoder>,
) -> Result<SizeLimited, CompressionError> {
	let original_size = file_size(path, "measuring captured video").await?;

	let kept = |outcome| SizeLimited {
		media: MediaSource::VideoFile(path.to_path_buf()),
		size_bytes: original_size,
		outcome,
	};

	if original_size <= limit.max_bytes {
		trace!("Video already within budget");
		return Ok(kept(LimitOutcome::WithinBudget));
	}

	match limit.video {
		VideoCompression::KeepOriginal => Ok(kept(LimitOutcome::KeptOversized)),

		VideoCompression::Transcode => {
			let transcoder = transcoder.ok_or(CompressionError::NoTranscoder)?;

			let transcoded = transcoder.transcode(path, limit.max_bytes).await?;
			let size_bytes = file_size(&transcoded, "measuring transcoded video").await?;

			if size_bytes <= limit.max_bytes {
				debug!(size_bytes, "Transcoded video under budget");
				Ok(SizeLimited {
					media: MediaSource::VideoFile(transcoded),
					size_bytes,
					outcome: LimitOutcome::Transcoded,
				})
			} else {
				warn!(
					size_bytes,
					transcoded_path = %transcoded.display(),
					"Transcoded video still above budget, keeping original;"
				);
				Ok(kept(LimitOutcome::KeptOversized))
			}
		}
	}
}
