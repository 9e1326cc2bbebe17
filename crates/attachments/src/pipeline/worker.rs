use crate::{
	collaborators::{SharedDecoder, SharedLoader, SharedTranscoder},
	error::{AssetLoadError, CompressionError},
	size_limiter::{limit_image, limit_video, SizeLimit, SizeLimited},
	thumbnailer::{extract_thumbnail, ThumbnailSettings},
	AssetDescriptor, AssetId, MediaSource, Thumbnail,
};

use super::state::{Job, ThumbnailSource, WorkCompletion, WorkOrder, WorkResult};

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::future::Join;
use tokio::spawn;
use tracing::{error, instrument, trace, warn, Instrument};

/// Runs the async work ordered by the owner on independent tasks and sends each result back
/// through `completions_tx`.
#[derive(Clone)]
pub(crate) struct Worker {
	pub(crate) limit: SizeLimit,
	pub(crate) thumbnail: ThumbnailSettings,
	pub(crate) loader: SharedLoader,
	pub(crate) decoder: Option<SharedDecoder>,
	pub(crate) transcoder: Option<SharedTranscoder>,
	pub(crate) completions_tx: chan::Sender<WorkCompletion>,
}

impl Worker {
	pub(crate) fn dispatch(&self, WorkOrder { id, epoch, job }: WorkOrder) {
		let worker = self.clone();

		spawn(
			async move {
				let fallback = job.clone();

				let result = match AssertUnwindSafe(worker.run(&id, job)).catch_unwind().await {
					Ok(result) => result,
					Err(_) => {
						error!(%id, "Attachment work unexpectedly panicked");
						panicked(&id, fallback)
					}
				};

				if worker
					.completions_tx
					.send(WorkCompletion { id, epoch, result })
					.await
					.is_err()
				{
					trace!("Pipeline closed before the work completed");
				}
			}
			.in_current_span(),
		);
	}

	async fn run(&self, id: &AssetId, job: Job) -> WorkResult {
		match job {
			Job::ProcessCapture(media) => self.process_capture(id, media).await,
			Job::Resolve(descriptor) => WorkResult::Resolved(self.loader.load(&descriptor).await),
			Job::Thumbnail(ThumbnailSource::Media(media)) => WorkResult::ThumbnailExtracted {
				thumbnail: self.thumbnail(id, &media).await,
				loaded: None,
			},
			Job::Thumbnail(ThumbnailSource::Library(descriptor)) => {
				self.library_thumbnail(id, &descriptor).await
			}
		}
	}

	#[instrument(skip_all, fields(%id, kind = ?media.kind()))]
	async fn process_capture(&self, id: &AssetId, media: MediaSource) -> WorkResult {
		let (limited, thumbnail) = (self.limit_size(&media), self.thumbnail(id, &media))
			.join()
			.await;

		match limited {
			Ok(limited) => WorkResult::CaptureProcessed {
				exceeded_size_limit: limited.exceeded_size_limit(),
				size_bytes: Some(limited.size_bytes),
				media: limited.media,
				thumbnail,
			},
			Err(e) => {
				warn!(?e, "Failed to size limit capture, keeping the original;");
				WorkResult::CaptureProcessed {
					size_bytes: known_size(&media),
					media,
					exceeded_size_limit: true,
					thumbnail,
				}
			}
		}
	}

	async fn limit_size(&self, media: &MediaSource) -> Result<SizeLimited, CompressionError> {
		match media {
			MediaSource::ImageBytes(data) => limit_image(Arc::clone(data), self.limit).await,
			MediaSource::VideoFile(path) => {
				limit_video(path, self.limit, self.transcoder.as_deref()).await
			}
		}
	}

	async fn thumbnail(&self, id: &AssetId, media: &MediaSource) -> Thumbnail {
		match extract_thumbnail(id, media, self.decoder.as_deref(), self.thumbnail).await {
			Ok(thumbnail) => Thumbnail::Ready(thumbnail.into()),
			Err(e) => {
				warn!(?e, %id, "Failed to extract thumbnail;");
				Thumbnail::Unavailable
			}
		}
	}

	async fn library_thumbnail(&self, id: &AssetId, descriptor: &AssetDescriptor) -> WorkResult {
		match self.loader.load(descriptor).await {
			Ok(loaded) => WorkResult::ThumbnailExtracted {
				thumbnail: self.thumbnail(id, &loaded.media).await,
				loaded: Some(loaded),
			},
			Err(e) => {
				warn!(?e, %id, "Failed to load library asset for its thumbnail;");
				WorkResult::ThumbnailExtracted {
					thumbnail: Thumbnail::Unavailable,
					loaded: None,
				}
			}
		}
	}
}

fn known_size(media: &MediaSource) -> Option<u64> {
	match media {
		MediaSource::ImageBytes(data) => u64::try_from(data.len()).ok(),
		MediaSource::VideoFile(_) => None,
	}
}

/// Settles the entry as if the work failed, so it doesn't stay transient forever.
fn panicked(id: &AssetId, job: Job) -> WorkResult {
	match job {
		Job::ProcessCapture(media) => WorkResult::CaptureProcessed {
			size_bytes: known_size(&media),
			media,
			exceeded_size_limit: true,
			thumbnail: Thumbnail::Unavailable,
		},
		Job::Resolve(_) => WorkResult::Resolved(Err(AssetLoadError::Unavailable {
			id: id.clone(),
			reason: "asset loader panicked".to_string(),
		})),
		Job::Thumbnail(_) => WorkResult::ThumbnailExtracted {
			thumbnail: Thumbnail::Unavailable,
			loaded: None,
		},
	}
}
