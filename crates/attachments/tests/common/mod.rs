#![allow(dead_code)]

use sd_attachments::{
	AssetDescriptor, AssetId, AssetLoadError, AssetLoader, AttachmentStatus, CandidatesSnapshot,
	DecodeError, LibraryFeed, LibraryFeedError, LibraryQuery, LibrarySnapshot, LoadedAsset,
	MediaDecoder, MediaKind, MediaSource,
};

use std::{
	collections::HashSet,
	io::Cursor,
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{sync::Semaphore, time::timeout};

pub const WAIT: Duration = Duration::from_secs(10);

/// Library feed driven by the test through the returned sender.
pub struct ChannelFeed {
	rx: chan::Receiver<Result<LibrarySnapshot, LibraryFeedError>>,
}

impl ChannelFeed {
	pub fn new() -> (Self, chan::Sender<Result<LibrarySnapshot, LibraryFeedError>>) {
		let (tx, rx) = chan::unbounded();
		(Self { rx }, tx)
	}
}

#[async_trait]
impl LibraryFeed for ChannelFeed {
	async fn next_snapshot(
		&mut self,
		_query: &LibraryQuery,
	) -> Option<Result<LibrarySnapshot, LibraryFeedError>> {
		self.rx.recv().await.ok()
	}
}

/// Loader handing out small PNGs, optionally waiting for the test to open its gate.
#[derive(Clone, Default)]
pub struct FakeLoader {
	gate: Option<Arc<Semaphore>>,
	failing: Arc<HashSet<AssetId>>,
	loads: Arc<AtomicUsize>,
}

impl FakeLoader {
	pub fn gated() -> (Self, Arc<Semaphore>) {
		let gate = Arc::new(Semaphore::new(0));
		(
			Self {
				gate: Some(Arc::clone(&gate)),
				..Default::default()
			},
			gate,
		)
	}

	pub fn failing_for(ids: &[&str]) -> Self {
		Self {
			failing: Arc::new(ids.iter().map(|id| AssetId::from(*id)).collect()),
			..Default::default()
		}
	}

	pub fn loads(&self) -> usize {
		self.loads.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl AssetLoader for FakeLoader {
	async fn load(&self, descriptor: &AssetDescriptor) -> Result<LoadedAsset, AssetLoadError> {
		if let Some(gate) = &self.gate {
			gate.acquire().await.unwrap().forget();
		}

		self.loads.fetch_add(1, Ordering::SeqCst);

		if self.failing.contains(&descriptor.id) {
			return Err(AssetLoadError::Unavailable {
				id: descriptor.id.clone(),
				reason: "storage offline".to_string(),
			});
		}

		let data = png(64, 48);
		Ok(LoadedAsset {
			size_bytes: u64::try_from(data.len()).unwrap(),
			media: MediaSource::ImageBytes(data.into()),
		})
	}
}

/// Decoder that answers with a plain frame, or fails, recording the requested timestamps.
#[derive(Clone, Default)]
pub struct ScriptedDecoder {
	fail: bool,
	gate: Option<Arc<Semaphore>>,
	pub requested: Arc<Mutex<Vec<Duration>>>,
}

impl ScriptedDecoder {
	pub fn failing() -> Self {
		Self {
			fail: true,
			..Default::default()
		}
	}

	pub fn gated() -> (Self, Arc<Semaphore>) {
		let gate = Arc::new(Semaphore::new(0));
		(
			Self {
				gate: Some(Arc::clone(&gate)),
				..Default::default()
			},
			gate,
		)
	}
}

#[async_trait]
impl MediaDecoder for ScriptedDecoder {
	async fn frame_at(&self, _video: &Path, timestamp: Duration) -> Result<DynamicImage, DecodeError> {
		self.requested.lock().unwrap().push(timestamp);

		if let Some(gate) = &self.gate {
			gate.acquire().await.unwrap().forget();
		}

		if self.fail {
			Err(DecodeError("moov atom not found".to_string()))
		} else {
			Ok(DynamicImage::ImageRgb8(RgbImage::new(320, 180)))
		}
	}
}

fn encode(img: &DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
	let mut out = Cursor::new(Vec::new());
	img.write_to(&mut out, format).unwrap();
	out.into_inner()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
	encode(
		&DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 90]))),
		ImageOutputFormat::Png,
	)
}

/// Uncompressed noise, about `3 * width * height` bytes.
pub fn noisy_bmp(width: u32, height: u32) -> Vec<u8> {
	let mut rng = StdRng::seed_from_u64(7);
	encode(
		&DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| Rgb(rng.gen()))),
		ImageOutputFormat::Bmp,
	)
}

pub fn library(ids: &[&str]) -> LibrarySnapshot {
	LibrarySnapshot::new(
		ids.iter()
			.map(|id| AssetDescriptor::new(*id, MediaKind::Image)),
	)
}

pub fn ids(snapshot: &CandidatesSnapshot) -> Vec<&str> {
	snapshot.ids().into_iter().map(AssetId::as_str).collect()
}

/// Waits until a published snapshot satisfies `condition`.
pub async fn wait_for(
	candidates: &mut (impl Stream<Item = Arc<CandidatesSnapshot>> + Unpin),
	condition: impl Fn(&CandidatesSnapshot) -> bool,
) -> Arc<CandidatesSnapshot> {
	timeout(WAIT, async {
		while let Some(snapshot) = candidates.next().await {
			if condition(snapshot.as_ref()) {
				return snapshot;
			}
		}
		panic!("candidates stream ended");
	})
	.await
	.expect("timed out waiting for candidates")
}

pub async fn wait_for_status(
	candidates: &mut (impl Stream<Item = Arc<CandidatesSnapshot>> + Unpin),
	id: &AssetId,
	status: AttachmentStatus,
) -> Arc<CandidatesSnapshot> {
	wait_for(candidates, |snapshot| snapshot.status(id) == Some(status)).await
}
