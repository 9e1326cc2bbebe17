use sd_attachments::{
	AssetDescriptor, AssetId, AttachmentPipeline, AttachmentStatus, Candidate, Capture,
	ConfigError, LibraryFeedError, MediaKind, MediaKindsAllowed, MediaSource, PipelineConfig,
	PipelineError, PipelineEvent, Thumbnail, VideoCompression,
};

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use futures_concurrency::future::Join;
use tempfile::tempdir;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

mod common;

use common::{
	ids, library, noisy_bmp, png, wait_for, wait_for_status, ChannelFeed, FakeLoader,
	ScriptedDecoder, WAIT,
};

const MIB: u64 = 1024 * 1024;

fn config() -> PipelineConfig {
	PipelineConfig {
		max_bytes_per_attachment: MIB,
		..Default::default()
	}
}

#[tokio::test]
#[traced_test]
async fn empty_pipeline_only_shows_the_picker() {
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.spawn()
		.unwrap();

	let latest = pipeline.latest();
	assert_eq!(latest.candidates, vec![Candidate::PickerControl]);
	assert!(latest.statuses.is_empty());
	assert!(pipeline.selected_attachments().await.unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn large_capture_is_compressed_then_selected() {
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	// ~2MiB of noise against a 1MiB budget
	let original = noisy_bmp(820, 820);
	assert!(original.len() > 2_000_000);

	let id = pipeline
		.select_local_capture(Capture::image(original.clone()))
		.await
		.unwrap();

	let snapshot = wait_for_status(&mut candidates, &id, AttachmentStatus::Selected).await;
	let asset = snapshot.asset(&id).unwrap();

	assert!(matches!(asset.thumbnail, Thumbnail::Ready(_)));
	if asset.exceeded_size_limit {
		assert_eq!(
			asset.media(),
			Some(&MediaSource::ImageBytes(original.into()))
		);
	} else {
		assert!(asset.size_bytes.unwrap() <= MIB);
		assert!(matches!(
			asset.media(),
			Some(MediaSource::ImageBytes(data)) if image::guess_format(data).unwrap() == image::ImageFormat::Jpeg
		));
	}

	let selected = pipeline.selected_attachments().await.unwrap();
	assert_eq!(selected.len(), 1);
	assert_eq!(selected[0].id, id);
}

#[tokio::test]
#[traced_test]
async fn observers_see_every_status_of_a_capture() {
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	let id = pipeline
		.select_local_capture(Capture::image(png(8, 8)))
		.await
		.unwrap();

	// Let processing finish before the observer catches up
	sleep(Duration::from_millis(300)).await;

	let mut statuses = Vec::new();
	while let Ok(Some(snapshot)) = timeout(Duration::from_millis(100), candidates.next()).await {
		statuses.push(snapshot.status(&id));
	}

	assert_eq!(
		statuses,
		vec![
			None,
			Some(AttachmentStatus::Compressing),
			Some(AttachmentStatus::Selected)
		]
	);
}

#[tokio::test]
#[traced_test]
async fn capture_is_published_before_its_processing_finishes() {
	let dir = tempdir().unwrap();
	let video = dir.path().join("clip.mov");
	tokio::fs::write(&video, b"not much of a video").await.unwrap();

	let (decoder, gate) = ScriptedDecoder::gated();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_media_decoder(decoder)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	let id = pipeline.select_local_capture(Capture::video(&video)).await.unwrap();

	let latest = pipeline.latest();
	assert_eq!(latest.status(&id), Some(AttachmentStatus::Compressing));
	assert_eq!(latest.asset(&id).unwrap().thumbnail, Thumbnail::Pending);
	assert_eq!(
		pipeline.toggle_selection(&id).await,
		Err(PipelineError::Busy {
			id: id.clone(),
			status: AttachmentStatus::Compressing
		})
	);

	gate.add_permits(1);

	let snapshot = wait_for_status(&mut candidates, &id, AttachmentStatus::Selected).await;
	let asset = snapshot.asset(&id).unwrap();
	assert!(matches!(asset.thumbnail, Thumbnail::Ready(_)));
	assert_eq!(asset.size_bytes, Some(19));
	assert!(!asset.exceeded_size_limit);
}

#[tokio::test]
#[traced_test]
async fn vanished_library_asset_leaves_the_selection() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["a", "b", "c"]))).await.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a", "b", "c"]).await;

	let b = AssetId::from("b");
	assert_eq!(
		pipeline.toggle_selection(&b).await.unwrap(),
		AttachmentStatus::Loading
	);
	wait_for_status(&mut candidates, &b, AttachmentStatus::Selected).await;

	library_tx.send(Ok(library(&["a", "c"]))).await.unwrap();
	let snapshot = wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a", "c"]).await;

	assert_eq!(snapshot.status(&b), None);
	assert!(snapshot.selected().is_empty());
	assert!(pipeline.selected_attachments().await.unwrap().is_empty());
	assert_eq!(
		pipeline.toggle_selection(&b).await,
		Err(PipelineError::UnknownIdentifier(b))
	);
}

#[tokio::test]
#[traced_test]
async fn rapid_toggles_while_loading_are_ignored() {
	let (feed, library_tx) = ChannelFeed::new();
	let (loader, gate) = FakeLoader::gated();
	let pipeline = AttachmentPipeline::builder(config(), loader.clone())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["a"]))).await.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a"]).await;

	let a = AssetId::from("a");
	let (first, second) = (pipeline.toggle_selection(&a), pipeline.toggle_selection(&a))
		.join()
		.await;

	let mut outcomes = [first, second];
	outcomes.sort_by_key(Result::is_err);
	assert_eq!(outcomes[0], Ok(AttachmentStatus::Loading));
	assert_eq!(
		outcomes[1],
		Err(PipelineError::Busy {
			id: a.clone(),
			status: AttachmentStatus::Loading
		})
	);
	assert_eq!(pipeline.latest().status(&a), Some(AttachmentStatus::Loading));

	gate.add_permits(1);
	wait_for_status(&mut candidates, &a, AttachmentStatus::Selected).await;

	assert_eq!(loader.loads(), 1);
	assert_eq!(pipeline.selected_attachments().await.unwrap().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn undecodable_video_still_gets_selected() {
	let dir = tempdir().unwrap();
	let video = dir.path().join("empty.mp4");
	tokio::fs::write(&video, b"").await.unwrap();

	let decoder = ScriptedDecoder::failing();
	let requested = Arc::clone(&decoder.requested);

	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_media_decoder(decoder)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	let id = pipeline.select_local_capture(Capture::video(&video)).await.unwrap();

	let snapshot = wait_for_status(&mut candidates, &id, AttachmentStatus::Selected).await;
	let asset = snapshot.asset(&id).unwrap();

	assert_eq!(asset.kind, MediaKind::Video);
	assert_eq!(asset.thumbnail, Thumbnail::Unavailable);
	assert_eq!(asset.media(), Some(&MediaSource::VideoFile(video)));
	assert_eq!(*requested.lock().unwrap(), vec![Duration::ZERO]);
}

#[tokio::test]
#[traced_test]
async fn removal_discards_in_flight_processing() {
	let dir = tempdir().unwrap();
	let video = dir.path().join("clip.mov");
	tokio::fs::write(&video, b"frames").await.unwrap();

	let (decoder, gate) = ScriptedDecoder::gated();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_media_decoder(decoder)
		.spawn()
		.unwrap();

	let removed = pipeline.select_local_capture(Capture::video(&video)).await.unwrap();
	pipeline.remove(&removed).await.unwrap();
	assert_eq!(
		pipeline.remove(&removed).await,
		Err(PipelineError::UnknownIdentifier(removed.clone()))
	);

	// A second capture going through the same decoder tells us the first one settled too
	let kept = pipeline.select_local_capture(Capture::video(&video)).await.unwrap();
	gate.add_permits(2);

	let mut candidates = pipeline.observe_candidates();
	let snapshot = wait_for_status(&mut candidates, &kept, AttachmentStatus::Selected).await;
	sleep(Duration::from_millis(50)).await;

	assert_eq!(snapshot.status(&removed), None);
	let latest = pipeline.latest();
	assert_eq!(latest.status(&removed), None);
	assert_eq!(ids(&latest), vec![kept.as_str()]);
}

#[tokio::test]
#[traced_test]
async fn observers_share_the_same_monotonic_revisions() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_library_feed(feed)
		.spawn()
		.unwrap();

	let observe = |pipeline: &AttachmentPipeline| {
		let mut candidates = pipeline.observe_candidates();
		async move {
			let mut revisions = Vec::new();
			while let Some(snapshot) = candidates.next().await {
				revisions.push(snapshot.revision);
				if ids(&snapshot) == ["c", "b", "a"] {
					return (revisions, snapshot);
				}
			}
			unreachable!("pipeline is still running");
		}
	};

	let first = tokio::spawn(observe(&pipeline));
	let second = tokio::spawn(observe(&pipeline));

	for snapshot in [library(&["a"]), library(&["b", "a"]), library(&["c", "b", "a"])] {
		library_tx.send(Ok(snapshot)).await.unwrap();
	}

	let ((first_revisions, first_last), (second_revisions, second_last)) =
		timeout(WAIT, async { (first.await.unwrap(), second.await.unwrap()) })
			.await
			.unwrap();

	// Every revision after the first one, none skipped
	assert!(first_revisions.windows(2).all(|pair| pair[0] + 1 == pair[1]));
	assert!(second_revisions.windows(2).all(|pair| pair[0] + 1 == pair[1]));
	assert_eq!(first_last, second_last);

	// A late observer starts from the current state
	let late = pipeline.observe_candidates().next().await.unwrap();
	assert_eq!(late, first_last);
}

#[tokio::test]
#[traced_test]
async fn failed_fetch_keeps_the_last_known_library() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut events = pipeline.subscribe_events();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["a", "b"]))).await.unwrap();
	let before = wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a", "b"]).await;

	library_tx
		.send(Err(LibraryFeedError::Fetch("photo library busy".to_string())))
		.await
		.unwrap();

	let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
	assert!(matches!(event, PipelineEvent::LibraryFetchFailed { .. }));
	assert_eq!(pipeline.latest().candidates, before.candidates);

	// The feed keeps going after a failure
	library_tx.send(Ok(library(&["z", "a", "b"]))).await.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["z", "a", "b"]).await;
}

#[tokio::test]
#[traced_test]
async fn new_library_assets_keep_the_existing_order() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["a", "b", "c"]))).await.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a", "b", "c"]).await;

	let capture = pipeline
		.select_local_capture(Capture::image(png(8, 8)))
		.await
		.unwrap();

	// Library reordering is ignored, the new one lands before its successor
	library_tx.send(Ok(library(&["c", "n", "b", "a"]))).await.unwrap();
	let snapshot = wait_for(&mut candidates, |snapshot| snapshot.ids().len() == 5).await;

	assert_eq!(ids(&snapshot), vec![capture.as_str(), "a", "n", "b", "c"]);
	assert_eq!(snapshot.candidates[0], Candidate::PickerControl);
}

#[tokio::test]
#[traced_test]
async fn media_kinds_are_filtered() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(
		PipelineConfig {
			media_kinds_allowed: MediaKindsAllowed::Image,
			..config()
		},
		FakeLoader::default(),
	)
	.with_library_feed(feed)
	.spawn()
	.unwrap();
	let mut candidates = pipeline.observe_candidates();

	library_tx
		.send(Ok(sd_attachments::LibrarySnapshot::new([
			AssetDescriptor::new("video", MediaKind::Video),
			AssetDescriptor::new("photo", MediaKind::Image),
		])))
		.await
		.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["photo"]).await;

	assert_eq!(
		pipeline
			.select_local_capture(Capture::video("/tmp/clip.mov"))
			.await,
		Err(PipelineError::KindNotAllowed(MediaKind::Video))
	);
	assert_eq!(ids(&pipeline.latest()), vec!["photo"]);
}

#[tokio::test]
#[traced_test]
async fn library_thumbnails_are_loaded_lazily_once() {
	let (feed, library_tx) = ChannelFeed::new();
	let loader = FakeLoader::default();
	let pipeline = AttachmentPipeline::builder(config(), loader.clone())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["a"]))).await.unwrap();
	let snapshot = wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a"]).await;
	let a = AssetId::from("a");
	assert_eq!(snapshot.asset(&a).unwrap().thumbnail, Thumbnail::Pending);

	pipeline.request_thumbnail(&a).await.unwrap();
	pipeline.request_thumbnail(&a).await.unwrap();

	wait_for(&mut candidates, |snapshot| {
		matches!(
			snapshot.asset(&a).map(|asset| &asset.thumbnail),
			Some(Thumbnail::Ready(_))
		)
	})
	.await;

	pipeline.request_thumbnail(&a).await.unwrap();
	// Media loaded for the thumbnail is reused by the selection
	assert_eq!(
		pipeline.toggle_selection(&a).await.unwrap(),
		AttachmentStatus::Selected
	);
	assert_eq!(loader.loads(), 1);

	assert_eq!(
		pipeline.request_thumbnail(&"ghost".into()).await,
		Err(PipelineError::UnknownIdentifier("ghost".into()))
	);
}

#[tokio::test]
#[traced_test]
async fn cloud_only_assets_are_downloaded_on_selection() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	let mut descriptor = AssetDescriptor::new("icloud", MediaKind::Image);
	descriptor.is_cloud_only = true;
	library_tx
		.send(Ok(sd_attachments::LibrarySnapshot::new([descriptor])))
		.await
		.unwrap();

	let id = AssetId::from("icloud");
	wait_for(&mut candidates, |snapshot| snapshot.asset(&id).is_some()).await;

	assert_eq!(
		pipeline.toggle_selection(&id).await.unwrap(),
		AttachmentStatus::Downloading
	);
	wait_for_status(&mut candidates, &id, AttachmentStatus::Selected).await;

	// Forced re-download of an already selected asset
	assert_eq!(
		pipeline.request_download(&id).await.unwrap(),
		AttachmentStatus::Downloading
	);
	wait_for_status(&mut candidates, &id, AttachmentStatus::Selected).await;

	let capture = pipeline
		.select_local_capture(Capture::image(png(4, 4)))
		.await
		.unwrap();
	assert_eq!(
		pipeline.request_download(&capture).await,
		Err(PipelineError::NotALibraryAsset(capture))
	);
}

#[tokio::test]
#[traced_test]
async fn failed_load_is_reported_and_unselects() {
	let (feed, library_tx) = ChannelFeed::new();
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::failing_for(&["broken"]))
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut events = pipeline.subscribe_events();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["broken", "fine"]))).await.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["broken", "fine"]).await;

	let broken = AssetId::from("broken");
	let fine = AssetId::from("fine");
	pipeline.toggle_selection(&broken).await.unwrap();
	pipeline.toggle_selection(&fine).await.unwrap();

	let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
	assert!(matches!(event, PipelineEvent::ProcessingFailed { id, .. } if id == broken));

	let snapshot = wait_for(&mut candidates, |snapshot| {
		snapshot.status(&broken) == Some(AttachmentStatus::Unselected)
			&& snapshot.status(&fine) == Some(AttachmentStatus::Selected)
	})
	.await;
	assert_eq!(snapshot.selected().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn picked_library_asset_is_not_duplicated() {
	let (feed, library_tx) = ChannelFeed::new();
	let loader = FakeLoader::default();
	let pipeline = AttachmentPipeline::builder(config(), loader.clone())
		.with_library_feed(feed)
		.spawn()
		.unwrap();
	let mut candidates = pipeline.observe_candidates();

	library_tx.send(Ok(library(&["a", "b"]))).await.unwrap();
	wait_for(&mut candidates, |snapshot| ids(snapshot) == ["a", "b"]).await;

	let id = pipeline
		.select_local_capture(
			Capture::image(png(8, 8)).picked_from(AssetDescriptor::new("b", MediaKind::Image)),
		)
		.await
		.unwrap();
	assert_eq!(id, AssetId::from("b"));

	let snapshot = wait_for_status(&mut candidates, &id, AttachmentStatus::Selected).await;
	assert_eq!(ids(&snapshot), vec!["a", "b"]);

	// The picker already handed over the media
	assert_eq!(loader.loads(), 0);
	assert_eq!(
		snapshot.asset(&id).unwrap().media(),
		Some(&MediaSource::ImageBytes(png(8, 8).into()))
	);
}

#[tokio::test]
#[traced_test]
async fn shutdown_closes_every_handle() {
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.spawn()
		.unwrap();
	let other = pipeline.clone();

	pipeline.shutdown().await;

	assert_eq!(
		other.toggle_selection(&"a".into()).await,
		Err(PipelineError::Closed)
	);
	assert_eq!(
		other.select_local_capture(Capture::image(png(2, 2))).await,
		Err(PipelineError::Closed)
	);
	assert!(matches!(
		other.selected_attachments().await,
		Err(PipelineError::Closed)
	));

	// Shutting down twice is fine
	other.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn requests_queued_behind_shutdown_resolve_as_closed() {
	let pipeline = AttachmentPipeline::builder(config(), FakeLoader::default())
		.spawn()
		.unwrap();
	let other = pipeline.clone();

	let ((), toggled, selected) = timeout(
		WAIT,
		(
			pipeline.shutdown(),
			other.toggle_selection(&"a".into()),
			other.selected_attachments(),
		)
			.join(),
	)
	.await
	.expect("requests racing the shutdown never resolved");

	assert!(matches!(
		toggled,
		Err(PipelineError::Closed | PipelineError::UnknownIdentifier(_))
	));
	assert!(matches!(selected, Ok(_) | Err(PipelineError::Closed)));
}

#[tokio::test]
async fn invalid_configuration_is_rejected_before_spawning() {
	assert!(matches!(
		AttachmentPipeline::builder(
			PipelineConfig {
				max_bytes_per_attachment: 0,
				..Default::default()
			},
			FakeLoader::default(),
		)
		.spawn(),
		Err(ConfigError::NonPositiveSizeLimit)
	));

	assert!(matches!(
		AttachmentPipeline::builder(
			PipelineConfig {
				video_compression: VideoCompression::Transcode,
				..Default::default()
			},
			FakeLoader::default(),
		)
		.spawn(),
		Err(ConfigError::MissingTranscoder)
	));
}
