use crate::{
	collaborators::{LibraryQuery, LibrarySnapshot, LoadedAsset},
	error::{AssetLoadError, LibraryFeedError, PipelineError},
	reconciler::{ChangedDescriptor, LibraryFeedReconciler},
	snapshot::{Candidate, CandidatesSnapshot},
	status::{InvalidTransition, PendingWork, StatusEvent},
	AssetDescriptor, AssetId, AssetOrigin, AssetSource, AttachmentStatus, Capture, MediaAsset,
	MediaKindsAllowed, MediaSource, PipelineConfig, Thumbnail,
};

use super::PipelineEvent;

use std::{collections::HashMap, iter};

use tracing::{debug, trace, warn};

/// Async work requested by the owner. `epoch` ties the result back to the entry incarnation
/// that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkOrder {
	pub(crate) id: AssetId,
	pub(crate) epoch: u64,
	pub(crate) job: Job,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Job {
	/// Size limit a fresh capture and extract its thumbnail.
	ProcessCapture(MediaSource),
	/// Materialize a library asset through the loader.
	Resolve(AssetDescriptor),
	Thumbnail(ThumbnailSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ThumbnailSource {
	Media(MediaSource),
	/// Library asset that must be loaded before extraction.
	Library(AssetDescriptor),
}

#[derive(Debug)]
pub(crate) struct WorkCompletion {
	pub(crate) id: AssetId,
	pub(crate) epoch: u64,
	pub(crate) result: WorkResult,
}

#[derive(Debug)]
pub(crate) enum WorkResult {
	CaptureProcessed {
		media: MediaSource,
		size_bytes: Option<u64>,
		exceeded_size_limit: bool,
		thumbnail: Thumbnail,
	},
	Resolved(Result<LoadedAsset, AssetLoadError>),
	ThumbnailExtracted {
		thumbnail: Thumbnail,
		/// Media loaded on the way, kept so a later selection doesn't load it again.
		loaded: Option<LoadedAsset>,
	},
}

/// What applying a completion did to the state.
#[derive(Debug, Default)]
pub(crate) struct Completed {
	pub(crate) changed: bool,
	pub(crate) event: Option<PipelineEvent>,
	pub(crate) follow_up: Option<WorkOrder>,
}

impl Completed {
	fn changed() -> Self {
		Self {
			changed: true,
			..Default::default()
		}
	}
}

#[derive(Debug)]
struct Entry {
	asset: MediaAsset,
	status: AttachmentStatus,
	epoch: u64,
	/// Renewed whenever the cached thumbnail is invalidated.
	thumbnail_epoch: u64,
	thumbnail_in_flight: bool,
}

impl Entry {
	fn settle(&mut self, event: StatusEvent) {
		match self.status.apply(event) {
			Ok(status) => {
				debug!(id = %self.asset.id, ?status, "Attachment settled");
				self.status = status;
			}
			Err(e) => warn!(?e, id = %self.asset.id, "Ignoring work completion;"),
		}
	}

	fn store_loaded(&mut self, LoadedAsset { media, size_bytes }: LoadedAsset, max_bytes: u64) {
		if let AssetSource::Library { loaded, .. } = &mut self.asset.source {
			*loaded = Some(media);
			self.asset.set_size(size_bytes, max_bytes);
		}
	}

	/// Media handed over by the picker, so selecting the asset doesn't load it again.
	fn adopt_picked(&mut self, media: MediaSource, max_bytes: u64) {
		let AssetSource::Library { loaded, .. } = &mut self.asset.source else {
			return;
		};
		if loaded.is_some() {
			return;
		}

		let size = match &media {
			MediaSource::ImageBytes(data) => u64::try_from(data.len()).ok(),
			MediaSource::VideoFile(_) => None,
		};
		*loaded = Some(media);

		if let Some(size) = size {
			self.asset.set_size(size, max_bytes);
		}
	}

	fn refresh(
		&mut self,
		ChangedDescriptor {
			descriptor,
			modified,
		}: ChangedDescriptor,
		thumbnail_epoch: u64,
		max_bytes: u64,
	) {
		let known_size = descriptor.size_bytes;
		// Media the user already picked stays what gets sent
		let drop_media = modified && self.status == AttachmentStatus::Unselected;

		if let AssetSource::Library {
			descriptor: current,
			loaded,
		} = &mut self.asset.source
		{
			*current = descriptor;
			if drop_media {
				*loaded = None;
			}
		}

		if drop_media {
			self.asset.size_bytes = None;
			self.asset.exceeded_size_limit = false;
		}

		if modified {
			self.asset.thumbnail = Thumbnail::Pending;
			self.thumbnail_epoch = thumbnail_epoch;
			self.thumbnail_in_flight = false;
		}

		if let (None, Some(size)) = (self.asset.size_bytes, known_size) {
			self.asset.set_size(size, max_bytes);
		}
	}

	fn order_thumbnail(&mut self) -> Option<WorkOrder> {
		let source = self
			.asset
			.media()
			.cloned()
			.map(ThumbnailSource::Media)
			.or_else(|| {
				self.asset
					.descriptor()
					.cloned()
					.map(ThumbnailSource::Library)
			})?;

		self.thumbnail_in_flight = true;

		Some(WorkOrder {
			id: self.asset.id.clone(),
			epoch: self.thumbnail_epoch,
			job: Job::Thumbnail(source),
		})
	}
}

fn pending_work(asset: &MediaAsset) -> Option<PendingWork> {
	match &asset.source {
		AssetSource::Library {
			descriptor,
			loaded: None,
		} => Some(if descriptor.is_cloud_only {
			PendingWork::Download
		} else {
			PendingWork::Load
		}),
		_ => None,
	}
}

fn busy(id: &AssetId, InvalidTransition { from, .. }: InvalidTransition) -> PipelineError {
	PipelineError::Busy {
		id: id.clone(),
		status: from,
	}
}

fn unknown(id: &AssetId) -> PipelineError {
	PipelineError::UnknownIdentifier(id.clone())
}

/// Every candidate, its status and the ordering of both segments. Only ever touched by the
/// owner task, so every method is synchronous.
#[derive(Debug)]
pub(crate) struct PipelineState {
	max_bytes: u64,
	kinds: MediaKindsAllowed,
	entries: HashMap<AssetId, Entry>,
	/// Newest first.
	captures: Vec<AssetId>,
	reconciler: LibraryFeedReconciler,
	last_epoch: u64,
	revision: u64,
}

impl PipelineState {
	pub(crate) fn new(config: &PipelineConfig) -> Self {
		Self {
			max_bytes: config.max_bytes_per_attachment,
			kinds: config.media_kinds_allowed,
			entries: HashMap::new(),
			captures: Vec::new(),
			reconciler: LibraryFeedReconciler::new(LibraryQuery::from(config)),
			last_epoch: 0,
			revision: 0,
		}
	}

	pub(crate) fn query(&self) -> LibraryQuery {
		self.reconciler.query()
	}

	fn next_epoch(&mut self) -> u64 {
		self.last_epoch += 1;
		self.last_epoch
	}

	fn insert(&mut self, asset: MediaAsset, status: AttachmentStatus, thumbnail_in_flight: bool) -> u64 {
		let epoch = self.next_epoch();
		let thumbnail_epoch = self.next_epoch();

		self.entries.insert(
			asset.id.clone(),
			Entry {
				asset,
				status,
				epoch,
				thumbnail_epoch,
				thumbnail_in_flight,
			},
		);

		epoch
	}

	/// Entry still matching the incarnation that ordered the work.
	fn live_entry(&mut self, id: &AssetId, epoch: u64) -> Option<&mut Entry> {
		let entry = self.entries.get_mut(id).filter(|entry| entry.epoch == epoch);
		if entry.is_none() {
			trace!(%id, epoch, "Discarding result of work ordered by a removed attachment");
		}
		entry
	}

	pub(crate) fn register_capture(
		&mut self,
		Capture {
			media,
			library_descriptor,
		}: Capture,
	) -> Result<(AssetId, Option<WorkOrder>), PipelineError> {
		let kind = media.kind();
		if !self.kinds.allows(kind) {
			return Err(PipelineError::KindNotAllowed(kind));
		}

		if let Some(id) = library_descriptor
			.as_ref()
			.map(|descriptor| &descriptor.id)
			.filter(|id| self.entries.contains_key(id))
			.cloned()
		{
			debug!(%id, "Picked asset is already a candidate, selecting it instead");

			let max_bytes = self.max_bytes;
			let status = self.entries.get_mut(&id).map(|entry| {
				entry.adopt_picked(media, max_bytes);
				entry.status
			});

			let work = match status {
				Some(AttachmentStatus::Unselected) => self.toggle(&id)?.1,
				_ => None,
			};

			return Ok((id, work));
		}

		let id = library_descriptor
			.as_ref()
			.map_or_else(AssetId::generate, |descriptor| descriptor.id.clone());

		let status = AttachmentStatus::Unselected
			.apply(StatusEvent::CaptureRegistered)
			.map_err(|e| busy(&id, e))?;

		let epoch = self.insert(
			MediaAsset::from_capture(id.clone(), media.clone(), library_descriptor),
			status,
			true,
		);
		self.captures.insert(0, id.clone());

		debug!(%id, ?kind, "Registered local capture");

		Ok((
			id.clone(),
			Some(WorkOrder {
				id,
				epoch,
				job: Job::ProcessCapture(media),
			}),
		))
	}

	pub(crate) fn toggle(
		&mut self,
		id: &AssetId,
	) -> Result<(AttachmentStatus, Option<WorkOrder>), PipelineError> {
		let entry = self.entries.get_mut(id).ok_or_else(|| unknown(id))?;

		let pending = if entry.status == AttachmentStatus::Unselected {
			pending_work(&entry.asset)
		} else {
			None
		};

		entry.status = entry
			.status
			.apply(StatusEvent::Toggle { pending })
			.map_err(|e| busy(id, e))?;

		debug!(%id, status = ?entry.status, "Toggled selection");

		let work = pending
			.and_then(|_| entry.asset.descriptor().cloned())
			.map(|descriptor| WorkOrder {
				id: id.clone(),
				epoch: entry.epoch,
				job: Job::Resolve(descriptor),
			});

		Ok((entry.status, work))
	}

	pub(crate) fn request_download(
		&mut self,
		id: &AssetId,
	) -> Result<(AttachmentStatus, WorkOrder), PipelineError> {
		let entry = self.entries.get_mut(id).ok_or_else(|| unknown(id))?;

		let AssetSource::Library { descriptor, .. } = &entry.asset.source else {
			return Err(PipelineError::NotALibraryAsset(id.clone()));
		};
		let descriptor = descriptor.clone();

		entry.status = entry
			.status
			.apply(StatusEvent::DownloadRequested)
			.map_err(|e| busy(id, e))?;

		debug!(%id, "Downloading original");

		Ok((
			entry.status,
			WorkOrder {
				id: id.clone(),
				epoch: entry.epoch,
				job: Job::Resolve(descriptor),
			},
		))
	}

	pub(crate) fn request_thumbnail(&mut self, id: &AssetId) -> Result<Option<WorkOrder>, PipelineError> {
		let entry = self.entries.get_mut(id).ok_or_else(|| unknown(id))?;

		if entry.thumbnail_in_flight || entry.asset.thumbnail.is_resolved() {
			trace!(%id, "Thumbnail cached or on its way");
			return Ok(None);
		}

		Ok(entry.order_thumbnail())
	}

	pub(crate) fn remove(&mut self, id: &AssetId) -> Result<(), PipelineError> {
		let entry = self.entries.remove(id).ok_or_else(|| unknown(id))?;

		match entry.asset.origin {
			AssetOrigin::Capture => self.captures.retain(|capture| capture != id),
			AssetOrigin::Library => {
				self.reconciler.forget(id);
			}
		}

		debug!(%id, status = ?entry.status, "Removed attachment");

		Ok(())
	}

	/// Applies a library snapshot, returning whether anything visible changed.
	pub(crate) fn apply_snapshot(&mut self, snapshot: LibrarySnapshot) -> bool {
		let entries = &self.entries;
		let diff = self.reconciler.reconcile(snapshot, |id| {
			entries
				.get(id)
				.is_some_and(|entry| entry.asset.origin == AssetOrigin::Capture)
		});

		if diff.is_empty() {
			return false;
		}

		for id in &diff.removed {
			if let Some(entry) = self.entries.remove(id) {
				debug!(%id, status = ?entry.status, "Library asset is gone, dropping it");
			}
		}

		for descriptor in diff.added {
			let asset = MediaAsset::from_library(descriptor, self.max_bytes);
			self.insert(asset, AttachmentStatus::Unselected, false);
		}

		for changed in diff.changed {
			let thumbnail_epoch = self.next_epoch();
			let max_bytes = self.max_bytes;
			if let Some(entry) = self.entries.get_mut(&changed.descriptor.id) {
				entry.refresh(changed, thumbnail_epoch, max_bytes);
			}
		}

		true
	}

	pub(crate) fn fetch_failed(&self, e: &LibraryFeedError) {
		self.reconciler.fetch_failed(e);
	}

	pub(crate) fn complete(
		&mut self,
		WorkCompletion { id, epoch, result }: WorkCompletion,
	) -> Completed {
		let max_bytes = self.max_bytes;

		match result {
			WorkResult::CaptureProcessed {
				media,
				size_bytes,
				exceeded_size_limit,
				thumbnail,
			} => {
				let Some(entry) = self.live_entry(&id, epoch) else {
					return Completed::default();
				};

				if let AssetSource::Captured { media: current, .. } = &mut entry.asset.source {
					*current = media;
				}
				entry.asset.size_bytes = size_bytes;
				entry.asset.exceeded_size_limit = exceeded_size_limit;
				entry.asset.thumbnail = thumbnail;
				entry.thumbnail_in_flight = false;
				entry.settle(StatusEvent::WorkSucceeded);

				Completed::changed()
			}

			WorkResult::Resolved(Ok(loaded)) => {
				let Some(entry) = self.live_entry(&id, epoch) else {
					return Completed::default();
				};

				entry.store_loaded(loaded, max_bytes);
				entry.settle(StatusEvent::WorkSucceeded);

				let follow_up = if entry.thumbnail_in_flight || entry.asset.thumbnail.is_resolved() {
					None
				} else {
					entry.order_thumbnail()
				};

				Completed {
					follow_up,
					..Completed::changed()
				}
			}

			WorkResult::Resolved(Err(e)) => {
				let Some(entry) = self.live_entry(&id, epoch) else {
					return Completed::default();
				};

				warn!(?e, %id, "Failed to load attachment;");
				entry.settle(StatusEvent::WorkFailed);

				Completed {
					event: Some(PipelineEvent::ProcessingFailed {
						id,
						reason: e.to_string(),
					}),
					..Completed::changed()
				}
			}

			WorkResult::ThumbnailExtracted { thumbnail, loaded } => {
				let Some(entry) = self
					.entries
					.get_mut(&id)
					.filter(|entry| entry.thumbnail_epoch == epoch)
				else {
					trace!(%id, epoch, "Discarding stale thumbnail");
					return Completed::default();
				};

				entry.asset.thumbnail = thumbnail;
				entry.thumbnail_in_flight = false;

				if let Some(loaded) = loaded {
					if entry.asset.media().is_none() {
						entry.store_loaded(loaded, max_bytes);
					}
				}

				Completed::changed()
			}
		}
	}

	fn ordered(&self) -> impl Iterator<Item = &Entry> + '_ {
		self.captures
			.iter()
			.chain(self.reconciler.library_order())
			.filter_map(|id| self.entries.get(id))
	}

	/// Builds the next snapshot to publish.
	pub(crate) fn snapshot(&mut self) -> CandidatesSnapshot {
		self.revision += 1;

		CandidatesSnapshot {
			revision: self.revision,
			candidates: iter::once(Candidate::PickerControl)
				.chain(self.ordered().map(|entry| Candidate::Asset(entry.asset.clone())))
				.collect(),
			statuses: self
				.entries
				.iter()
				.map(|(id, entry)| (id.clone(), entry.status))
				.collect(),
		}
	}

	pub(crate) fn selected(&self) -> Vec<MediaAsset> {
		self.ordered()
			.filter(|entry| entry.status.is_selected())
			.map(|entry| entry.asset.clone())
			.collect()
	}

	#[cfg(test)]
	fn status(&self, id: &AssetId) -> Option<AttachmentStatus> {
		self.entries.get(id).map(|entry| entry.status)
	}

	#[cfg(test)]
	fn asset(&self, id: &AssetId) -> Option<&MediaAsset> {
		self.entries.get(id).map(|entry| &entry.asset)
	}
}
