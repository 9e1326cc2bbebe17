use crate::{
	collaborators::{
		LibraryFeed, LibraryQuery, LibrarySnapshot, SharedDecoder, SharedLoader, SharedTranscoder,
	},
	error::{ConfigError, LibraryFeedError, PipelineError},
	size_limiter::SizeLimit,
	snapshot::CandidatesSnapshot,
	thumbnailer::ThumbnailSettings,
	AssetId, AssetLoader, AttachmentStatus, Capture, MediaAsset, MediaDecoder, PipelineConfig,
	VideoCompression, VideoTranscoder,
};

use std::{pin::pin, sync::Arc};

use async_channel as chan;
use futures::{
	future::ready,
	stream::{self, Stream},
	StreamExt,
};
use futures_concurrency::stream::Merge;
use tokio::{
	spawn,
	sync::{broadcast, oneshot, watch},
	task::JoinHandle,
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, instrument, trace, warn, Instrument};

mod state;
mod worker;

use state::{Completed, PipelineState, WorkCompletion, WorkOrder};
use worker::Worker;

const EVENTS_CAPACITY: usize = 64;
const CANDIDATES_CAPACITY: usize = 256;

/// Recoverable failures, reported without affecting any other candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
	/// Async work for an attachment failed and it went back to `Unselected`.
	ProcessingFailed { id: AssetId, reason: String },
	/// The library feed failed, the last known library state is kept.
	LibraryFetchFailed { reason: String },
}

#[derive(Debug)]
enum Command {
	SelectLocalCapture {
		capture: Capture,
		reply: oneshot::Sender<Result<AssetId, PipelineError>>,
	},
	ToggleSelection {
		id: AssetId,
		reply: oneshot::Sender<Result<AttachmentStatus, PipelineError>>,
	},
	Remove {
		id: AssetId,
		reply: oneshot::Sender<Result<(), PipelineError>>,
	},
	RequestThumbnail {
		id: AssetId,
		reply: oneshot::Sender<Result<(), PipelineError>>,
	},
	RequestDownload {
		id: AssetId,
		reply: oneshot::Sender<Result<AttachmentStatus, PipelineError>>,
	},
	SelectedAttachments {
		reply: oneshot::Sender<Vec<MediaAsset>>,
	},
	Shutdown {
		ack: oneshot::Sender<()>,
	},
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
	if reply.send(value).is_err() {
		trace!("Caller went away before receiving the reply");
	}
}

pub struct AttachmentPipelineBuilder {
	config: PipelineConfig,
	loader: SharedLoader,
	decoder: Option<SharedDecoder>,
	transcoder: Option<SharedTranscoder>,
	feed: Option<Box<dyn LibraryFeed>>,
}

impl AttachmentPipelineBuilder {
	#[must_use]
	pub fn with_library_feed(mut self, feed: impl LibraryFeed) -> Self {
		self.feed = Some(Box::new(feed));
		self
	}

	/// Needed to preview captured videos, without it they get a placeholder thumbnail.
	#[must_use]
	pub fn with_media_decoder(mut self, decoder: impl MediaDecoder) -> Self {
		self.decoder = Some(Arc::new(decoder));
		self
	}

	#[must_use]
	pub fn with_video_transcoder(mut self, transcoder: impl VideoTranscoder) -> Self {
		self.transcoder = Some(Arc::new(transcoder));
		self
	}

	/// Validates the configuration and starts the pipeline tasks.
	///
	/// Must be called from within a tokio runtime.
	pub fn spawn(self) -> Result<AttachmentPipeline, ConfigError> {
		let Self {
			config,
			loader,
			decoder,
			transcoder,
			feed,
		} = self;

		config.validate()?;

		if matches!(config.video_compression, VideoCompression::Transcode) && transcoder.is_none() {
			return Err(ConfigError::MissingTranscoder);
		}

		let (commands_tx, commands_rx) = chan::unbounded();
		// Snapshots are complete views, the feed has no reason to run ahead of us
		let (snapshots_tx, snapshots_rx) = chan::bounded(1);
		let (completions_tx, completions_rx) = chan::unbounded();
		let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);

		let mut state = PipelineState::new(&config);
		let (candidates_tx, candidates_rx) = watch::channel(Arc::new(state.snapshot()));
		let (updates_tx, _) = broadcast::channel(CANDIDATES_CAPACITY);

		let feed_handle = feed.map(|feed| spawn_library_feed(feed, state.query(), snapshots_tx));

		let owner = Owner {
			state,
			worker: Worker {
				limit: SizeLimit::from(&config),
				thumbnail: ThumbnailSettings::from(&config),
				loader,
				decoder,
				transcoder,
				completions_tx,
			},
			candidates_tx,
			updates_tx: updates_tx.clone(),
			events_tx: events_tx.clone(),
		};

		spawn(owner.run(commands_rx, snapshots_rx, completions_rx, feed_handle).in_current_span());

		debug!(?config, "Attachment pipeline started");

		Ok(AttachmentPipeline {
			commands_tx,
			candidates_rx,
			updates_tx,
			events_tx,
		})
	}
}

fn spawn_library_feed(
	mut feed: Box<dyn LibraryFeed>,
	query: LibraryQuery,
	snapshots_tx: chan::Sender<Result<LibrarySnapshot, LibraryFeedError>>,
) -> JoinHandle<()> {
	spawn(
		async move {
			while let Some(res) = feed.next_snapshot(&query).await {
				if snapshots_tx.send(res).await.is_err() {
					trace!("Attachment pipeline closed, stopping library feed");
					return;
				}
			}

			debug!("Library feed finished");
		}
		.in_current_span(),
	)
}

/// Cheap to clone handle to a running attachment pipeline.
///
/// Every request goes through a single serialized queue, so operations are applied in the order
/// they were issued. Results of the async work they start show up in
/// [`observe_candidates`](Self::observe_candidates).
#[derive(Debug, Clone)]
pub struct AttachmentPipeline {
	commands_tx: chan::Sender<Command>,
	candidates_rx: watch::Receiver<Arc<CandidatesSnapshot>>,
	updates_tx: broadcast::Sender<Arc<CandidatesSnapshot>>,
	events_tx: broadcast::Sender<PipelineEvent>,
}

impl AttachmentPipeline {
	#[must_use]
	pub fn builder(config: PipelineConfig, loader: impl AssetLoader) -> AttachmentPipelineBuilder {
		AttachmentPipelineBuilder {
			config,
			loader: Arc::new(loader),
			decoder: None,
			transcoder: None,
			feed: None,
		}
	}

	async fn request<T>(
		&self,
		command: impl FnOnce(oneshot::Sender<T>) -> Command,
	) -> Result<T, PipelineError> {
		let (reply, rx) = oneshot::channel();

		self.commands_tx
			.send(command(reply))
			.await
			.map_err(|_| PipelineError::Closed)?;

		rx.await.map_err(|_| PipelineError::Closed)
	}

	/// Stream of candidate snapshots, starting with the current one and then yielding every
	/// revision published afterwards, in order.
	///
	/// A consumer lagging more than a few hundred revisions behind skips the ones it missed.
	pub fn observe_candidates(&self) -> impl Stream<Item = Arc<CandidatesSnapshot>> + Send + Unpin {
		// Subscribed before reading the current snapshot, so no revision falls in between
		let updates = BroadcastStream::new(self.updates_tx.subscribe());
		let current = self.latest();
		let seen = current.revision;

		stream::once(ready(current))
			.chain(updates.filter_map(move |res| {
				ready(match res {
					Ok(snapshot) if snapshot.revision > seen => Some(snapshot),
					Ok(_) => None,
					Err(BroadcastStreamRecvError::Lagged(skipped)) => {
						warn!(skipped, "Candidates observer is lagging behind, skipping revisions");
						None
					}
				})
			}))
			.boxed()
	}

	#[must_use]
	pub fn latest(&self) -> Arc<CandidatesSnapshot> {
		Arc::clone(&self.candidates_rx.borrow())
	}

	#[must_use]
	pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
		self.events_tx.subscribe()
	}

	/// Registers a captured image or video. It shows up as `Compressing` right away and becomes
	/// `Selected` once size limiting and thumbnail extraction settle.
	pub async fn select_local_capture(&self, capture: Capture) -> Result<AssetId, PipelineError> {
		self.request(|reply| Command::SelectLocalCapture { capture, reply })
			.await?
	}

	pub async fn toggle_selection(&self, id: &AssetId) -> Result<AttachmentStatus, PipelineError> {
		self.request(|reply| Command::ToggleSelection {
			id: id.clone(),
			reply,
		})
		.await?
	}

	/// Removes a candidate whatever its status, results of its in flight work are dropped.
	pub async fn remove(&self, id: &AssetId) -> Result<(), PipelineError> {
		self.request(|reply| Command::Remove {
			id: id.clone(),
			reply,
		})
		.await?
	}

	/// Selected attachments, in candidate list order.
	pub async fn selected_attachments(&self) -> Result<Vec<MediaAsset>, PipelineError> {
		self.request(|reply| Command::SelectedAttachments { reply })
			.await
	}

	/// Starts extracting the thumbnail of `id`, unless it is cached or on its way.
	pub async fn request_thumbnail(&self, id: &AssetId) -> Result<(), PipelineError> {
		self.request(|reply| Command::RequestThumbnail {
			id: id.clone(),
			reply,
		})
		.await?
	}

	/// Fetches the original of a library asset again, selecting it once downloaded.
	pub async fn request_download(&self, id: &AssetId) -> Result<AttachmentStatus, PipelineError> {
		self.request(|reply| Command::RequestDownload {
			id: id.clone(),
			reply,
		})
		.await?
	}

	/// Stops the pipeline and its library feed. Every handle gets [`PipelineError::Closed`]
	/// afterwards.
	pub async fn shutdown(&self) {
		if self.request(|ack| Command::Shutdown { ack }).await.is_err() {
			trace!("Attachment pipeline already closed");
		}
	}
}

struct Owner {
	state: PipelineState,
	worker: Worker,
	candidates_tx: watch::Sender<Arc<CandidatesSnapshot>>,
	updates_tx: broadcast::Sender<Arc<CandidatesSnapshot>>,
	events_tx: broadcast::Sender<PipelineEvent>,
}

impl Owner {
	#[instrument(name = "attachment_pipeline", skip_all)]
	async fn run(
		mut self,
		commands_rx: chan::Receiver<Command>,
		snapshots_rx: chan::Receiver<Result<LibrarySnapshot, LibraryFeedError>>,
		completions_rx: chan::Receiver<WorkCompletion>,
		feed_handle: Option<JoinHandle<()>>,
	) {
		enum StreamMessage {
			Command(Command),
			Snapshot(Result<LibrarySnapshot, LibraryFeedError>),
			WorkDone(WorkCompletion),
			Stop,
		}

		let pending_commands = commands_rx.clone();

		let mut msg_stream = pin!((
			commands_rx
				.map(StreamMessage::Command)
				// Every handle is gone
				.chain(stream::once(async { StreamMessage::Stop })),
			snapshots_rx.map(StreamMessage::Snapshot),
			completions_rx.map(StreamMessage::WorkDone),
		)
			.merge());

		let mut shutdown_ack = None;

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::Command(Command::Shutdown { ack }) => {
					shutdown_ack = Some(ack);
					break;
				}

				StreamMessage::Command(command) => self.handle_command(command),

				StreamMessage::Snapshot(Ok(snapshot)) => {
					if self.state.apply_snapshot(snapshot) {
						self.publish();
					}
				}

				StreamMessage::Snapshot(Err(e)) => {
					self.state.fetch_failed(&e);
					self.emit(PipelineEvent::LibraryFetchFailed {
						reason: e.to_string(),
					});
				}

				StreamMessage::WorkDone(completion) => {
					let Completed {
						changed,
						event,
						follow_up,
					} = self.state.complete(completion);

					if changed {
						self.publish();
					}
					if let Some(event) = event {
						self.emit(event);
					}
					self.dispatch(follow_up);
				}

				StreamMessage::Stop => break,
			}
		}

		// Requests queued behind the shutdown resolve as closed instead of hanging
		pending_commands.close();
		while let Ok(command) = pending_commands.try_recv() {
			match command {
				Command::Shutdown { ack } => respond(ack, ()),
				_ => trace!("Dropping request received after shutdown"),
			}
		}

		if let Some(handle) = feed_handle {
			handle.abort();
		}

		debug!("Attachment pipeline shut down");

		if let Some(ack) = shutdown_ack {
			respond(ack, ());
		}
	}

	fn handle_command(&mut self, command: Command) {
		match command {
			Command::SelectLocalCapture { capture, reply } => {
				let res = match self.state.register_capture(capture) {
					Ok((id, work)) => {
						// Published before any work starts, so the capture is seen before its thumbnail
						self.publish();
						self.dispatch(work);
						Ok(id)
					}
					Err(e) => Err(e),
				};

				respond(reply, res);
			}

			Command::ToggleSelection { id, reply } => {
				let res = match self.state.toggle(&id) {
					Ok((status, work)) => {
						self.publish();
						self.dispatch(work);
						Ok(status)
					}
					Err(e) => {
						debug!(?e, "Rejected selection toggle;");
						Err(e)
					}
				};

				respond(reply, res);
			}

			Command::Remove { id, reply } => {
				let res = self.state.remove(&id);
				if res.is_ok() {
					self.publish();
				}

				respond(reply, res);
			}

			Command::RequestThumbnail { id, reply } => {
				let res = self.state.request_thumbnail(&id).map(|work| self.dispatch(work));

				respond(reply, res);
			}

			Command::RequestDownload { id, reply } => {
				let res = match self.state.request_download(&id) {
					Ok((status, order)) => {
						self.publish();
						self.dispatch(Some(order));
						Ok(status)
					}
					Err(e) => Err(e),
				};

				respond(reply, res);
			}

			Command::SelectedAttachments { reply } => respond(reply, self.state.selected()),

			Command::Shutdown { ack } => {
				warn!("Shutdown must be handled by the owner loop");
				respond(ack, ());
			}
		}
	}

	fn dispatch(&self, work: Option<WorkOrder>) {
		if let Some(order) = work {
			self.worker.dispatch(order);
		}
	}

	fn publish(&mut self) {
		let snapshot = Arc::new(self.state.snapshot());
		trace!(revision = snapshot.revision, "Publishing candidates");
		self.candidates_tx.send_replace(Arc::clone(&snapshot));
		if self.updates_tx.send(snapshot).is_err() {
			trace!("No one is observing candidates");
		}
	}

	fn emit(&self, event: PipelineEvent) {
		if self.events_tx.send(event).is_err() {
			trace!("No one is listening to pipeline events");
		}
	}
}
