use serde::{Deserialize, Serialize};

/// Selection and processing status of a single candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentStatus {
	#[default]
	Unselected,
	Loading,
	/// Loading phase of a local capture, while it is being size limited.
	Compressing,
	Downloading,
	Selected,
}

impl AttachmentStatus {
	/// Async work is in flight for this candidate, user toggles are ignored.
	#[must_use]
	pub const fn is_transient(self) -> bool {
		matches!(self, Self::Loading | Self::Compressing | Self::Downloading)
	}

	#[must_use]
	pub const fn is_selected(self) -> bool {
		matches!(self, Self::Selected)
	}

	/// Applies `event`, returning the next status or the rejected transition.
	pub const fn apply(self, event: StatusEvent) -> Result<Self, InvalidTransition> {
		use AttachmentStatus::{Compressing, Downloading, Loading, Selected, Unselected};

		let next = match (self, event) {
			(Unselected, StatusEvent::Toggle { pending: None }) => Selected,
			(Unselected, StatusEvent::Toggle {
				pending: Some(PendingWork::Load),
			}) => Loading,
			(Unselected, StatusEvent::Toggle {
				pending: Some(PendingWork::Download),
			}) => Downloading,
			(Selected, StatusEvent::Toggle { .. }) => Unselected,

			(Unselected, StatusEvent::CaptureRegistered) => Compressing,

			(Unselected | Selected, StatusEvent::DownloadRequested) => Downloading,

			(Loading | Compressing | Downloading, StatusEvent::WorkSucceeded) => Selected,
			(Loading | Compressing | Downloading, StatusEvent::WorkFailed) => Unselected,

			(from, event) => return Err(InvalidTransition { from, event }),
		};

		Ok(next)
	}
}

/// Async work a selection has to wait on before it can settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWork {
	/// Library media not materialized yet.
	Load,
	/// Original only available remotely.
	Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
	Toggle { pending: Option<PendingWork> },
	CaptureRegistered,
	DownloadRequested,
	WorkSucceeded,
	WorkFailed,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid status transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
	pub from: AttachmentStatus,
	pub event: StatusEvent,
}
