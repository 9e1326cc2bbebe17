use crate::{AssetId, AttachmentStatus, MediaAsset};

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
	/// Entry point to the camera and the system picker, always first.
	PickerControl,
	Asset(MediaAsset),
}

/// Immutable view of the candidate list and its statuses, published after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatesSnapshot {
	/// Increases with every published snapshot.
	pub revision: u64,
	/// `[PickerControl] + [captures, newest first] + [library assets, library order]`
	pub candidates: Vec<Candidate>,
	pub statuses: HashMap<AssetId, AttachmentStatus>,
}

impl CandidatesSnapshot {
	pub fn assets(&self) -> impl Iterator<Item = &MediaAsset> {
		self.candidates.iter().filter_map(|candidate| match candidate {
			Candidate::Asset(asset) => Some(asset),
			Candidate::PickerControl => None,
		})
	}

	#[must_use]
	pub fn asset(&self, id: &AssetId) -> Option<&MediaAsset> {
		self.assets().find(|asset| &asset.id == id)
	}

	#[must_use]
	pub fn status(&self, id: &AssetId) -> Option<AttachmentStatus> {
		self.statuses.get(id).copied()
	}

	#[must_use]
	pub fn ids(&self) -> Vec<&AssetId> {
		self.assets().map(|asset| &asset.id).collect()
	}

	/// Selected assets in candidate list order.
	#[must_use]
	pub fn selected(&self) -> Vec<&MediaAsset> {
		self.assets()
			.filter(|asset| self.status(&asset.id).is_some_and(AttachmentStatus::is_selected))
			.collect()
	}
}
