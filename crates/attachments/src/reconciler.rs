use crate::{
	collaborators::{LibraryQuery, LibrarySnapshot},
	error::LibraryFeedError,
	AssetDescriptor, AssetId,
};

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

/// A still present library asset whose descriptor changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedDescriptor {
	pub descriptor: AssetDescriptor,
	/// The asset itself was edited, cached data derived from it is stale.
	pub modified: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileDiff {
	/// In library order.
	pub added: Vec<AssetDescriptor>,
	pub removed: Vec<AssetId>,
	pub changed: Vec<ChangedDescriptor>,
}

impl ReconcileDiff {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
	}
}

/// Keeps the library segment of the candidate list in sync with the snapshots coming from the
/// library feed.
///
/// Only additions and removals are applied, assets that were already shown keep their relative
/// order even if the library reports them in a different one.
#[derive(Debug)]
pub struct LibraryFeedReconciler {
	query: LibraryQuery,
	order: Vec<AssetId>,
	known: HashMap<AssetId, AssetDescriptor>,
	applied_snapshots: u64,
}

impl LibraryFeedReconciler {
	#[must_use]
	pub fn new(query: LibraryQuery) -> Self {
		Self {
			query,
			order: Vec::new(),
			known: HashMap::new(),
			applied_snapshots: 0,
		}
	}

	#[must_use]
	pub const fn query(&self) -> LibraryQuery {
		self.query
	}

	/// Current library segment, in display order.
	#[must_use]
	pub fn library_order(&self) -> &[AssetId] {
		&self.order
	}

	#[must_use]
	pub fn contains(&self, id: &AssetId) -> bool {
		self.known.contains_key(id)
	}

	/// Drops an asset removed by the user, the next snapshot still listing it brings it back.
	pub fn forget(&mut self, id: &AssetId) -> bool {
		if self.known.remove(id).is_some() {
			self.order.retain(|known_id| known_id != id);
			true
		} else {
			false
		}
	}

	/// A failed fetch leaves the last known good state untouched.
	pub fn fetch_failed(&self, e: &LibraryFeedError) {
		warn!(
			?e,
			applied_snapshots = self.applied_snapshots,
			known_assets = self.order.len(),
			"Failed to fetch library snapshot, keeping the last known one;"
		);
	}

	/// Diffs `snapshot` against the current library segment and applies it.
	///
	/// Identifiers for which `is_reserved` returns true belong to another segment of the
	/// candidate list and are skipped.
	pub fn reconcile(
		&mut self,
		snapshot: LibrarySnapshot,
		is_reserved: impl Fn(&AssetId) -> bool,
	) -> ReconcileDiff {
		let incoming = self.prepare(snapshot, is_reserved);

		let removed = {
			let incoming_ids = incoming.iter().map(|d| &d.id).collect::<HashSet<_>>();
			self.order
				.iter()
				.filter(|id| !incoming_ids.contains(id))
				.cloned()
				.collect::<Vec<_>>()
		};

		for id in &removed {
			self.known.remove(id);
		}
		let known = &self.known;
		self.order.retain(|id| known.contains_key(id));

		let mut changed = Vec::new();
		// Each new asset is anchored to the closest already known asset that follows it
		let mut new_assets = Vec::new();
		let mut next_kept = None::<AssetId>;

		for descriptor in incoming.into_iter().rev() {
			if let Some(previous) = self.known.get_mut(&descriptor.id) {
				if *previous != descriptor {
					changed.push(ChangedDescriptor {
						modified: previous.modified_at != descriptor.modified_at,
						descriptor: descriptor.clone(),
					});
					*previous = descriptor.clone();
				}
				next_kept = Some(descriptor.id);
			} else {
				new_assets.push((next_kept.clone(), descriptor));
			}
		}
		changed.reverse();
		new_assets.reverse();

		let mut anchored = HashMap::<AssetId, Vec<AssetId>>::new();
		let mut trailing = Vec::new();
		let mut added = Vec::with_capacity(new_assets.len());

		for (anchor, descriptor) in new_assets {
			match anchor {
				Some(anchor) => anchored
					.entry(anchor)
					.or_default()
					.push(descriptor.id.clone()),
				None => trailing.push(descriptor.id.clone()),
			}
			self.known.insert(descriptor.id.clone(), descriptor.clone());
			added.push(descriptor);
		}

		let mut order = Vec::with_capacity(self.order.len() + added.len());
		for id in self.order.drain(..) {
			if let Some(before) = anchored.remove(&id) {
				order.extend(before);
			}
			order.push(id);
		}
		order.extend(trailing);
		self.order = order;

		self.applied_snapshots += 1;

		let diff = ReconcileDiff {
			added,
			removed,
			changed,
		};

		debug!(
			added = diff.added.len(),
			removed = diff.removed.len(),
			changed = diff.changed.len(),
			library_assets = self.order.len(),
			"Reconciled library snapshot;"
		);

		diff
	}

	/// Filters out disallowed kinds and duplicates, caps the snapshot to the query limit and
	/// drops reserved identifiers.
	fn prepare(
		&self,
		snapshot: LibrarySnapshot,
		is_reserved: impl Fn(&AssetId) -> bool,
	) -> Vec<AssetDescriptor> {
		let mut seen = HashSet::new();
		let mut incoming = Vec::with_capacity(snapshot.assets.len().min(self.query.limit));

		for descriptor in snapshot.assets {
			if incoming.len() == self.query.limit {
				break;
			}

			if !self.query.kinds.allows(descriptor.kind) {
				trace!(id = %descriptor.id, kind = ?descriptor.kind, "Skipping disallowed media kind");
				continue;
			}

			if !seen.insert(descriptor.id.clone()) {
				warn!(id = %descriptor.id, "Library snapshot reported a duplicated asset, keeping the first one;");
				continue;
			}

			incoming.push(descriptor);
		}

		incoming.retain(|descriptor| !is_reserved(&descriptor.id));

		incoming
	}
}
