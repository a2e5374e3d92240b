//! Detects whether a catalog poll produced a meaningful change.
//!
//! A long-poll may wake up after an idempotent write or an unrelated metadata
//! update. Comparing service views avoids rebuilding and republishing an
//! identical configuration in that case.

use std::collections::{BTreeMap, BTreeSet};

/// What the detector remembers about one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceView {
    /// Service name.
    pub name: String,
    /// Catalog tags; compared as a set.
    pub tags: Vec<String>,
    /// `address:port` and tags of each instance in stable node order; compared as a sequence.
    pub nodes: Vec<String>,
}

/// Keys present in `current` but not `previous`, and the reverse.
///
/// Both lists are sorted and free of duplicates.
pub fn diff_keys<S: AsRef<str>>(current: &[S], previous: &[S]) -> (Vec<String>, Vec<String>) {
    let current: BTreeSet<&str> = current.iter().map(AsRef::as_ref).collect();
    let previous: BTreeSet<&str> = previous.iter().map(AsRef::as_ref).collect();

    let added = current.difference(&previous).map(|s| s.to_string()).collect();
    let removed = previous.difference(&current).map(|s| s.to_string()).collect();
    (added, removed)
}

/// Whether the service set, any node list or any tag set differs.
pub fn changed(
    current: &BTreeMap<String, ServiceView>,
    previous: &BTreeMap<String, ServiceView>,
) -> bool {
    if current.len() != previous.len() || current.keys().ne(previous.keys()) {
        return true;
    }

    current.iter().any(|(name, view)| match previous.get(name) {
        None => true,
        Some(prior) => {
            let (added, removed) = diff_keys(&view.tags, &prior.tags);
            view.nodes != prior.nodes || !added.is_empty() || !removed.is_empty()
        }
    })
}

/// Remembers the last observed views of one worker.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<BTreeMap<String, ServiceView>>,
}

impl ChangeDetector {
    /// Create a detector that has not observed anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `current` differs from the last committed views.
    ///
    /// The first observation always counts as a change.
    pub fn is_changed(&self, current: &BTreeMap<String, ServiceView>) -> bool {
        match &self.previous {
            None => true,
            Some(previous) => changed(current, previous),
        }
    }

    /// Remember `current` as the last published state.
    pub fn commit(&mut self, current: BTreeMap<String, ServiceView>) {
        self.previous = Some(current);
    }

    /// Forget the committed state so the next observation counts as a change.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
