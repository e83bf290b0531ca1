//! Process-wide record of when each session was last seen alive.
//!
//! The map is the single piece of state shared between the event channel
//! (which writes), the reaper (which reads) and the persistence task (which
//! snapshots). Every access goes through one mutex, so any two `touch`es are
//! totally ordered. Presence in the map does not imply the workload exists,
//! and absence means "no signal yet", not "inactive".

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::fedid::Fedid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

/// Serialised image of the activity map.
///
/// A sorted map of FedID to RFC 3339 timestamp: deterministic for a given
/// build and forward-compatible across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivitySnapshot(pub BTreeMap<Fedid, Stamp>);

impl ActivitySnapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<Mutex<HashMap<Fedid, OffsetDateTime>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity for `fedid` at the current wall-clock time.
    pub fn touch(&self, fedid: &Fedid) {
        self.touch_at(fedid.clone(), OffsetDateTime::now_utc());
    }

    pub fn touch_at(&self, fedid: Fedid, timestamp: OffsetDateTime) {
        self.inner.lock().insert(fedid, timestamp);
    }

    pub fn get(&self, fedid: &Fedid) -> Option<OffsetDateTime> {
        self.inner.lock().get(fedid).copied()
    }

    /// Deletes the entry if present; absence is not an error.
    pub fn remove(&self, fedid: &Fedid) {
        self.inner.lock().remove(fedid);
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        let guard = self.inner.lock();
        ActivitySnapshot(
            guard
                .iter()
                .map(|(fedid, timestamp)| (fedid.clone(), Stamp(*timestamp)))
                .collect(),
        )
    }

    /// Merges a persisted snapshot into the live map.
    ///
    /// On key collision the persisted value wins: the in-memory map starts
    /// empty after a restart, so anything already present is younger than
    /// the snapshot only by accident of event ordering during startup.
    pub fn merge(&self, snapshot: ActivitySnapshot) {
        let mut guard = self.inner.lock();
        for (fedid, Stamp(timestamp)) in snapshot.0 {
            guard.insert(fedid, timestamp);
        }
    }
}

/// Extracts the owning user from a session URL carried in an event payload.
///
/// The FedID is the first path segment of the session URL
/// (`https://<host>/<fedid>/…`). Malformed URLs and segments that are not
/// valid FedIDs yield `None`; the caller drops the event.
pub fn user_from_session_url(url: &str) -> Option<Fedid> {
    let url = Url::parse(url).ok()?;
    let mut segments = url.path_segments()?;
    segments.next()?.parse().ok()
}
