//! Fixed-capacity pool of directory search handles.
//!
//! A handle survives across request round trips and owns at most one
//! [`DirectorySnapshot`]. The table is larger than the number of snapshots
//! it will keep open at once: when the live cap is hit, the least recently
//! used live handle is idled (snapshot dropped, path and ordinal kept) and
//! transparently reopened on its next fetch. Slots themselves are recycled
//! by recency, preferring handles the client has marked as short-lived.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::smb::snapshot::DirectorySnapshot;
use crate::smb::types::{FileAttrs, SmbError};

/// Table capacity; keys fit a byte with `CLOSE_ALL_KEY` left over.
pub const TABLE_SIZE: usize = 254;
/// Simultaneously open snapshots allowed before idling kicks in.
pub const LIVE_SNAPSHOTS: usize = 64;
/// Distinguished legacy close-request value meaning "every handle".
pub const CLOSE_ALL_KEY: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchKey(pub u8);

pub struct SearchHandle {
    pub cnum: u16,
    pub pid: u16,
    pub dir_path: PathBuf,
    pub include_dots: bool,
    /// Wildcard and attribute filter, stored only by the FINDFIRST family;
    /// the legacy family threads them through its resume cookie instead.
    pub wildcard: Option<String>,
    pub attr_filter: Option<FileAttrs>,
    pub expect_close: bool,
    stamp: u64,
    snapshot: Option<DirectorySnapshot>,
    /// Cursor ordinal preserved while idle.
    ordinal: u32,
}

impl SearchHandle {
    /// The live snapshot, reopening and re-seeking if this handle was
    /// idled. The caller must have made room under the live cap first.
    fn snapshot_mut(&mut self) -> Result<&mut DirectorySnapshot, SmbError> {
        if self.snapshot.is_none() {
            debug!("reopening idled search on {:?} at {}", self.dir_path, self.ordinal);
            let mut snap = DirectorySnapshot::open(&self.dir_path, self.include_dots)
                .map_err(|e| {
                    warn!("reopen of {:?} failed: {}", self.dir_path, e);
                    SmbError::NoMoreFiles
                })?;
            snap.seek(self.ordinal);
            self.snapshot = Some(snap);
        }
        Ok(self.snapshot.as_mut().unwrap())
    }

    fn idle(&mut self) {
        if let Some(snap) = self.snapshot.take() {
            self.ordinal = snap.tell();
        }
    }
}

pub struct SearchHandleTable {
    slots: Vec<Option<SearchHandle>>,
    clock: u64,
}

impl Default for SearchHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchHandleTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(TABLE_SIZE);
        slots.resize_with(TABLE_SIZE, || None);
        Self { slots, clock: 0 }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn live_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|h| h.snapshot.is_some())
            .count()
    }

    /// Idle the least recently used live handle, sparing `keep`.
    fn idle_lru(&mut self, keep: Option<usize>) {
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != keep)
            .filter_map(|(i, s)| s.as_ref().map(|h| (i, h)))
            .filter(|(_, h)| h.snapshot.is_some())
            .min_by_key(|(_, h)| h.stamp)
            .map(|(i, _)| i);
        if let Some(i) = victim {
            debug!("idling search handle {} for snapshot room", i);
            self.slots[i].as_mut().unwrap().idle();
        }
    }

    /// Pick a slot for a new handle: a free one, else the least recently
    /// used slot the client flagged as short-lived, else the global LRU.
    fn allocate_slot(&mut self) -> Result<usize, SmbError> {
        if let Some(free) = self.slots.iter().position(|s| s.is_none()) {
            return Ok(free);
        }
        let lru = |want_expect_close: bool| {
            self.slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.as_ref().map(|h| (i, h)))
                .filter(|(_, h)| h.expect_close || !want_expect_close)
                .min_by_key(|(_, h)| h.stamp)
                .map(|(i, _)| i)
        };
        let victim = lru(true).or_else(|| lru(false)).ok_or(SmbError::OutOfHandles)?;
        info!("search table full, recycling handle {}", victim);
        self.slots[victim] = None;
        Ok(victim)
    }

    /// Open a new search over `dir_path` and return its key.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        cnum: u16,
        pid: u16,
        dir_path: PathBuf,
        include_dots: bool,
        expect_close: bool,
        wildcard: Option<String>,
        attr_filter: Option<FileAttrs>,
    ) -> Result<SearchKey, SmbError> {
        let slot = self.allocate_slot()?;
        if self.live_count() >= LIVE_SNAPSHOTS {
            self.idle_lru(Some(slot));
        }
        let snapshot = DirectorySnapshot::open(&dir_path, include_dots).map_err(|e| {
            warn!("cannot enumerate {:?}: {}", dir_path, e);
            SmbError::BadPath
        })?;
        let stamp = self.tick();
        self.slots[slot] = Some(SearchHandle {
            cnum,
            pid,
            dir_path,
            include_dots,
            wildcard,
            attr_filter,
            expect_close,
            stamp,
            snapshot: Some(snapshot),
            ordinal: 0,
        });
        Ok(SearchKey(slot as u8))
    }

    /// Look up a handle the client referenced, reviving its snapshot if it
    /// was idled. Bad keys report as "no more files" per the protocol.
    pub fn fetch(&mut self, key: SearchKey) -> Result<&mut SearchHandle, SmbError> {
        let idx = key.0 as usize;
        if idx >= self.slots.len() || self.slots[idx].is_none() {
            return Err(SmbError::BadHandle);
        }
        if self.slots[idx].as_ref().unwrap().snapshot.is_none()
            && self.live_count() >= LIVE_SNAPSHOTS
        {
            self.idle_lru(Some(idx));
        }
        let stamp = self.tick();
        let handle = self.slots[idx].as_mut().unwrap();
        handle.stamp = stamp;
        handle.snapshot_mut()?;
        Ok(handle)
    }

    /// Cursor access for a handle already revived by [`fetch`].
    pub fn snapshot(&mut self, key: SearchKey) -> Result<&mut DirectorySnapshot, SmbError> {
        self.fetch(key)?.snapshot_mut()
    }

    /// Returns false when nothing was open under `key`; callers report
    /// that but carry on.
    pub fn close(&mut self, key: SearchKey) -> bool {
        if key.0 == CLOSE_ALL_KEY {
            let n = self.slots.iter().flatten().count();
            self.slots.iter_mut().for_each(|s| *s = None);
            info!("closed all {} search handles", n);
            return true;
        }
        match self.slots.get_mut(key.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn close_all_for_connection(&mut self, cnum: u16) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|h| h.cnum == cnum) {
                *slot = None;
            }
        }
    }

    pub fn idle_all_for_connection(&mut self, cnum: u16) {
        for slot in &mut self.slots {
            if let Some(h) = slot.as_mut() {
                if h.cnum == cnum {
                    h.idle();
                }
            }
        }
    }
}
