//! In-memory directory snapshots.
//!
//! A snapshot captures every entry name of one directory at open time into
//! a packed buffer of NUL-terminated strings and is then walked purely by
//! ordinal. Directory streams cannot be seeked portably, so resumable
//! cursors re-seek the materialized copy instead: position `k` is always
//! reachable, at worst by rewinding and skipping `k` names.

use std::fs;
use std::path::Path;

use log::warn;

pub struct DirectorySnapshot {
    /// Packed NUL-terminated entry names, OS enumeration order.
    names: Vec<u8>,
    /// Byte offset of the entry at `ordinal`.
    byte_pos: usize,
    ordinal: u32,
    count: u32,
}

impl DirectorySnapshot {
    /// Read the whole directory. `include_dots` adds `.` and `..` up
    /// front; share-root listings leave them out.
    pub fn open(path: &Path, include_dots: bool) -> std::io::Result<Self> {
        let mut names = Vec::new();
        let mut count = 0u32;
        let mut push = |name: &str| {
            names.extend_from_slice(name.as_bytes());
            names.push(0);
            count += 1;
        };
        if include_dots {
            push(".");
            push("..");
        }
        for entry in fs::read_dir(path)? {
            match entry {
                Ok(e) => match e.file_name().into_string() {
                    Ok(name) => push(&name),
                    Err(os) => warn!("skipping non-UTF-8 entry {:?} in {:?}", os, path),
                },
                Err(e) => warn!("skipping unreadable entry in {:?}: {}", path, e),
            }
        }
        Ok(Self {
            names,
            byte_pos: 0,
            ordinal: 0,
            count,
        })
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn tell(&self) -> u32 {
        self.ordinal
    }

    /// Next entry name, advancing the cursor; `None` at the end.
    pub fn read_next(&mut self) -> Option<String> {
        if self.ordinal >= self.count {
            return None;
        }
        let rest = &self.names[self.byte_pos..];
        let nul = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.byte_pos += nul + 1;
        self.ordinal += 1;
        Some(name)
    }

    /// Position the cursor at `ordinal`. Seeking backward rewinds to the
    /// start and skips forward; seeking past the end stops at the end.
    pub fn seek(&mut self, ordinal: u32) {
        if ordinal < self.ordinal {
            self.byte_pos = 0;
            self.ordinal = 0;
        }
        while self.ordinal < ordinal && self.ordinal < self.count {
            let rest = &self.names[self.byte_pos..];
            let nul = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            self.byte_pos += nul + 1;
            self.ordinal += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn fixture(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for n in names {
            File::create(dir.path().join(n)).unwrap();
        }
        dir
    }

    #[test]
    fn captures_all_entries_once() {
        let dir = fixture(&["a", "b", "c"]);
        let mut snap = DirectorySnapshot::open(dir.path(), false).unwrap();
        let mut seen = Vec::new();
        while let Some(n) = snap.read_next() {
            seen.push(n);
        }
        seen.sort();
        assert_eq!(seen, ["a", "b", "c"]);
        assert_eq!(snap.len(), 3);
        assert!(snap.read_next().is_none());
    }

    #[test]
    fn dot_entries_lead_when_requested() {
        let dir = fixture(&["x"]);
        let mut snap = DirectorySnapshot::open(dir.path(), true).unwrap();
        assert_eq!(snap.read_next().unwrap(), ".");
        assert_eq!(snap.read_next().unwrap(), "..");
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn seek_is_deterministic_in_both_directions() {
        let dir = fixture(&["a", "b", "c", "d"]);
        let mut snap = DirectorySnapshot::open(dir.path(), false).unwrap();
        let mut in_order = Vec::new();
        while let Some(n) = snap.read_next() {
            in_order.push(n);
        }
        // Forward then backward seeks land on the same names.
        snap.seek(2);
        assert_eq!(snap.tell(), 2);
        assert_eq!(snap.read_next().unwrap(), in_order[2]);
        snap.seek(1);
        assert_eq!(snap.read_next().unwrap(), in_order[1]);
        snap.seek(0);
        assert_eq!(snap.read_next().unwrap(), in_order[0]);
    }

    #[test]
    fn seek_past_end_saturates() {
        let dir = fixture(&["a"]);
        let mut snap = DirectorySnapshot::open(dir.path(), false).unwrap();
        snap.seek(10);
        assert_eq!(snap.tell(), 1);
        assert!(snap.read_next().is_none());
    }

    #[test]
    fn snapshot_ignores_later_mutation() {
        let dir = fixture(&["a"]);
        let mut snap = DirectorySnapshot::open(dir.path(), false).unwrap();
        File::create(dir.path().join("later")).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.read_next().unwrap(), "a");
        assert!(snap.read_next().is_none());
    }
}
