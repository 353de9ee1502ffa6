pub mod search_ops;
pub mod trans2_ops;

use std::fs::Metadata;
use std::path::Path;

use log::warn;

/// Stat one directory entry. Failure skips the entry rather than failing
/// the enumeration, so a single unreadable file never aborts a listing.
pub(crate) fn stat_entry(dir: &Path, name: &str) -> Option<Metadata> {
    match std::fs::metadata(dir.join(name)) {
        Ok(md) => Some(md),
        Err(e) => {
            warn!("skipping {:?}/{}: {}", dir, name, e);
            None
        }
    }
}
