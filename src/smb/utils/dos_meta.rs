//! DOS-side views of filesystem metadata: attribute bits, the 16-bit
//! packed date/time pair, and 64-bit NT timestamps.

use std::fs::Metadata;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::smb::types::FileAttrs;

/// Derive DOS attributes for a directory entry. Dotfiles map to HIDDEN,
/// regular files carry ARCHIVE, and a read-only share marks everything
/// READ_ONLY.
pub fn dos_attrs(name: &str, md: &Metadata, share_read_only: bool) -> FileAttrs {
    let mut attrs = FileAttrs::empty();
    if md.is_dir() {
        attrs |= FileAttrs::DIRECTORY;
    } else {
        attrs |= FileAttrs::ARCHIVE;
    }
    if name.starts_with('.') && name != "." && name != ".." {
        attrs |= FileAttrs::HIDDEN;
    }
    if share_read_only || md.permissions().readonly() {
        attrs |= FileAttrs::READ_ONLY;
    }
    attrs
}

/// Pack a timestamp into the DOS (date, time) word pair: date is
/// year-since-1980/month/day, time is hour/minute/two-second units.
/// Times before the DOS epoch clamp to it.
pub fn dos_date_time(t: SystemTime) -> (u16, u16) {
    let dt: DateTime<Utc> = t.into();
    let year = dt.year().clamp(1980, 2107);
    if dt.year() < 1980 {
        return ((0 << 9) | (1 << 5) | 1, 0);
    }
    let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time =
        ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (date, time)
}

/// 100-nanosecond intervals since 1601-01-01, the NT timestamp format used
/// by the 0x1xx info levels.
pub fn nt_time(t: SystemTime) -> u64 {
    const EPOCH_DELTA_SECS: u64 = 11_644_473_600;
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (d.as_secs() + EPOCH_DELTA_SECS) * 10_000_000 + d.subsec_nanos() as u64 / 100,
        Err(_) => 0,
    }
}
