//! The legacy single-packet search family: SMBsearch, SMBffirst,
//! SMBfunique and SMBfclose.
//!
//! The client drives the whole enumeration through one command repeated
//! with a 21-byte resume cookie that it must echo verbatim. The cookie
//! carries everything the server needs to pick the walk back up: the
//! wildcard mask, the attribute filter, the handle index and the snapshot
//! ordinal.

use log::{debug, info};

use crate::smb::handlers::stat_entry;
use crate::smb::mangle::short_form;
use crate::smb::search_table::SearchKey;
use crate::smb::session::SmbSession;
use crate::smb::types::{FileAttrs, SmbError, SMB_COM_FIND_UNIQUE, SMB_COM_SEARCH};
use crate::smb::utils::dos_meta::{dos_attrs, dos_date_time};
use crate::smb::wildcard::mask_match;
use crate::smb::wire::{PacketReader, ReplyFrame, SmbRequest};

pub const RESUME_KEY_LEN: usize = 21;
/// 21-byte cookie + attribute + date + time + size + 13-byte name field.
pub const DIR_RECORD_LEN: usize = 43;

const ZERO_ORDINAL: u32 = 0x8000_0000;

/// The legacy resume cookie. The wire layout is fixed: the client treats
/// it as opaque but old DOS redirectors do copy it around, so every byte
/// stays where it has always been.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeKey {
    pub attrs: FileAttrs,
    pub mask: String,
    pub key: SearchKey,
    pub ordinal: u32,
}

impl ResumeKey {
    /// The mask travels in 11 bytes as a dotless 8+3 pair (base padded to
    /// 8, extension to 3), so every legal 8.3 mask round-trips exactly;
    /// `????????.???` is 12 characters and would not survive raw storage.
    pub fn encode(&self) -> [u8; RESUME_KEY_LEN] {
        let mut b = [0u8; RESUME_KEY_LEN];
        b[0] = self.attrs.bits() as u8;
        let mask = self.mask.to_uppercase();
        let (base, ext) = match mask.find('.') {
            Some(i) => (&mask[..i], &mask[i + 1..]),
            None => (mask.as_str(), ""),
        };
        b[1..12].fill(b' ');
        for (i, c) in base.bytes().take(8).enumerate() {
            b[1 + i] = c;
        }
        for (i, c) in ext.bytes().take(3).enumerate() {
            b[9 + i] = c;
        }
        b[12] = self.key.0;
        let ord = if self.ordinal == 0 {
            ZERO_ORDINAL
        } else {
            self.ordinal
        };
        b[13..17].copy_from_slice(&ord.to_le_bytes());
        b
    }

    pub fn decode(raw: &[u8]) -> Result<Self, SmbError> {
        if raw.len() != RESUME_KEY_LEN {
            return Err(SmbError::Desync("bad resume key length"));
        }
        let base = String::from_utf8_lossy(&raw[1..9]).trim_end().to_string();
        let ext = String::from_utf8_lossy(&raw[9..12]).trim_end().to_string();
        let mask = if ext.is_empty() {
            base
        } else {
            format!("{base}.{ext}")
        };
        let ord = u32::from_le_bytes([raw[13], raw[14], raw[15], raw[16]]);
        let ordinal = if ord & ZERO_ORDINAL != 0 { 0 } else { ord };
        Ok(Self {
            attrs: FileAttrs::from_bits_truncate(raw[0] as u16),
            mask,
            key: SearchKey(raw[12]),
            ordinal,
        })
    }
}

/// Path string and optional resume cookie shared by the whole family.
fn parse_search_bytes(req: &SmbRequest) -> Result<(String, Option<ResumeKey>), SmbError> {
    let mut r = PacketReader::new(req.bytes);
    if r.u8()? != 0x04 {
        return Err(SmbError::Desync("missing path marker"));
    }
    let path = r.cstr()?;
    if r.u8()? != 0x05 {
        return Err(SmbError::Desync("missing resume key block"));
    }
    let len = r.u16_le()? as usize;
    let resume = match len {
        0 => None,
        RESUME_KEY_LEN => Some(ResumeKey::decode(r.take(len)?)?),
        _ => return Err(SmbError::Desync("bad resume key length")),
    };
    Ok((path, resume))
}

fn write_record(
    frame: &mut ReplyFrame,
    cookie: &ResumeKey,
    attrs: FileAttrs,
    size: u64,
    mtime: std::time::SystemTime,
    short: &str,
) -> Result<(), SmbError> {
    let w = frame.data();
    w.bytes(&cookie.encode())?;
    w.u8(attrs.bits() as u8)?;
    let (date, time) = dos_date_time(mtime);
    w.u16_le(date)?;
    w.u16_le(time)?;
    w.u32_le(size.min(u32::MAX as u64) as u32)?;
    let mut name = [b' '; 13];
    for (i, b) in short.bytes().take(12).enumerate() {
        name[i] = b;
    }
    name[12] = 0;
    w.bytes(&name)
}

/// SMBsearch / SMBffirst / SMBfunique.
pub fn handle_search(session: &mut SmbSession, req: &SmbRequest) -> Result<Vec<Vec<u8>>, SmbError> {
    let max_count = req.word(0)? as usize;
    let req_attrs = FileAttrs::from_bits_truncate(req.word(1)?);
    let (path, resume) = parse_search_bytes(req)?;
    let command = req.header.command;

    // Every record is a fixed 43 bytes, so the per-call entry budget is
    // known up front and nothing ever has to be un-emitted. A negotiated
    // buffer too small for even one record is refused outright.
    let overhead = 32 + 1 + 2 + 2 + 3;
    let budget = session
        .state
        .max_xmit
        .checked_sub(overhead)
        .map(|room| room / DIR_RECORD_LEN)
        .filter(|&b| b > 0)
        .ok_or(SmbError::OutOfSpace)?;
    let max_count = max_count.min(budget);

    let first_call = resume.is_none();
    let (key, mask, filter) = match resume {
        Some(cookie) => {
            debug!("resume search key {} at {}", cookie.key.0, cookie.ordinal);
            let ordinal = cookie.ordinal;
            session.state.searches.snapshot(cookie.key)?.seek(ordinal);
            (cookie.key, cookie.mask, cookie.attrs)
        }
        None => {
            let (dir_dos, mask) = session.resolver.split_dir_and_mask(&path);
            let dir = session.resolver.resolve(&dir_dos)?;
            let include_dots = dir != session.resolver.root();
            let expect_close = command != SMB_COM_SEARCH;
            let key = session.state.searches.create(
                req.header.tid,
                req.header.pid,
                dir,
                include_dots,
                expect_close,
                None,
                None,
            )?;
            info!("search {:?} mask {:?} -> handle {}", path, mask, key.0);
            (key, mask.to_uppercase(), req_attrs)
        }
    };

    let dir = session.state.searches.fetch(key)?.dir_path.clone();
    let mut frame = ReplyFrame::new(&req.header, 1, session.state.max_xmit);
    frame.data().u8(0x05)?;
    frame.data().u16_le(0)?; // patched below
    let mut count = 0usize;

    while count < max_count {
        let snap = session.state.searches.snapshot(key)?;
        let Some(name) = snap.read_next() else {
            break;
        };
        let ordinal = snap.tell();
        let short = short_form(&name);
        if !mask_match(&short, &mask, false) {
            continue;
        }
        let Some(md) = stat_entry(&dir, &name) else {
            continue;
        };
        let attrs = dos_attrs(&name, &md, session.state.read_only);
        if !attrs.passes_filter(filter) {
            continue;
        }
        let cookie = ResumeKey {
            attrs: filter,
            mask: mask.clone(),
            key,
            ordinal,
        };
        let mtime = md.modified().unwrap_or(std::time::UNIX_EPOCH);
        write_record(&mut frame, &cookie, attrs, md.len(), mtime, &short)?;
        count += 1;
    }

    if count == 0 {
        if first_call && session.state.searches.fetch(key)?.expect_close {
            debug!("empty first search, closing handle {}", key.0);
            session.state.searches.close(key);
        }
        return Err(SmbError::NoMoreFiles);
    }

    if command == SMB_COM_FIND_UNIQUE {
        // One-shot variant: the handle never outlives the call.
        session.state.searches.close(key);
    }

    frame.set_word(0, count as u16);
    // Patch the 0x05 block length: header(32) + wct + vwv + bcc + marker.
    frame.data().patch_u16_le(32 + 1 + 2 + 2 + 1, (count * DIR_RECORD_LEN) as u16);
    Ok(vec![frame.finish()])
}

/// SMBfclose: explicit close of a legacy search handle.
pub fn handle_fclose(session: &mut SmbSession, req: &SmbRequest) -> Result<Vec<Vec<u8>>, SmbError> {
    let (_, resume) = parse_search_bytes(req)?;
    let cookie = resume.ok_or(SmbError::Desync("fclose without resume key"))?;
    if !session.state.searches.close(cookie.key) {
        info!("fclose on unknown handle {}", cookie.key.0);
    }
    let mut frame = ReplyFrame::new(&req.header, 1, session.state.max_xmit);
    frame.set_word(0, 0);
    Ok(vec![frame.finish()])
}
