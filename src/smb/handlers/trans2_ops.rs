//! TRANS2 FINDFIRST2/FINDNEXT2 and their close commands.
//!
//! Unlike the legacy family, the wildcard and attribute filter live on the
//! server-side handle, because FINDNEXT2 supplies neither. Resumption is by
//! handle plus, when the client passes one, the last returned filename:
//! ordinals drift when the directory mutates between calls, names do not.

use log::{debug, info, warn};

use crate::smb::handlers::stat_entry;
use crate::smb::mangle::short_form;
use crate::smb::search_table::{SearchHandleTable, SearchKey};
use crate::smb::snapshot::DirectorySnapshot;
use crate::smb::session::SmbSession;
use crate::smb::trans::{send_paginated, PendingTransaction};
use crate::smb::types::{
    is_find_level, FileAttrs, FindFlags, SmbError, SMB_FIND_FILE_BOTH_DIRECTORY_INFO,
    SMB_FIND_FILE_DIRECTORY_INFO, SMB_FIND_FILE_FULL_DIRECTORY_INFO, SMB_INFO_STANDARD,
    TRANS2_FIND_FIRST2, TRANS2_FIND_NEXT2,
};
use crate::smb::utils::dos_meta::{dos_attrs, dos_date_time, nt_time};
use crate::smb::wildcard::mask_match;
use crate::smb::wire::{PacketReader, PacketWriter, ReplyFrame, SmbHeader, SmbRequest};

/// Hard ceiling on one reply's data block, whatever the client asked for.
const MAX_FIND_DATA: usize = 0x10000;

/// SMB_COM_TRANSACTION2: primary packet. Dispatches immediately when the
/// whole transaction fits in one packet, otherwise parks it and sends the
/// interim go-ahead the client waits for.
pub fn handle_trans2(session: &mut SmbSession, req: &SmbRequest) -> Result<Vec<Vec<u8>>, SmbError> {
    let total_param = req.word(0)? as usize;
    let total_data = req.word(1)? as usize;
    let max_param_return = req.word(2)? as usize;
    let max_data_return = req.word(3)? as usize;
    let param_count = req.word(9)? as usize;
    let param_offset = req.word(10)? as usize;
    let data_count = req.word(11)? as usize;
    let data_offset = req.word(12)? as usize;
    let setup_count = (req.word(13)? & 0xFF) as usize;
    if setup_count != 1 {
        return Err(SmbError::Unsupported);
    }
    let subcommand = req.word(14)?;

    let param = slice_at(req.raw, param_offset, param_count)?;
    let data = slice_at(req.raw, data_offset, data_count)?;

    if session.state.pending.is_some() {
        warn!("new transaction while one was pending, discarding the old one");
    }
    let mut pending = PendingTransaction::begin(
        subcommand,
        total_param,
        total_data,
        max_param_return,
        max_data_return,
    );
    pending.append(param, 0, data, 0)?;

    if pending.is_complete() {
        session.state.pending = None;
        return dispatch(session, &req.header, pending);
    }
    debug!(
        "transaction {:#06x} incomplete ({}/{} param bytes), awaiting secondaries",
        subcommand, param_count, total_param
    );
    session.state.pending = Some(pending);
    Ok(vec![ReplyFrame::new(&req.header, 0, session.state.max_xmit).finish()])
}

/// SMB_COM_TRANSACTION2_SECONDARY: more bytes for the parked transaction.
pub fn handle_trans2_secondary(
    session: &mut SmbSession,
    req: &SmbRequest,
) -> Result<Vec<Vec<u8>>, SmbError> {
    let param_count = req.word(2)? as usize;
    let param_offset = req.word(3)? as usize;
    let param_disp = req.word(4)? as usize;
    let data_count = req.word(5)? as usize;
    let data_offset = req.word(6)? as usize;
    let data_disp = req.word(7)? as usize;

    let param = slice_at(req.raw, param_offset, param_count)?;
    let data = slice_at(req.raw, data_offset, data_count)?;

    let Some(mut pending) = session.state.pending.take() else {
        return Err(SmbError::Desync("secondary without a transaction"));
    };
    pending.append(param, param_disp, data, data_disp)?;
    if pending.is_complete() {
        return dispatch(session, &req.header, pending);
    }
    session.state.pending = Some(pending);
    // Secondaries are not answered until the transaction completes.
    Ok(Vec::new())
}

/// SMB_COM_FIND_CLOSE2: explicit close of a TRANS2 search handle.
pub fn handle_find_close2(
    session: &mut SmbSession,
    req: &SmbRequest,
) -> Result<Vec<Vec<u8>>, SmbError> {
    let key = SearchKey(req.word(0)? as u8);
    if !session.state.searches.close(key) {
        info!("findclose2 on unknown handle {}", key.0);
    }
    Ok(vec![ReplyFrame::new(&req.header, 0, session.state.max_xmit).finish()])
}

fn slice_at(raw: &[u8], offset: usize, count: usize) -> Result<&[u8], SmbError> {
    offset
        .checked_add(count)
        .filter(|&end| end <= raw.len())
        .map(|end| &raw[offset..end])
        .ok_or(SmbError::Desync("transaction block outside packet"))
}

fn dispatch(
    session: &mut SmbSession,
    header: &SmbHeader,
    pending: PendingTransaction,
) -> Result<Vec<Vec<u8>>, SmbError> {
    match pending.subcommand {
        TRANS2_FIND_FIRST2 => find_first2(session, header, &pending),
        TRANS2_FIND_NEXT2 => find_next2(session, header, &pending),
        other => {
            debug!("unsupported trans2 subcommand {:#06x}", other);
            Err(SmbError::Unsupported)
        }
    }
}

fn find_first2(
    session: &mut SmbSession,
    header: &SmbHeader,
    pending: &PendingTransaction,
) -> Result<Vec<Vec<u8>>, SmbError> {
    let mut r = PacketReader::new(pending.params());
    let attrs = FileAttrs::from_bits_truncate(r.u16_le()?);
    let max_count = r.u16_le()? as usize;
    let flags = FindFlags::from_bits_truncate(r.u16_le()?);
    let level = r.u16_le()?;
    let _storage_type = r.u32_le()?;
    let path = r.cstr()?;
    if !is_find_level(level) {
        return Err(SmbError::UnknownLevel(level));
    }

    let (dir_dos, mask) = session.resolver.split_dir_and_mask(&path);
    let dir = session.resolver.resolve(&dir_dos)?;
    let include_dots = dir != session.resolver.root();
    let expect_close =
        flags.intersects(FindFlags::CLOSE_AFTER_REQUEST | FindFlags::CLOSE_IF_END);
    let key = session.state.searches.create(
        header.tid,
        header.pid,
        dir,
        include_dots,
        expect_close,
        Some(mask.to_uppercase()),
        Some(attrs),
    )?;
    info!("findfirst {:?} level {:#06x} -> handle {}", path, level, key.0);

    let budget = pending.max_data_return.min(MAX_FIND_DATA);
    let batch = walk_find(
        &mut session.state.searches,
        key,
        level,
        flags,
        max_count,
        budget,
        session.state.read_only,
    )?;

    if batch.count == 0 {
        // Nothing matched at all: the DOS answer is "no such file", not
        // the mid-enumeration "no more files".
        session.state.searches.close(key);
        return Err(SmbError::NoSuchFile);
    }
    if flags.contains(FindFlags::CLOSE_AFTER_REQUEST)
        || (flags.contains(FindFlags::CLOSE_IF_END) && batch.end_of_search)
    {
        session.state.searches.close(key);
    }

    let mut params = PacketWriter::new(10);
    params.u16_le(key.0 as u16)?;
    params.u16_le(batch.count)?;
    params.u16_le(batch.end_of_search as u16)?;
    params.u16_le(0)?; // EA error offset
    params.u16_le(batch.last_name_offset)?;
    send_paginated(header, params.as_slice(), &batch.data, session.state.max_xmit)
}

fn find_next2(
    session: &mut SmbSession,
    header: &SmbHeader,
    pending: &PendingTransaction,
) -> Result<Vec<Vec<u8>>, SmbError> {
    let mut r = PacketReader::new(pending.params());
    let key = SearchKey(r.u16_le()? as u8);
    let max_count = r.u16_le()? as usize;
    let level = r.u16_le()?;
    let resume_ordinal = r.u32_le()?;
    let flags = FindFlags::from_bits_truncate(r.u16_le()?);
    let last_name = r.cstr()?;
    if !is_find_level(level) {
        return Err(SmbError::UnknownLevel(level));
    }

    {
        let snap = session.state.searches.snapshot(key)?;
        if flags.contains(FindFlags::CONTINUE_FROM_LAST) {
            // Client did nothing in between; the cursor is already right.
        } else if !last_name.is_empty() {
            relocate_by_name(snap, &last_name);
        } else {
            snap.seek(resume_ordinal);
        }
    }

    let budget = pending.max_data_return.min(MAX_FIND_DATA);
    let batch = walk_find(
        &mut session.state.searches,
        key,
        level,
        flags,
        max_count,
        budget,
        session.state.read_only,
    )?;

    if flags.contains(FindFlags::CLOSE_AFTER_REQUEST)
        || (flags.contains(FindFlags::CLOSE_IF_END) && batch.end_of_search)
    {
        debug!("auto-closing search handle {}", key.0);
        session.state.searches.close(key);
    }

    let mut params = PacketWriter::new(8);
    params.u16_le(batch.count)?;
    params.u16_le(batch.end_of_search as u16)?;
    params.u16_le(0)?;
    params.u16_le(batch.last_name_offset)?;
    send_paginated(header, params.as_slice(), &batch.data, session.state.max_xmit)
}

/// Put the cursor right after the entry named `target`, scanning backward
/// from the current position first, then forward. `target` may be a
/// mangled 8.3 alias, so candidates are compared through the same mangling.
fn relocate_by_name(snap: &mut DirectorySnapshot, target: &str) {
    let target_up = target.to_uppercase();
    let matches = |name: &str| {
        name.to_uppercase() == target_up || short_form(name) == target_up
    };
    let cur = snap.tell();
    for ord in (0..cur).rev() {
        snap.seek(ord);
        if let Some(name) = snap.read_next() {
            if matches(&name) {
                return;
            }
        }
    }
    snap.seek(cur);
    while let Some(name) = snap.read_next() {
        if matches(&name) {
            return;
        }
    }
    // Name is gone from the snapshot; fall back to where we already were.
    snap.seek(cur);
}

struct FindBatch {
    data: Vec<u8>,
    count: u16,
    end_of_search: bool,
    last_name_offset: u16,
}

/// Walk the handle's snapshot emitting entries at `level` until the count
/// or byte budget is reached. An entry that does not fit backs the cursor
/// up one position so the next call re-emits it.
fn walk_find(
    searches: &mut SearchHandleTable,
    key: SearchKey,
    level: u16,
    flags: FindFlags,
    max_count: usize,
    budget: usize,
    read_only: bool,
) -> Result<FindBatch, SmbError> {
    let (dir, mask, filter) = {
        let h = searches.fetch(key)?;
        (
            h.dir_path.clone(),
            h.wildcard.clone().unwrap_or_else(|| "*".into()),
            h.attr_filter.unwrap_or(FileAttrs::all()),
        )
    };

    let mut data = PacketWriter::new(budget);
    let mut entry_starts: Vec<usize> = Vec::new();
    let mut count = 0u16;
    let mut end_of_search = false;
    let mut last_name_offset = 0u16;

    while (count as usize) < max_count {
        let snap = searches.snapshot(key)?;
        let pos_before = snap.tell();
        let Some(name) = snap.read_next() else {
            end_of_search = true;
            break;
        };
        let resume_key = snap.tell();
        if !mask_match(&name, &mask, true) && !mask_match(&short_form(&name), &mask, false) {
            continue;
        }
        let Some(md) = stat_entry(&dir, &name) else {
            continue;
        };
        let attrs = dos_attrs(&name, &md, read_only);
        if !attrs.passes_filter(filter) {
            continue;
        }

        let (entry, name_rel) = serialize_entry(level, flags, resume_key, &name, attrs, &md)?;
        // Only the chained 0x1xx records are 4-aligned; INFO_STANDARD has
        // no next-entry offset, so clients parse it strictly back to back
        // and padding would desynchronize them.
        let pad = if level == SMB_INFO_STANDARD {
            0
        } else {
            (4 - data.pos() % 4) % 4
        };
        if pad + entry.len() > data.space_left() {
            // Re-emit this entry on the next call instead of losing it.
            searches.snapshot(key)?.seek(pos_before);
            break;
        }
        if pad > 0 {
            data.align(4)?;
        }
        let start = data.pos();
        data.bytes(&entry)?;
        entry_starts.push(start);
        last_name_offset = (start + name_rel) as u16;
        count += 1;
    }

    let mut data = data.into_vec();
    patch_entry_chain(level, &mut data, &entry_starts);
    Ok(FindBatch {
        data,
        count,
        end_of_search,
        last_name_offset,
    })
}

/// The 0x1xx levels chain entries with a next-entry offset in their first
/// dword; the last entry's stays zero.
fn patch_entry_chain(level: u16, data: &mut [u8], starts: &[usize]) {
    if level == SMB_INFO_STANDARD {
        return;
    }
    for pair in starts.windows(2) {
        let delta = (pair[1] - pair[0]) as u32;
        data[pair[0]..pair[0] + 4].copy_from_slice(&delta.to_le_bytes());
    }
}

/// One directory entry in the requested level's record layout. Returns the
/// raw record plus the offset of its filename field.
fn serialize_entry(
    level: u16,
    flags: FindFlags,
    resume_key: u32,
    name: &str,
    attrs: FileAttrs,
    md: &std::fs::Metadata,
) -> Result<(Vec<u8>, usize), SmbError> {
    let mut w = PacketWriter::new(MAX_FIND_DATA);
    let size = md.len();
    let mtime = md.modified().unwrap_or(std::time::UNIX_EPOCH);
    let atime = md.accessed().unwrap_or(mtime);
    let alloc = size.div_ceil(512) * 512;

    let name_rel = match level {
        SMB_INFO_STANDARD => {
            if flags.contains(FindFlags::RETURN_RESUME_KEYS) {
                w.u32_le(resume_key)?;
            }
            let (date, time) = dos_date_time(mtime);
            let (adate, atime16) = dos_date_time(atime);
            // Creation time is not tracked portably; mirror the write time.
            for (d, t) in [(date, time), (adate, atime16), (date, time)] {
                w.u16_le(d)?;
                w.u16_le(t)?;
            }
            w.u32_le(size.min(u32::MAX as u64) as u32)?;
            w.u32_le(alloc.min(u32::MAX as u64) as u32)?;
            w.u16_le(attrs.bits())?;
            w.u8(name.len().min(255) as u8)?;
            let rel = w.pos();
            w.bytes(name.as_bytes())?;
            w.u8(0)?;
            rel
        }
        SMB_FIND_FILE_DIRECTORY_INFO
        | SMB_FIND_FILE_FULL_DIRECTORY_INFO
        | SMB_FIND_FILE_BOTH_DIRECTORY_INFO => {
            w.u32_le(0)?; // next entry offset, patched by the caller
            w.u32_le(resume_key)?; // file index doubles as the resume key
            let nt_mtime = nt_time(mtime);
            w.u64_le(nt_mtime)?; // creation
            w.u64_le(nt_time(atime))?;
            w.u64_le(nt_mtime)?; // last write
            w.u64_le(nt_mtime)?; // change
            w.u64_le(size)?;
            w.u64_le(alloc)?;
            w.u32_le(attrs.bits() as u32)?;
            w.u32_le(name.len() as u32)?;
            if level != SMB_FIND_FILE_DIRECTORY_INFO {
                w.u32_le(0)?; // EA size
            }
            if level == SMB_FIND_FILE_BOTH_DIRECTORY_INFO {
                let short = short_form(name);
                let alias = if short.eq_ignore_ascii_case(name) {
                    ""
                } else {
                    short.as_str()
                };
                w.u8(alias.len() as u8)?;
                w.u8(0)?;
                let mut field = [0u8; 24];
                for (i, b) in alias.bytes().take(24).enumerate() {
                    field[i] = b;
                }
                w.bytes(&field)?;
            }
            let rel = w.pos();
            w.bytes(name.as_bytes())?;
            w.u8(0)?;
            rel
        }
        other => return Err(SmbError::UnknownLevel(other)),
    };
    Ok((w.into_vec(), name_rel))
}
