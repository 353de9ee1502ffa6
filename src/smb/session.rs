//! Per-connection SMB dispatcher.
//!
//! One request frame in, zero or more reply frames out. Protocol errors
//! turn into error replies; only a desync (malformed framing, transaction
//! overrun) propagates out so the connection loop can abort.

use std::sync::Arc;

use log::{debug, error, info};

use crate::server::ServerConfig;
use crate::smb::handlers::{search_ops, trans2_ops};
use crate::smb::search_table::SearchHandleTable;
use crate::smb::session_state::SessionState;
use crate::smb::types::{
    SmbError, SMB_COM_FIND, SMB_COM_FIND_CLOSE, SMB_COM_FIND_CLOSE2, SMB_COM_FIND_UNIQUE,
    SMB_COM_SEARCH, SMB_COM_TRANSACTION2, SMB_COM_TRANSACTION2_SECONDARY,
};
use crate::smb::utils::path_resolver::PathResolver;
use crate::smb::wire::{ReplyFrame, SmbRequest};

pub struct SmbSession {
    pub(crate) state: SessionState,
    pub(crate) resolver: PathResolver,
}

impl SmbSession {
    pub fn new(config: Arc<ServerConfig>, conn_id: u64) -> Self {
        Self {
            state: SessionState {
                conn_id,
                read_only: config.read_only,
                max_xmit: config.max_xmit,
                searches: SearchHandleTable::new(),
                pending: None,
            },
            resolver: PathResolver::new(config.root_dir.clone()),
        }
    }

    /// Handle one framed request. A fatal error means the connection must
    /// be dropped; anything else already produced reply frames.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>, SmbError> {
        let req = SmbRequest::parse(frame)?;
        debug!(
            "conn {} command {:#04x} mid {}",
            self.state.conn_id, req.header.command, req.header.mid
        );
        let result = match req.header.command {
            SMB_COM_SEARCH | SMB_COM_FIND | SMB_COM_FIND_UNIQUE => {
                search_ops::handle_search(self, &req)
            }
            SMB_COM_FIND_CLOSE => search_ops::handle_fclose(self, &req),
            SMB_COM_TRANSACTION2 => trans2_ops::handle_trans2(self, &req),
            SMB_COM_TRANSACTION2_SECONDARY => trans2_ops::handle_trans2_secondary(self, &req),
            SMB_COM_FIND_CLOSE2 => trans2_ops::handle_find_close2(self, &req),
            other => {
                debug!("unsupported command {:#04x}", other);
                Err(SmbError::Unsupported)
            }
        };
        match result {
            Ok(replies) => Ok(replies),
            Err(e) if e.is_fatal() => {
                error!("conn {} aborting: {}", self.state.conn_id, e);
                Err(e)
            }
            Err(e) => {
                debug!("conn {} error reply: {}", self.state.conn_id, e);
                Ok(vec![ReplyFrame::error(&req.header, &e)])
            }
        }
    }

    /// Connection teardown: every search handle dies with the connection,
    /// as does any half-assembled transaction.
    pub fn teardown(&mut self) {
        self.state.searches.close(crate::smb::search_table::SearchKey(
            crate::smb::search_table::CLOSE_ALL_KEY,
        ));
        if self.state.pending.take().is_some() {
            info!(
                "conn {} dropped an incomplete transaction on close",
                self.state.conn_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smb::handlers::search_ops::{ResumeKey, DIR_RECORD_LEN, RESUME_KEY_LEN};
    use crate::smb::types::{FileAttrs, ERRDOS, ERR_NO_FILES};
    use crate::smb::wire::SMB_MAGIC;
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixture(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for n in names {
            File::create(dir.path().join(n)).unwrap();
        }
        dir
    }

    fn session(root: PathBuf) -> SmbSession {
        SmbSession::new(
            Arc::new(ServerConfig {
                root_dir: root,
                read_only: false,
                max_xmit: 4356,
            }),
            7,
        )
    }

    fn request(command: u8, vwv: &[u16], bytes: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SMB_MAGIC);
        buf.push(command);
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(0x08);
        buf.extend_from_slice(&[0u8; 14]);
        for v in [1u16, 2, 3, 4] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(vwv.len() as u8);
        for w in vwv {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(bytes);
        buf
    }

    fn search_request(max: u16, path: &str, resume: Option<&[u8]>) -> Vec<u8> {
        let mut bytes = vec![0x04];
        bytes.extend_from_slice(path.as_bytes());
        bytes.push(0);
        bytes.push(0x05);
        match resume {
            Some(r) => {
                bytes.extend_from_slice(&(r.len() as u16).to_le_bytes());
                bytes.extend_from_slice(r);
            }
            None => bytes.extend_from_slice(&0u16.to_le_bytes()),
        }
        request(SMB_COM_SEARCH, &[max, 0x16], &bytes)
    }

    /// Pull (short name, cookie) pairs out of a legacy search reply.
    fn parse_search_reply(reply: &[u8]) -> Vec<(String, Vec<u8>)> {
        let parsed = SmbRequest::parse(reply).unwrap();
        let count = parsed.word(0).unwrap() as usize;
        let mut out = Vec::new();
        for i in 0..count {
            let rec = &parsed.bytes[3 + i * DIR_RECORD_LEN..3 + (i + 1) * DIR_RECORD_LEN];
            let name = String::from_utf8_lossy(&rec[30..42]).trim_end().to_string();
            out.push((name, rec[..RESUME_KEY_LEN].to_vec()));
        }
        out
    }

    #[test]
    fn legacy_search_lists_matching_entries() {
        let dir = fixture(&["alpha.txt", "BETA.TXT", "other.doc"]);
        let mut s = session(dir.path().to_path_buf());
        let replies = s.handle_frame(&search_request(10, "*.TXT", None)).unwrap();
        assert_eq!(replies.len(), 1);
        let mut names: Vec<String> = parse_search_reply(&replies[0])
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        names.sort();
        assert_eq!(names, ["ALPHA.TXT", "BETA.TXT"]);
    }

    #[test]
    fn legacy_resumption_reproduces_the_unrestricted_walk() {
        let dir = fixture(&["a1", "a2", "a3", "a4", "a5"]);
        let mut s = session(dir.path().to_path_buf());

        let all: Vec<String> = parse_search_reply(
            &s.handle_frame(&search_request(100, "*", None)).unwrap()[0],
        )
        .into_iter()
        .map(|(n, _)| n)
        .collect();
        assert_eq!(all.len(), 5);

        // Re-enumerate one entry at a time, echoing each cookie back.
        let mut resumed = Vec::new();
        let first = s.handle_frame(&search_request(1, "*", None)).unwrap();
        let mut entries = parse_search_reply(&first[0]);
        loop {
            let (name, cookie) = entries.pop().unwrap();
            resumed.push(name);
            match s.handle_frame(&search_request(1, "*", Some(&cookie))) {
                Ok(replies) => {
                    let parsed = SmbRequest::parse(&replies[0]).unwrap();
                    if parsed.header.command == SMB_COM_SEARCH && parsed.word_count() == 0 {
                        break; // error reply: no more files
                    }
                    entries = parse_search_reply(&replies[0]);
                }
                Err(_) => unreachable!("legacy errors never abort"),
            }
        }
        assert_eq!(resumed, all);
    }

    #[test]
    fn resumption_keeps_a_full_width_mask() {
        // `????????.???` is 12 characters; entries with 3-character
        // extensions must keep matching after every resume round trip.
        let dir = fixture(&["alpha.txt", "beta.txt", "gamma.txt"]);
        let mut s = session(dir.path().to_path_buf());
        let mask = "????????.???";

        let mut all: Vec<String> =
            parse_search_reply(&s.handle_frame(&search_request(100, mask, None)).unwrap()[0])
                .into_iter()
                .map(|(n, _)| n)
                .collect();
        assert_eq!(all.len(), 3);

        let mut resumed = Vec::new();
        let mut entries = parse_search_reply(
            &s.handle_frame(&search_request(1, mask, None)).unwrap()[0],
        );
        loop {
            let (name, cookie) = entries.pop().unwrap();
            resumed.push(name);
            let replies = s
                .handle_frame(&search_request(1, mask, Some(&cookie)))
                .unwrap();
            if replies[0][5] == ERRDOS {
                break;
            }
            entries = parse_search_reply(&replies[0]);
        }
        all.sort();
        resumed.sort();
        assert_eq!(resumed, all);
    }

    #[test]
    fn empty_search_reports_no_more_files() {
        let dir = fixture(&[]);
        let mut s = session(dir.path().to_path_buf());
        let replies = s.handle_frame(&search_request(5, "*.none", None)).unwrap();
        let parsed = SmbRequest::parse(&replies[0]).unwrap();
        // Error replies carry the DOS class/code in the raw header.
        assert_eq!(replies[0][5], ERRDOS);
        assert_eq!(
            u16::from_le_bytes([replies[0][7], replies[0][8]]),
            ERR_NO_FILES
        );
        assert_eq!(parsed.word_count(), 0);
    }

    #[test]
    fn stale_cookie_is_not_fatal() {
        let dir = fixture(&["x"]);
        let mut s = session(dir.path().to_path_buf());
        let cookie = ResumeKey {
            attrs: FileAttrs::empty(),
            mask: "*".into(),
            key: crate::smb::search_table::SearchKey(200),
            ordinal: 3,
        };
        let replies = s
            .handle_frame(&search_request(1, "*", Some(&cookie.encode())))
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0][5], ERRDOS);
    }

    #[test]
    fn tiny_negotiated_buffer_is_refused_not_a_panic() {
        let dir = fixture(&["alpha.txt"]);
        let mut s = SmbSession::new(
            Arc::new(ServerConfig {
                root_dir: dir.path().to_path_buf(),
                read_only: false,
                max_xmit: 10,
            }),
            7,
        );
        let replies = s.handle_frame(&search_request(5, "*", None)).unwrap();
        assert_eq!(replies.len(), 1);
        assert_ne!(replies[0][5], 0);
    }

    #[test]
    fn unknown_command_gets_an_error_reply() {
        let dir = fixture(&[]);
        let mut s = session(dir.path().to_path_buf());
        let replies = s.handle_frame(&request(0x72, &[], b"")).unwrap();
        assert_eq!(replies.len(), 1);
        assert_ne!(replies[0][5], 0);
    }

    #[test]
    fn garbage_frame_is_fatal() {
        let dir = fixture(&[]);
        let mut s = session(dir.path().to_path_buf());
        assert!(s.handle_frame(b"not smb at all").is_err());
    }

    fn trans2_request(subcommand: u16, params: &[u8]) -> Vec<u8> {
        // Single-packet primary: all parameter bytes inline, no data.
        let wct = 15u16;
        let param_offset = 32 + 1 + wct as usize * 2 + 2;
        let vwv = [
            params.len() as u16, // total param
            0,                   // total data
            10,                  // max param return
            4096,                // max data return
            0,
            0,
            0,
            0, // timeout
            0,
            params.len() as u16, // param count
            param_offset as u16,
            0,
            0,
            1, // setup count
            subcommand,
        ];
        request(crate::smb::types::SMB_COM_TRANSACTION2, &vwv, params)
    }

    fn findfirst_params(mask: &str, level: u16, max: u16, flags: u16) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&0x0037u16.to_le_bytes()); // attrs: incl. hidden+dir
        p.extend_from_slice(&max.to_le_bytes());
        p.extend_from_slice(&flags.to_le_bytes());
        p.extend_from_slice(&level.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(mask.as_bytes());
        p.push(0);
        p
    }

    #[test]
    fn findfirst_returns_handle_and_entries() {
        let dir = fixture(&["alpha.txt", "beta.txt"]);
        let mut s = session(dir.path().to_path_buf());
        let req = trans2_request(
            crate::smb::types::TRANS2_FIND_FIRST2,
            &findfirst_params("*.txt", crate::smb::types::SMB_FIND_FILE_DIRECTORY_INFO, 10, 0),
        );
        let replies = s.handle_frame(&req).unwrap();
        assert!(!replies.is_empty());
        let parsed = SmbRequest::parse(&replies[0]).unwrap();
        let param_count = parsed.word(3).unwrap();
        let param_off = parsed.word(4).unwrap() as usize;
        assert_eq!(param_count, 10);
        let count =
            u16::from_le_bytes([replies[0][param_off + 2], replies[0][param_off + 3]]);
        let end = u16::from_le_bytes([replies[0][param_off + 4], replies[0][param_off + 5]]);
        assert_eq!(count, 2);
        assert_eq!(end, 1);
    }

    #[test]
    fn findfirst_with_no_match_reports_no_such_file() {
        let dir = fixture(&["alpha.txt"]);
        let mut s = session(dir.path().to_path_buf());
        let req = trans2_request(
            crate::smb::types::TRANS2_FIND_FIRST2,
            &findfirst_params(
                "*.none",
                crate::smb::types::SMB_FIND_FILE_DIRECTORY_INFO,
                10,
                0,
            ),
        );
        let replies = s.handle_frame(&req).unwrap();
        assert_eq!(replies[0][5], ERRDOS);
        assert_eq!(
            u16::from_le_bytes([replies[0][7], replies[0][8]]),
            crate::smb::types::ERR_BAD_FILE
        );
    }

    #[test]
    fn findfirst_rejects_unknown_level_before_any_work() {
        let dir = fixture(&["a"]);
        let mut s = session(dir.path().to_path_buf());
        let req = trans2_request(
            crate::smb::types::TRANS2_FIND_FIRST2,
            &findfirst_params("*", 0x999, 10, 0),
        );
        let replies = s.handle_frame(&req).unwrap();
        assert_eq!(replies[0][5], ERRDOS);
        assert_eq!(
            u16::from_le_bytes([replies[0][7], replies[0][8]]),
            crate::smb::types::ERR_UNKNOWN_LEVEL
        );
    }

    #[test]
    fn split_transaction_assembles_across_secondaries() {
        let dir = fixture(&["alpha.txt"]);
        let mut s = session(dir.path().to_path_buf());
        let params = findfirst_params(
            "*.txt",
            crate::smb::types::SMB_FIND_FILE_DIRECTORY_INFO,
            10,
            0,
        );
        let (head, tail) = params.split_at(6);

        // Primary with the first six parameter bytes.
        let wct = 15usize;
        let param_offset = 32 + 1 + wct * 2 + 2;
        let vwv = [
            params.len() as u16,
            0,
            10,
            4096,
            0,
            0,
            0,
            0,
            0,
            head.len() as u16,
            param_offset as u16,
            0,
            0,
            1,
            crate::smb::types::TRANS2_FIND_FIRST2,
        ];
        let primary = request(crate::smb::types::SMB_COM_TRANSACTION2, &vwv, head);
        let interim = s.handle_frame(&primary).unwrap();
        assert_eq!(interim.len(), 1); // go-ahead

        // Secondary with the rest at displacement 6.
        let wct2 = 9usize;
        let off2 = 32 + 1 + wct2 * 2 + 2;
        let vwv2 = [
            params.len() as u16,
            0,
            tail.len() as u16,
            off2 as u16,
            head.len() as u16,
            0,
            0,
            0,
            0xFFFF,
        ];
        let secondary = request(crate::smb::types::SMB_COM_TRANSACTION2_SECONDARY, &vwv2, tail);
        let replies = s.handle_frame(&secondary).unwrap();
        let parsed = SmbRequest::parse(&replies[0]).unwrap();
        assert_eq!(parsed.word(3).unwrap(), 10); // findfirst reply params
    }

    #[test]
    fn secondary_without_primary_aborts() {
        let dir = fixture(&[]);
        let mut s = session(dir.path().to_path_buf());
        let vwv2 = [0u16, 0, 0, 0, 0, 0, 0, 0, 0xFFFF];
        let secondary = request(crate::smb::types::SMB_COM_TRANSACTION2_SECONDARY, &vwv2, b"");
        assert!(s.handle_frame(&secondary).is_err());
    }

    #[test]
    fn overdeclared_secondary_aborts() {
        let dir = fixture(&["alpha.txt"]);
        let mut s = session(dir.path().to_path_buf());
        let wct = 15usize;
        let param_offset = 32 + 1 + wct * 2 + 2;
        let vwv = [
            4u16, 0, 10, 4096, 0, 0, 0, 0, 0, 2, param_offset as u16, 0, 0, 1,
            crate::smb::types::TRANS2_FIND_FIRST2,
        ];
        let primary = request(crate::smb::types::SMB_COM_TRANSACTION2, &vwv, &[0, 0]);
        s.handle_frame(&primary).unwrap();

        let wct2 = 9usize;
        let off2 = 32 + 1 + wct2 * 2 + 2;
        // Five more bytes against a declared total of four.
        let vwv2 = [4u16, 0, 5, off2 as u16, 2, 0, 0, 0, 0xFFFF];
        let secondary = request(
            crate::smb::types::SMB_COM_TRANSACTION2_SECONDARY,
            &vwv2,
            &[0, 0, 0, 0, 0],
        );
        assert!(s.handle_frame(&secondary).is_err());
    }

    #[test]
    fn teardown_closes_handles() {
        let dir = fixture(&["alpha.txt"]);
        let mut s = session(dir.path().to_path_buf());
        s.handle_frame(&search_request(1, "*", None)).unwrap();
        s.teardown();
        // A resume against the closed handle now fails politely.
        let cookie = ResumeKey {
            attrs: FileAttrs::empty(),
            mask: "*".into(),
            key: crate::smb::search_table::SearchKey(0),
            ordinal: 1,
        };
        let replies = s
            .handle_frame(&search_request(1, "*", Some(&cookie.encode())))
            .unwrap();
        assert_eq!(replies[0][5], ERRDOS);
    }
}
