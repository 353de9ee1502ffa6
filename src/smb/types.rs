use bitflags::bitflags;
use thiserror::Error;

// SMB1 command codes handled by this server.
pub const SMB_COM_TRANSACTION2: u8 = 0x32;
pub const SMB_COM_TRANSACTION2_SECONDARY: u8 = 0x33;
pub const SMB_COM_FIND_CLOSE2: u8 = 0x34;
pub const SMB_COM_SEARCH: u8 = 0x81;
pub const SMB_COM_FIND: u8 = 0x82;
pub const SMB_COM_FIND_UNIQUE: u8 = 0x83;
pub const SMB_COM_FIND_CLOSE: u8 = 0x84;

// TRANS2 subcommands (setup word 0).
pub const TRANS2_FIND_FIRST2: u16 = 0x0001;
pub const TRANS2_FIND_NEXT2: u16 = 0x0002;

// Information levels for the FINDFIRST/FINDNEXT family.
pub const SMB_INFO_STANDARD: u16 = 0x0001;
pub const SMB_FIND_FILE_DIRECTORY_INFO: u16 = 0x0101;
pub const SMB_FIND_FILE_FULL_DIRECTORY_INFO: u16 = 0x0102;
pub const SMB_FIND_FILE_BOTH_DIRECTORY_INFO: u16 = 0x0104;

// DOS error classes.
pub const ERRDOS: u8 = 0x01;
pub const ERRSRV: u8 = 0x02;

// DOS error codes (class ERRDOS).
pub const ERR_BAD_FILE: u16 = 2;
pub const ERR_BAD_PATH: u16 = 3;
pub const ERR_NO_ACCESS: u16 = 5;
pub const ERR_BAD_FID: u16 = 6;
pub const ERR_NO_FILES: u16 = 18;
pub const ERR_UNKNOWN_LEVEL: u16 = 124;

// Server error codes (class ERRSRV).
pub const ERR_SRV_ERROR: u16 = 1;
pub const ERR_SRV_NO_SUPPORT: u16 = 0xFFFF;
pub const ERR_SRV_NO_RESOURCE: u16 = 89;

bitflags! {
    /// DOS file attribute bits, also used as search attribute masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttrs: u16 {
        const READ_ONLY = 0x0001;
        const HIDDEN = 0x0002;
        const SYSTEM = 0x0004;
        const VOLUME = 0x0008;
        const DIRECTORY = 0x0010;
        const ARCHIVE = 0x0020;
    }
}

impl FileAttrs {
    /// Attribute filter check: hidden, system and directory entries are
    /// only returned when the search mask asks for them.
    pub fn passes_filter(self, filter: FileAttrs) -> bool {
        let gated = self & (FileAttrs::HIDDEN | FileAttrs::SYSTEM | FileAttrs::DIRECTORY);
        filter.contains(gated)
    }
}

bitflags! {
    /// FINDFIRST2/FINDNEXT2 request flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FindFlags: u16 {
        const CLOSE_AFTER_REQUEST = 0x0001;
        const CLOSE_IF_END = 0x0002;
        const RETURN_RESUME_KEYS = 0x0004;
        const CONTINUE_FROM_LAST = 0x0008;
        const WITH_BACKUP_INTENT = 0x0010;
    }
}

/// Protocol-visible errors. Everything except [`SmbError::Desync`] is
/// reported to the client in the reply header and the connection lives on;
/// a desync aborts the connection outright.
#[derive(Debug, Error)]
pub enum SmbError {
    #[error("no more files")]
    NoMoreFiles,
    #[error("no such file")]
    NoSuchFile,
    #[error("bad search handle")]
    BadHandle,
    #[error("out of search handles")]
    OutOfHandles,
    #[error("unsupported information level {0:#06x}")]
    UnknownLevel(u16),
    #[error("path not found")]
    BadPath,
    #[error("access denied")]
    AccessDenied,
    #[error("command not supported")]
    Unsupported,
    #[error("reply does not fit the negotiated buffer")]
    OutOfSpace,
    #[error("protocol desync: {0}")]
    Desync(&'static str),
}

impl SmbError {
    /// DOS (class, code) pair placed into the reply header.
    pub fn dos_code(&self) -> (u8, u16) {
        match self {
            SmbError::NoMoreFiles => (ERRDOS, ERR_NO_FILES),
            SmbError::NoSuchFile => (ERRDOS, ERR_BAD_FILE),
            SmbError::BadHandle => (ERRDOS, ERR_BAD_FID),
            SmbError::OutOfHandles => (ERRSRV, ERR_SRV_NO_RESOURCE),
            SmbError::UnknownLevel(_) => (ERRDOS, ERR_UNKNOWN_LEVEL),
            SmbError::BadPath => (ERRDOS, ERR_BAD_PATH),
            SmbError::AccessDenied => (ERRDOS, ERR_NO_ACCESS),
            SmbError::Unsupported => (ERRSRV, ERR_SRV_NO_SUPPORT),
            SmbError::OutOfSpace => (ERRSRV, ERR_SRV_ERROR),
            SmbError::Desync(_) => (ERRSRV, ERR_SRV_ERROR),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SmbError::Desync(_))
    }
}

pub fn is_find_level(level: u16) -> bool {
    matches!(
        level,
        SMB_INFO_STANDARD
            | SMB_FIND_FILE_DIRECTORY_INFO
            | SMB_FIND_FILE_FULL_DIRECTORY_INFO
            | SMB_FIND_FILE_BOTH_DIRECTORY_INFO
    )
}
