//! Bounds-checked wire cursors and the SMB1 header codec.
//!
//! All request parsing goes through [`PacketReader`] and all reply
//! serialization through [`PacketWriter`], so offset arithmetic is checked
//! in exactly one place. A writer that runs out of room reports
//! [`SmbError::OutOfSpace`], which the search handlers use as their normal
//! backpressure signal.

use crate::smb::types::SmbError;

pub const SMB_MAGIC: [u8; 4] = [0xFF, b'S', b'M', b'B'];
pub const HEADER_LEN: usize = 32;

pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8, SmbError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(SmbError::Desync("request truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16_le(&mut self) -> Result<u16, SmbError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32, SmbError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], SmbError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(SmbError::Desync("request truncated"))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    /// NUL-terminated ASCII string; consumes the terminator.
    pub fn cstr(&mut self) -> Result<String, SmbError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(SmbError::Desync("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}

/// Append-only writer with a hard capacity limit.
pub struct PacketWriter {
    buf: Vec<u8>,
    limit: usize,
}

impl PacketWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(4096)),
            limit,
        }
    }

    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    pub fn space_left(&self) -> usize {
        self.limit - self.buf.len()
    }

    fn ensure(&mut self, n: usize) -> Result<(), SmbError> {
        if self.buf.len() + n > self.limit {
            return Err(SmbError::OutOfSpace);
        }
        Ok(())
    }

    pub fn u8(&mut self, v: u8) -> Result<(), SmbError> {
        self.ensure(1)?;
        self.buf.push(v);
        Ok(())
    }

    pub fn u16_le(&mut self, v: u16) -> Result<(), SmbError> {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32_le(&mut self, v: u32) -> Result<(), SmbError> {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u64_le(&mut self, v: u64) -> Result<(), SmbError> {
        self.bytes(&v.to_le_bytes())
    }

    pub fn bytes(&mut self, v: &[u8]) -> Result<(), SmbError> {
        self.ensure(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Zero-pad so that the next write lands on an `align`-byte boundary
    /// measured from the start of the buffer.
    pub fn align(&mut self, align: usize) -> Result<(), SmbError> {
        while self.buf.len() % align != 0 {
            self.u8(0)?;
        }
        Ok(())
    }

    pub fn patch_u16_le(&mut self, at: usize, v: u16) {
        self.buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn patch_u32_le(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// The fixed 32-byte SMB1 header, minus the fields this server never
/// inspects (signing, high PID).
#[derive(Debug, Clone, Copy)]
pub struct SmbHeader {
    pub command: u8,
    pub flags: u8,
    pub flags2: u16,
    pub tid: u16,
    pub pid: u16,
    pub uid: u16,
    pub mid: u16,
}

pub const FLAG_REPLY: u8 = 0x80;

/// A parsed request: header plus the word and byte blocks.
pub struct SmbRequest<'a> {
    pub header: SmbHeader,
    /// Raw packet including the header; TRANS2 offsets are relative to it.
    pub raw: &'a [u8],
    vwv: &'a [u8],
    pub bytes: &'a [u8],
}

impl<'a> SmbRequest<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, SmbError> {
        if buf.len() < HEADER_LEN + 1 || buf[..4] != SMB_MAGIC {
            return Err(SmbError::Desync("bad SMB header"));
        }
        let header = SmbHeader {
            command: buf[4],
            flags: buf[9],
            flags2: u16::from_le_bytes([buf[10], buf[11]]),
            tid: u16::from_le_bytes([buf[24], buf[25]]),
            pid: u16::from_le_bytes([buf[26], buf[27]]),
            uid: u16::from_le_bytes([buf[28], buf[29]]),
            mid: u16::from_le_bytes([buf[30], buf[31]]),
        };
        let wct = buf[HEADER_LEN] as usize;
        let vwv_end = HEADER_LEN + 1 + wct * 2;
        if buf.len() < vwv_end + 2 {
            return Err(SmbError::Desync("word block truncated"));
        }
        let vwv = &buf[HEADER_LEN + 1..vwv_end];
        let bcc = u16::from_le_bytes([buf[vwv_end], buf[vwv_end + 1]]) as usize;
        let data_start = vwv_end + 2;
        if buf.len() < data_start + bcc {
            return Err(SmbError::Desync("byte block truncated"));
        }
        let bytes = &buf[data_start..data_start + bcc];
        Ok(Self {
            header,
            raw: buf,
            vwv,
            bytes,
        })
    }

    pub fn word_count(&self) -> usize {
        self.vwv.len() / 2
    }

    pub fn word(&self, i: usize) -> Result<u16, SmbError> {
        let off = i * 2;
        if off + 2 > self.vwv.len() {
            return Err(SmbError::Desync("missing parameter word"));
        }
        Ok(u16::from_le_bytes([self.vwv[off], self.vwv[off + 1]]))
    }

    pub fn dword(&self, i: usize) -> Result<u32, SmbError> {
        Ok(self.word(i)? as u32 | (self.word(i + 1)? as u32) << 16)
    }
}

/// One outgoing reply packet under construction: header, word block,
/// then an open-ended byte block.
pub struct ReplyFrame {
    w: PacketWriter,
    wct: usize,
    data_start: usize,
}

impl ReplyFrame {
    pub fn new(req: &SmbHeader, word_count: u8, limit: usize) -> Self {
        Self::with_status(req, word_count, limit, (0, 0))
    }

    pub fn with_status(req: &SmbHeader, word_count: u8, limit: usize, status: (u8, u16)) -> Self {
        let mut w = PacketWriter::new(limit);
        let (class, code) = status;
        // The fixed part always fits: callers size `limit` >= header room.
        let _ = w.bytes(&SMB_MAGIC);
        let _ = w.u8(req.command);
        let _ = w.u8(class);
        let _ = w.u8(0);
        let _ = w.u16_le(code);
        let _ = w.u8(req.flags | FLAG_REPLY);
        let _ = w.u16_le(req.flags2);
        let _ = w.bytes(&[0u8; 12]); // pid_high, signature, reserved
        let _ = w.u16_le(req.tid);
        let _ = w.u16_le(req.pid);
        let _ = w.u16_le(req.uid);
        let _ = w.u16_le(req.mid);
        let _ = w.u8(word_count);
        for _ in 0..word_count {
            let _ = w.u16_le(0);
        }
        let _ = w.u16_le(0); // byte count, patched in finish()
        let data_start = w.pos();
        Self {
            w,
            wct: word_count as usize,
            data_start,
        }
    }

    /// Error reply: empty word and byte blocks, DOS status in the header.
    pub fn error(req: &SmbHeader, err: &SmbError) -> Vec<u8> {
        Self::with_status(req, 0, HEADER_LEN + 3, err.dos_code()).finish()
    }

    pub fn set_word(&mut self, i: usize, v: u16) {
        debug_assert!(i < self.wct);
        self.w.patch_u16_le(HEADER_LEN + 1 + i * 2, v);
    }

    /// Writer positioned in the byte block. `PacketWriter::pos` is the
    /// offset from the start of the SMB header, which is what TRANS2
    /// offset fields want.
    pub fn data(&mut self) -> &mut PacketWriter {
        &mut self.w
    }

    pub fn data_len(&self) -> usize {
        self.w.pos() - self.data_start
    }

    pub fn finish(mut self) -> Vec<u8> {
        let bcc = self.data_len() as u16;
        self.w.patch_u16_le(self.data_start - 2, bcc);
        self.w.into_vec()
    }
}
