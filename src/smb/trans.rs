//! TRANS2 transaction reassembly and reply pagination.
//!
//! An incoming transaction declares its total parameter and data sizes up
//! front and may dribble the bytes in across secondary packets, each
//! carrying a displacement. [`PendingTransaction`] collects them; a client
//! that sends more than it declared has desynchronized and the connection
//! is aborted. On the way out, [`send_paginated`] splits an arbitrarily
//! large parameter/data payload across as many reply packets as the
//! negotiated buffer size requires.

use crate::smb::types::SmbError;
use crate::smb::wire::{ReplyFrame, SmbHeader};

pub struct PendingTransaction {
    pub subcommand: u16,
    pub max_param_return: usize,
    pub max_data_return: usize,
    params: Vec<u8>,
    data: Vec<u8>,
    /// Bytes received so far; may never exceed the declared totals.
    got_param: usize,
    got_data: usize,
}

impl PendingTransaction {
    pub fn begin(
        subcommand: u16,
        total_param: usize,
        total_data: usize,
        max_param_return: usize,
        max_data_return: usize,
    ) -> Self {
        Self {
            subcommand,
            max_param_return,
            max_data_return,
            params: vec![0; total_param],
            data: vec![0; total_data],
            got_param: 0,
            got_data: 0,
        }
    }

    /// Copy one packet's parameter and data slices into place.
    pub fn append(
        &mut self,
        param: &[u8],
        param_disp: usize,
        data: &[u8],
        data_disp: usize,
    ) -> Result<(), SmbError> {
        let p_end = param_disp
            .checked_add(param.len())
            .filter(|&e| e <= self.params.len())
            .ok_or(SmbError::Desync("transaction parameter overrun"))?;
        let d_end = data_disp
            .checked_add(data.len())
            .filter(|&e| e <= self.data.len())
            .ok_or(SmbError::Desync("transaction data overrun"))?;
        if self.got_param + param.len() > self.params.len()
            || self.got_data + data.len() > self.data.len()
        {
            return Err(SmbError::Desync("transaction byte count overrun"));
        }
        self.params[param_disp..p_end].copy_from_slice(param);
        self.data[data_disp..d_end].copy_from_slice(data);
        self.got_param += param.len();
        self.got_data += data.len();
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.got_param >= self.params.len() && self.got_data >= self.data.len()
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

// Response word block: 10 words as laid out in `set_reply_words`.
const REPLY_WORDS: u8 = 10;
// Header + word count byte + 10 words + byte count.
const REPLY_FIXED: usize = 32 + 1 + REPLY_WORDS as usize * 2 + 2;

fn set_reply_words(
    frame: &mut ReplyFrame,
    totals: (usize, usize),
    param: (usize, usize, usize),
    data: (usize, usize, usize),
) {
    frame.set_word(0, totals.0 as u16);
    frame.set_word(1, totals.1 as u16);
    // word 2 reserved
    frame.set_word(3, param.0 as u16); // count this packet
    frame.set_word(4, param.1 as u16); // offset within packet
    frame.set_word(5, param.2 as u16); // displacement within whole block
    frame.set_word(6, data.0 as u16);
    frame.set_word(7, data.1 as u16);
    frame.set_word(8, data.2 as u16);
    frame.set_word(9, 0); // setup count 0, reserved
}

/// Paginate a reply payload. Parameters fill each packet before data; the
/// parameter block is 4-aligned from the packet start and the data block is
/// 4-aligned after it, with padding only when data bytes are present
/// (metadata-only replies stay unpadded for older clients). Even an empty
/// payload produces one packet.
pub fn send_paginated(
    req: &SmbHeader,
    params: &[u8],
    data: &[u8],
    max_xmit: usize,
) -> Result<Vec<Vec<u8>>, SmbError> {
    if max_xmit < REPLY_FIXED + 8 {
        return Err(SmbError::OutOfSpace);
    }
    let mut out = Vec::new();
    let mut p_sent = 0usize;
    let mut d_sent = 0usize;
    loop {
        let mut frame = ReplyFrame::new(req, REPLY_WORDS, max_xmit);
        let w = frame.data();
        w.align(4)?;
        let p_off = w.pos();
        let this_p = (params.len() - p_sent).min(w.space_left());
        w.bytes(&params[p_sent..p_sent + this_p])?;

        let mut this_d = 0usize;
        let mut d_off = 0usize;
        if !data.is_empty() {
            let pad = (4 - w.pos() % 4) % 4;
            let avail = w.space_left().saturating_sub(pad);
            this_d = (data.len() - d_sent).min(avail);
            if this_d > 0 {
                w.bytes(&[0u8; 3][..pad])?;
                d_off = w.pos();
                w.bytes(&data[d_sent..d_sent + this_d])?;
            }
        }

        set_reply_words(
            &mut frame,
            (params.len(), data.len()),
            (this_p, p_off, p_sent),
            (this_d, d_off, d_sent),
        );
        out.push(frame.finish());
        p_sent += this_p;
        d_sent += this_d;
        if p_sent >= params.len() && d_sent >= data.len() {
            return Ok(out);
        }
        if this_p == 0 && this_d == 0 {
            // No forward progress possible in a full packet.
            return Err(SmbError::OutOfSpace);
        }
    }
}
