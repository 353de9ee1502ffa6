//! NetBIOS session service framing (RFC 1002 section 4.3).
//!
//! Every SMB packet travels inside a session frame: one type byte, a
//! 24-bit big-endian length, then the payload. The server also answers
//! the session-request handshake old clients send before any SMB traffic.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SESSION_MESSAGE: u8 = 0x00;
pub const SESSION_REQUEST: u8 = 0x81;
pub const SESSION_POSITIVE_RESPONSE: u8 = 0x82;
pub const SESSION_KEEPALIVE: u8 = 0x85;

/// Frames larger than the 17-bit NBT length field cannot exist.
pub const MAX_FRAME: usize = 0x1FFFF;

pub fn encode_header(frame_type: u8, len: usize) -> [u8; 4] {
    debug_assert!(len <= MAX_FRAME);
    [
        frame_type,
        ((len >> 16) & 0x01) as u8,
        ((len >> 8) & 0xFF) as u8,
        (len & 0xFF) as u8,
    ]
}

pub fn decode_header(hdr: [u8; 4]) -> (u8, usize) {
    let len = ((hdr[1] as usize & 0x01) << 16) | ((hdr[2] as usize) << 8) | hdr[3] as usize;
    (hdr[0], len)
}

/// Read one whole frame. `Ok(None)` is a clean EOF between frames; EOF in
/// the middle of one is an error, as is an oversized length.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut hdr = [0u8; 4];
    match r.read_exact(&mut hdr).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let (frame_type, len) = decode_header(hdr);
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(Some((frame_type, payload)))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    frame_type: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    w.write_all(&encode_header(frame_type, payload.len())).await?;
    w.write_all(payload).await?;
    w.flush().await
}
