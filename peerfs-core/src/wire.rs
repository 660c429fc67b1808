//! Framing. Discovery datagrams: length-prefix (4 bytes LE) + bincode payload.
//! Stream protocols: a single `\n`-terminated UTF-8 request line.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024; // one UDP datagram

/// Encode a message into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg: Message =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((msg, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Upper bound for a request or header line on a stream, terminator included.
pub const MAX_LINE_LEN: usize = 4096;

/// Read one `\n`-terminated line, without the terminator (a trailing `\r` is dropped too).
/// Reads byte by byte: the bytes after the terminator belong to whoever handles the stream next,
/// so nothing past it may be consumed. Give it a `BufReader` over a socket; each byte is then a
/// buffer lookup rather than a read call, and the buffer travels on with the stream.
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, LineError> {
    let mut buf = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(LineError::Unterminated)
            }
            Err(e) => return Err(LineError::Io(e)),
        };
        if byte == b'\n' {
            break;
        }
        if buf.len() + 1 >= MAX_LINE_LEN {
            return Err(LineError::TooLong);
        }
        buf.push(byte);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| LineError::NotUtf8)
}

/// Error reading a request line from a stream.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("stream closed before line terminator")]
    Unterminated,
    #[error("line exceeds maximum length")]
    TooLong,
    #[error("line is not valid UTF-8")]
    NotUtf8,
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}
