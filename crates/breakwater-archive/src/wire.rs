use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::record::ThreadRecord;

/// Schema version carried in the top bits of every record's first byte.
pub const RECORD_VERSION: u8 = 1;

const VERSION_MASK: u8 = 0b1110_0000;
const KIND_MASK: u8 = 0b0001_1111;

const RECORD_KIND_THREAD: u8 = 1;

/// Frame type tag for a thread record, as carried on the archivist socket.
pub const FRAME_TYPE_THREAD: u32 = 1;

/// Payload frames are capped well above any realistic thread; a larger length
/// prefix means a desynchronized peer.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown record kind: {0}")]
    UnknownRecordKind(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),
}

/// One length-prefixed message on the archivist socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u32,
    pub payload: Vec<u8>,
}

pub fn encode_thread_record(record: &ThreadRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    write_header(&mut buf, RECORD_KIND_THREAD);
    write_string(&mut buf, &record.board);
    write_string(&mut buf, &record.key);
    write_string(&mut buf, &record.url);
    write_var_u32(&mut buf, record.lines.len() as u32);
    for line in &record.lines {
        write_string(&mut buf, line);
    }
    write_var_u32(&mut buf, record.ground_line);
    write_var_u64(&mut buf, record.first_viewed);
    write_var_u64(&mut buf, record.last_viewed);
    write_var_u64(&mut buf, record.elapsed_secs);
    buf
}

pub fn decode_thread_record(bytes: &[u8]) -> Result<ThreadRecord, WireError> {
    let mut cursor = Cursor::new(bytes);
    let header = cursor.read_u8()?;
    let version = (header & VERSION_MASK) >> 5;
    if version != RECORD_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let kind = header & KIND_MASK;
    if kind != RECORD_KIND_THREAD {
        return Err(WireError::UnknownRecordKind(kind));
    }

    let board = cursor.read_string()?;
    let key = cursor.read_string()?;
    let url = cursor.read_string()?;
    let count = cursor.read_var_u32()? as usize;
    let mut lines = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        lines.push(cursor.read_string()?);
    }
    let ground_line = cursor.read_var_u32()?;
    let first_viewed = cursor.read_var_u64()?;
    let last_viewed = cursor.read_var_u64()?;
    let elapsed_secs = cursor.read_var_u64()?;

    Ok(ThreadRecord {
        board,
        key,
        url,
        lines,
        ground_line,
        first_viewed,
        last_viewed,
        elapsed_secs,
    })
}

/// Write one `type + length + payload` frame (both prefixes big-endian u32).
pub async fn write_frame<W>(writer: &mut W, frame_type: u32, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame_type.to_be_bytes()).await?;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one frame; `Ok(None)` on clean EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 8];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let frame_type = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let len = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            WireError::FrameTooLarge(len),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame {
        frame_type,
        payload,
    }))
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    debug_assert_eq!(kind & !KIND_MASK, 0);
    buf.push((RECORD_VERSION << 5) | (kind & KIND_MASK));
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_var_u32(buf, value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_var_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidData("invalid utf-8"))
    }
}
