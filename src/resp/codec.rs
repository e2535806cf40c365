use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::resp::Frame;

/// Streaming RESP decoder.
///
/// Feed raw network bytes with [`feed`](Decoder::feed) and pull complete
/// frames with [`decode`](Decoder::decode). A frame is only consumed from the
/// buffer once it has fully arrived, so a reply split across arbitrarily many
/// reads (including mid-array) decodes correctly.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    /// Creates a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the network.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to decode the next frame.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial frame.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut pos = 0;
        match parse_frame(&self.buf, &mut pos)? {
            Some(frame) => {
                self.buf.advance(pos);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

fn parse_frame(buf: &[u8], pos: &mut usize) -> Result<Option<Frame>> {
    let Some(&marker) = buf.get(*pos) else {
        return Ok(None);
    };
    *pos += 1;
    match marker {
        b'+' => Ok(parse_line(buf, pos)?.map(|line| Frame::SimpleString(line.to_vec()))),
        b'-' => Ok(parse_line(buf, pos)?.map(|line| Frame::Error(line.to_vec()))),
        b':' => match parse_line(buf, pos)? {
            Some(line) => Ok(Some(Frame::Integer(parse_int(line)?))),
            None => Ok(None),
        },
        b'$' => parse_bulk(buf, pos),
        b'*' => parse_array(buf, pos),
        other => Err(Error::Protocol {
            message: format!("unknown frame marker: {:?}", other as char),
        }),
    }
}

fn parse_bulk(buf: &[u8], pos: &mut usize) -> Result<Option<Frame>> {
    let Some(line) = parse_line(buf, pos)? else {
        return Ok(None);
    };
    let len = parse_int(line)?;
    if len < 0 {
        return Ok(Some(Frame::BulkString(None)));
    }
    let len = len as usize;
    if buf.len() < *pos + len + 2 {
        return Ok(None);
    }
    let data = BytesMut::from(&buf[*pos..*pos + len]).freeze();
    *pos += len + 2;
    Ok(Some(Frame::BulkString(Some(data))))
}

fn parse_array(buf: &[u8], pos: &mut usize) -> Result<Option<Frame>> {
    let Some(line) = parse_line(buf, pos)? else {
        return Ok(None);
    };
    let len = parse_int(line)?;
    if len < 0 {
        return Ok(Some(Frame::Null));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        match parse_frame(buf, pos)? {
            Some(frame) => items.push(frame),
            None => return Ok(None),
        }
    }
    Ok(Some(Frame::Array(items)))
}

/// Reads up to the next CRLF, advancing past it. `None` if the line has not
/// fully arrived yet.
fn parse_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a [u8]>> {
    let rest = &buf[*pos..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let line = &rest[..end];
            *pos += end + 2;
            Ok(Some(line))
        }
        None => Ok(None),
    }
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::Protocol {
            message: format!("invalid integer: {:?}", String::from_utf8_lossy(line)),
        })
}

/// RESP encoder writing into a reusable buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates an encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes a frame into the internal buffer.
    pub fn encode(&mut self, frame: &Frame) {
        match frame {
            Frame::SimpleString(s) => {
                self.buf.put_u8(b'+');
                self.buf.extend_from_slice(s);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::Error(e) => {
                self.buf.put_u8(b'-');
                self.buf.extend_from_slice(e);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                self.buf.put_u8(b':');
                self.buf.extend_from_slice(n.to_string().as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::BulkString(Some(data)) => {
                self.buf.put_u8(b'$');
                self.buf
                    .extend_from_slice(data.len().to_string().as_bytes());
                self.buf.extend_from_slice(b"\r\n");
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::BulkString(None) => {
                self.buf.extend_from_slice(b"$-1\r\n");
            }
            Frame::Array(items) => {
                self.buf.put_u8(b'*');
                self.buf
                    .extend_from_slice(items.len().to_string().as_bytes());
                self.buf.extend_from_slice(b"\r\n");
                for item in items {
                    self.encode(item);
                }
            }
            Frame::Null => {
                self.buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Drains the accumulated wire bytes, leaving the buffer empty for reuse.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}
