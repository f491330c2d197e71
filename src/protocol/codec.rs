use crate::protocol::{Query, Reply};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

// Same cap the store applies to a single bulk string by default.
const BULK_LEN_MAX: i64 = 512 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("Invalid reply type byte {0:#04x}")]
    InvalidType(u8),
    #[error("Invalid integer '{0}'")]
    InvalidInteger(String),
    #[error("Invalid length {0}")]
    InvalidLength(i64),
    #[error("Missing CRLF terminator")]
    MissingCrlf,
    #[error("IO error")]
    Io(#[from] io::Error),
}

/// RESP2 framing. Queries are encoded as arrays of bulk strings; the decoder yields one complete
/// `Reply` at a time and leaves partial input in the buffer until more bytes arrive.
///
/// Replies can also be encoded so the same codec serves both ends of a stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Reply;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut parser = Parser { data: src.as_ref(), pos: 0 };
        match parser.parse_reply()? {
            Some(reply) => {
                let consumed = parser.pos;
                src.advance(consumed);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

impl<'a> Encoder<&'a Query> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, query: &'a Query, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_header(dst, b'*', query.len() as i64);
        for arg in query.args() {
            put_bulk(dst, arg);
        }

        Ok(())
    }
}

impl<'a> Encoder<&'a Reply> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, reply: &'a Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match reply {
            Reply::Status(s) => put_line(dst, b'+', s.as_bytes()),
            Reply::Error(s) => put_line(dst, b'-', s.as_bytes()),
            Reply::Integer(i) => put_header(dst, b':', *i),
            Reply::Bulk(b) => put_bulk(dst, b),
            Reply::Nil => put_header(dst, b'$', -1),
            Reply::Array(items) => {
                put_header(dst, b'*', items.len() as i64);
                for item in items {
                    self.encode(item, dst)?;
                }
            }
        }

        Ok(())
    }
}

fn put_line(dst: &mut BytesMut, prefix: u8, line: &[u8]) {
    dst.reserve(line.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(line);
    dst.put_slice(b"\r\n");
}

fn put_header(dst: &mut BytesMut, prefix: u8, value: i64) {
    put_line(dst, prefix, value.to_string().as_bytes());
}

fn put_bulk(dst: &mut BytesMut, data: &Bytes) {
    put_header(dst, b'$', data.len() as i64);
    dst.reserve(data.len() + 2);
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Cursor over the undecoded input. Every `parse_*` returns `Ok(None)` with the cursor rolled back
/// when the input ends before the reply does.
struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_reply(&mut self) -> Result<Option<Reply>, RespError> {
        let start = self.pos;
        let prefix = match self.data.get(self.pos) {
            Some(b) => *b,
            None => return Ok(None),
        };
        self.pos += 1;

        let reply = match prefix {
            b'+' => self.read_line()?.map(|l| Reply::Status(String::from_utf8_lossy(l).into_owned())),
            b'-' => self.read_line()?.map(|l| Reply::Error(String::from_utf8_lossy(l).into_owned())),
            b':' => self.read_integer()?.map(Reply::Integer),
            b'$' => self.parse_bulk()?,
            b'*' => self.parse_array()?,
            other => return Err(RespError::InvalidType(other)),
        };

        if reply.is_none() {
            self.pos = start;
        }
        Ok(reply)
    }

    fn parse_bulk(&mut self) -> Result<Option<Reply>, RespError> {
        let len = match self.read_integer()? {
            Some(len) => len,
            None => return Ok(None),
        };
        if len < 0 {
            return Ok(Some(Reply::Nil));
        }
        if len > BULK_LEN_MAX {
            return Err(RespError::InvalidLength(len));
        }

        let len = len as usize;
        if self.data.len() < self.pos + len + 2 {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        if &self.data[self.pos..self.pos + 2] != b"\r\n" {
            return Err(RespError::MissingCrlf);
        }
        self.pos += 2;

        Ok(Some(Reply::Bulk(data)))
    }

    fn parse_array(&mut self) -> Result<Option<Reply>, RespError> {
        let len = match self.read_integer()? {
            Some(len) => len,
            None => return Ok(None),
        };
        if len < 0 {
            return Ok(Some(Reply::Nil));
        }

        // Don't trust the announced length for preallocation.
        let mut items = Vec::with_capacity((len as usize).min(1024));
        for _ in 0..len {
            match self.parse_reply()? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }

        Ok(Some(Reply::Array(items)))
    }

    fn read_line(&mut self) -> Result<Option<&'a [u8]>, RespError> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let cr = match rest.iter().position(|b| *b == b'\r') {
            Some(cr) => cr,
            None => return Ok(None),
        };

        match rest.get(cr + 1) {
            None => Ok(None),
            Some(b'\n') => {
                self.pos += cr + 2;
                Ok(Some(&rest[..cr]))
            }
            Some(_) => Err(RespError::MissingCrlf),
        }
    }

    fn read_integer(&mut self) -> Result<Option<i64>, RespError> {
        let line = match self.read_line()? {
            Some(line) => line,
            None => return Ok(None),
        };

        let text = String::from_utf8_lossy(line);
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| RespError::InvalidInteger(text.into_owned()))
    }
}
