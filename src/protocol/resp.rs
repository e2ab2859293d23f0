//! RESP Codec Module
//!
//! Streaming parser and serializer for the length-prefixed request/reply
//! line protocol. Five variants, each line terminated by CRLF:
//!
//! - Simple string: `+<text>\r\n`
//! - Error: `-<text>\r\n`
//! - Integer: `:<signed-decimal>\r\n`
//! - Bulk string: `$<n>\r\n<n bytes>\r\n`, with `$-1\r\n` denoting nil
//! - Array: `*<n>\r\n<n values>`

use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{HpcsError, Result};

// == Type Tags ==
pub const SIMPLE_STRING: u8 = b'+';
pub const ERROR: u8 = b'-';
pub const INTEGER: u8 = b':';
pub const BULK_STRING: u8 = b'$';
pub const ARRAY: u8 = b'*';

// == Value ==
/// A protocol value, request or reply.
///
/// The nil bulk string (`$-1\r\n`) is its own variant, distinct from the
/// empty bulk string (`$0\r\n\r\n`): an empty string is a legal stored
/// value, a nil bulk is the miss marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Value>),
}

impl Value {
    // == Constructors ==
    pub fn simple(text: impl Into<String>) -> Self {
        Value::Simple(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Value::Error(text.into())
    }

    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bulk(bytes.into())
    }

    /// The canonical `+OK` reply.
    pub fn ok() -> Self {
        Value::Simple("OK".to_string())
    }

    // == Marshal ==
    /// Serializes the value to wire bytes.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Value::Simple(text) => {
                out.push(SIMPLE_STRING);
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Error(text) => {
                out.push(ERROR);
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Integer(number) => {
                out.push(INTEGER);
                out.extend_from_slice(number.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Bulk(bytes) => {
                out.push(BULK_STRING);
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            Value::Null => {
                out.extend_from_slice(b"$-1\r\n");
            }
            Value::Array(items) => {
                out.push(ARRAY);
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }
}

// == Parser ==
/// Streaming parser over a buffered byte source.
///
/// One `Parser` wraps one connection's read half and yields one frame per
/// `parse` call. End-of-stream between frames is the ordinary
/// connection-close signal (`Ok(None)`); end-of-stream mid-frame surfaces
/// as an I/O error.
pub struct Parser<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin + Send> Parser<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    // == Parse ==
    /// Reads one complete frame, or `None` on clean end-of-stream.
    pub async fn parse(&mut self) -> Result<Option<Value>> {
        let tag = match self.reader.read_u8().await {
            Ok(tag) => tag,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        self.parse_tagged(tag).await.map(Some)
    }

    async fn parse_tagged(&mut self, tag: u8) -> Result<Value> {
        match tag {
            SIMPLE_STRING => Ok(Value::Simple(self.read_line().await?)),
            ERROR => Ok(Value::Error(self.read_line().await?)),
            INTEGER => self.parse_integer().await,
            BULK_STRING => self.parse_bulk_string().await,
            ARRAY => self.parse_array().await,
            other => Err(HpcsError::InvalidType(other)),
        }
    }

    async fn parse_integer(&mut self) -> Result<Value> {
        let line = self.read_line().await?;
        let number = line.parse::<i64>().map_err(|_| HpcsError::InvalidProtocol)?;
        Ok(Value::Integer(number))
    }

    async fn parse_bulk_string(&mut self) -> Result<Value> {
        let length = self.read_length().await?;

        if length == -1 {
            return Ok(Value::Null);
        }
        if length < 0 {
            return Err(HpcsError::InvalidProtocol);
        }

        // payload plus the trailing CRLF, which must be exactly CRLF
        let mut data = vec![0u8; length as usize + 2];
        self.reader.read_exact(&mut data).await?;

        if data[length as usize] != b'\r' || data[length as usize + 1] != b'\n' {
            return Err(HpcsError::InvalidProtocol);
        }

        data.truncate(length as usize);
        Ok(Value::Bulk(data))
    }

    async fn parse_array(&mut self) -> Result<Value> {
        let count = self.read_length().await?;

        if count < 0 {
            return Err(HpcsError::InvalidProtocol);
        }

        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(self.parse_element().await?);
        }

        Ok(Value::Array(items))
    }

    /// Array elements recurse through a boxed future; async fns cannot
    /// otherwise call themselves.
    fn parse_element<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            let tag = self.reader.read_u8().await?;
            self.parse_tagged(tag).await
        })
    }

    async fn read_length(&mut self) -> Result<i64> {
        let line = self.read_line().await?;
        line.parse::<i64>().map_err(|_| HpcsError::InvalidProtocol)
    }

    /// Reads one CRLF-terminated line, without the terminator.
    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;

        if n == 0 || !line.ends_with('\n') {
            return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        if !line.ends_with("\r\n") {
            return Err(HpcsError::InvalidProtocol);
        }

        line.truncate(line.len() - 2);
        Ok(line)
    }
}
