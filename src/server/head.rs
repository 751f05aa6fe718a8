//! Reading and parsing an HTTP/1 request head off a raw transport.

use axum::http::{header, request::Parts, HeaderName, HeaderValue, Request, Version};
use bytes::{Bytes, BytesMut};
use httparse::Status;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_HEADERS: usize = 64;
const INITIAL_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection closed before a request was received")]
    Closed,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request head: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed request head and every byte read so far.
#[derive(Debug)]
pub struct RequestHead {
    pub parts: Parts,
    buffer: Bytes,
    head_len: usize,
}

impl RequestHead {
    /// All bytes read from the transport, head included.
    pub fn buffer(&self) -> Bytes {
        self.buffer.clone()
    }

    /// Bytes that followed the head.
    pub fn leftover(&self) -> Bytes {
        self.buffer.slice(self.head_len..)
    }

    /// `true` when the client asks to switch protocols.
    pub fn is_upgrade(&self) -> bool {
        self.parts.headers.contains_key(header::UPGRADE)
    }

    pub fn into_parts(self) -> (Parts, Bytes, Bytes) {
        let leftover = self.leftover();
        (self.parts, self.buffer, leftover)
    }
}

/// Read until a complete request head is buffered.
pub async fn read_request_head<S>(stream: &mut S, max_bytes: usize) -> Result<RequestHead, HeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER.min(max_bytes.max(1)));

    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                HeadError::Closed
            } else {
                HeadError::Malformed("truncated request head".to_string())
            });
        }

        if let Some((parts, head_len)) = parse_head(&buf)? {
            return Ok(RequestHead {
                parts,
                buffer: buf.freeze(),
                head_len,
            });
        }

        if buf.len() >= max_bytes {
            return Err(HeadError::TooLarge(max_bytes));
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<(Parts, usize)>, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(Status::Complete(len)) => len,
        Ok(Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(HeadError::TooLarge(buf.len()));
        }
        Err(e) => return Err(HeadError::Malformed(e.to_string())),
    };

    let method = req.method.ok_or_else(|| HeadError::Malformed("missing method".into()))?;
    let path = req.path.ok_or_else(|| HeadError::Malformed("missing path".into()))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = Request::builder().method(method).uri(path).version(version);
    for h in req.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| HeadError::Malformed(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|e| HeadError::Malformed(e.to_string()))?;
        builder = builder.header(name, value);
    }

    let request = builder
        .body(())
        .map_err(|e| HeadError::Malformed(e.to_string()))?;
    Ok(Some((request.into_parts().0, head_len)))
}
