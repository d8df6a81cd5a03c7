//! Just enough HTTP/1.1 to run a CONNECT handshake.
//!
//! Requests are written directly; responses are parsed with `httparse`. The reader keeps any bytes
//! received after the end of a response so that nothing the proxy sends through an established
//! tunnel gets lost.


use std::io::{self, Read, Write};

use httparse::Status;
use tracing::trace;

use crate::error::HandshakeError;


/// The maximum number of header lines accepted in a proxy response.
const MAX_HEADERS: usize = 64;

/// How much is read from the stream at a time.
const READ_CHUNK_LEN: usize = 4096;


/// The status line and headers of a response from the proxy.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub reason: String,

    /// Header names (lowercase) and values, in order of arrival.
    pub headers: Vec<(String, String)>,
}
impl ProxyResponse {
    /// Returns the values of all headers with the given name, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers.iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value of the first header with the given name.
    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.header_values(name).next()
    }

    /// Whether this response to a CONNECT request is followed by a body.
    fn has_body(&self) -> bool {
        // a successful CONNECT turns the connection into a tunnel
        !(self.status < 200 || (200..300).contains(&self.status) || self.status == 204 || self.status == 304)
    }
}


/// Writes a CONNECT request for `target` carrying the given `Proxy-Authorization` value.
pub fn write_connect<W: Write + ?Sized>(stream: &mut W, target: &str, authorization: &str) -> io::Result<()> {
    let request = format!(
        "CONNECT {target} HTTP/1.1\r\n\
         Host: {target}\r\n\
         Proxy-Authorization: {authorization}\r\n\
         Proxy-Connection: Keep-Alive\r\n\
         \r\n",
    );
    stream.write_all(request.as_bytes())?;
    stream.flush()
}


/// Reads consecutive responses from a proxy connection.
#[derive(Debug)]
pub struct ResponseReader {
    buffer: Vec<u8>,
    max_header_bytes: usize,
}
impl ResponseReader {
    /// Creates a reader that rejects response heads longer than `max_header_bytes`.
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_header_bytes,
        }
    }

    /// Reads one response head and skips its body.
    pub fn read_response<R: Read + ?Sized>(&mut self, stream: &mut R) -> Result<ProxyResponse, HandshakeError> {
        let response = loop {
            if let Some((response, head_len)) = parse_head(&self.buffer)? {
                self.buffer.drain(..head_len);
                break response;
            }
            if self.buffer.len() >= self.max_header_bytes {
                return Err(HandshakeError::MalformedResponse(format!(
                    "response header exceeds {} bytes", self.max_header_bytes,
                )));
            }
            self.fill(stream)?;
        };
        trace!(status = response.status, reason = %response.reason, "proxy response");

        if response.has_body() {
            self.skip_body(stream, &response)?;
        }
        Ok(response)
    }

    /// Returns the bytes that were received after the last response.
    pub fn into_buffered(self) -> Vec<u8> {
        self.buffer
    }

    fn fill<R: Read + ?Sized>(&mut self, stream: &mut R) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK_LEN];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed the connection",
                )),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(());
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn skip_body<R: Read + ?Sized>(&mut self, stream: &mut R, response: &ProxyResponse) -> Result<(), HandshakeError> {
        let chunked = response.header_values("transfer-encoding")
            .any(|v| v.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return self.skip_chunked(stream);
        }

        match response.header("content-length") {
            Some(value) => {
                let length: usize = value.parse()
                    .map_err(|_| HandshakeError::MalformedResponse(format!("invalid Content-Length {:?}", value)))?;
                trace!(length, "skipping response body");
                self.skip_exact(stream, length)?;
            },
            None => {
                // no framing; proxies answering CONNECT with neither header send no body
                trace!(status = response.status, "response body has no length, assuming none");
            },
        }
        Ok(())
    }

    fn skip_exact<R: Read + ?Sized>(&mut self, stream: &mut R, mut length: usize) -> io::Result<()> {
        loop {
            let buffered = length.min(self.buffer.len());
            self.buffer.drain(..buffered);
            length -= buffered;
            if length == 0 {
                return Ok(());
            }
            self.fill(stream)?;
        }
    }

    fn skip_chunked<R: Read + ?Sized>(&mut self, stream: &mut R) -> Result<(), HandshakeError> {
        loop {
            match httparse::parse_chunk_size(&self.buffer) {
                Ok(Status::Complete((consumed, size))) => {
                    self.buffer.drain(..consumed);
                    if size == 0 {
                        return self.skip_trailers(stream);
                    }
                    let size: usize = size.try_into()
                        .map_err(|_| HandshakeError::MalformedResponse(format!("chunk of {} bytes", size)))?;
                    // chunk data and its CRLF
                    let framed = size.checked_add(2)
                        .ok_or_else(|| HandshakeError::MalformedResponse(format!("chunk of {} bytes", size)))?;
                    self.skip_exact(stream, framed)?;
                },
                Ok(Status::Partial) => {
                    if self.buffer.len() >= self.max_header_bytes {
                        return Err(HandshakeError::MalformedResponse("chunk size line too long".to_owned()));
                    }
                    self.fill(stream)?;
                },
                Err(_) => return Err(HandshakeError::MalformedResponse("invalid chunk size".to_owned())),
            }
        }
    }

    fn skip_trailers<R: Read + ?Sized>(&mut self, stream: &mut R) -> Result<(), HandshakeError> {
        loop {
            match self.buffer.windows(2).position(|w| w == b"\r\n") {
                Some(0) => {
                    self.buffer.drain(..2);
                    return Ok(());
                },
                Some(line_len) => {
                    self.buffer.drain(..line_len + 2);
                },
                None => {
                    if self.buffer.len() >= self.max_header_bytes {
                        return Err(HandshakeError::MalformedResponse("trailer line too long".to_owned()));
                    }
                    self.fill(stream)?;
                },
            }
        }
    }
}

/// Parses a response head, returning it with its length once it is complete.
fn parse_head(buffer: &[u8]) -> Result<Option<(ProxyResponse, usize)>, HandshakeError> {
    if buffer.is_empty() {
        return Ok(None);
    }
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let head_len = match response.parse(buffer)? {
        Status::Complete(len) => len,
        Status::Partial => return Ok(None),
    };

    let status = response.code
        .ok_or_else(|| HandshakeError::MalformedResponse("missing status code".to_owned()))?;
    let reason = response.reason.unwrap_or("").to_owned();
    let headers = response.headers.iter()
        .map(|h| (
            h.name.to_ascii_lowercase(),
            String::from_utf8_lossy(h.value).trim().to_owned(),
        ))
        .collect();

    Ok(Some((
        ProxyResponse {
            status,
            reason,
            headers,
        },
        head_len,
    )))
}
