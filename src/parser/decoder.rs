//! Incremental request framing.

use std::collections::HashMap;
use std::str::FromStr;

use crate::parser::error::Error;
use crate::parser::method::Method;
use crate::parser::request::{find_header, HttpRequest};
use crate::parser::version::HttpVersion;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// Frames requests out of a buffer that grows as bytes arrive.
///
/// The decoder remembers how far it has scanned, so calling [`decode`] again
/// after every read only looks at the new bytes. Offsets are relative to the
/// start of the buffer: the caller must not drop bytes until a request is
/// returned, and then drops exactly the consumed count. The decoder resets
/// itself after each request.
///
/// [`decode`]: RequestDecoder::decode
#[derive(Debug, Default)]
pub struct RequestDecoder {
    state: State,
}

#[derive(Debug)]
enum State {
    Head { start: usize, scanned: usize },
    Body { head: Head, framing: Framing },
}

impl Default for State {
    fn default() -> Self {
        State::Head { start: 0, scanned: 0 }
    }
}

#[derive(Debug)]
struct Head {
    method: Method,
    target: String,
    version: HttpVersion,
    headers: HashMap<String, String>,
    body_start: usize,
}

#[derive(Debug)]
enum Framing {
    /// Body ends at this buffer offset.
    Length { end: usize },
    Chunked(ChunkedBody),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Size,
    Data(usize),
    Trailers,
}

#[derive(Debug)]
struct ChunkedBody {
    pos: usize,
    scanned: usize,
    phase: Phase,
    body: Vec<u8>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame one request from the front of `buf`.
    ///
    /// Returns `Ok(None)` while more bytes are needed, otherwise the request
    /// and the number of bytes it occupied.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Option<(HttpRequest, usize)>, Error> {
        if let State::Head { start, scanned } = &mut self.state {
            match scan_head(buf, start, scanned)? {
                Some(head) => {
                    let framing = framing(&head)?;
                    self.state = State::Body { head, framing };
                }
                None => return Ok(None),
            }
        }

        let end = match &mut self.state {
            State::Body { framing: Framing::Length { end }, .. } if buf.len() >= *end => *end,
            State::Body { framing: Framing::Chunked(chunked), .. } => match chunked.advance(buf)? {
                Some(end) => end,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let State::Body { head, framing } = std::mem::take(&mut self.state) else {
            return Ok(None);
        };
        let body = match framing {
            Framing::Length { end } => buf[head.body_start..end].to_vec(),
            Framing::Chunked(chunked) => chunked.body,
        };

        let request = HttpRequest::with_body(head.method, head.target, head.version, head.headers, body);
        Ok(Some((request, end)))
    }

    /// Total length of the pending request when its head declared a `Content-Length`.
    pub fn declared_len(&self) -> Option<usize> {
        match &self.state {
            State::Body { framing: Framing::Length { end }, .. } => Some(*end),
            _ => None,
        }
    }
}

/// Look for the end of the head, resuming where the last scan stopped.
fn scan_head(buf: &[u8], start: &mut usize, scanned: &mut usize) -> Result<Option<Head>, Error> {
    // Empty lines before the request line are ignored (RFC 9112, section 2.2)
    while buf.len() >= *start + CRLF.len() && &buf[*start..*start + CRLF.len()] == CRLF {
        *start += CRLF.len();
    }

    let from = (*scanned).max(*start);
    let Some(offset) = find(&buf[from..], HEAD_TERMINATOR) else {
        // Back up so a terminator split across reads is still found
        *scanned = buf
            .len()
            .saturating_sub(HEAD_TERMINATOR.len() - 1)
            .max(*start);
        return Ok(None);
    };

    let head_end = from + offset;
    let mut head = parse_head(&buf[*start..head_end])?;
    head.body_start = head_end + HEAD_TERMINATOR.len();
    Ok(Some(head))
}

fn parse_head(raw: &[u8]) -> Result<Head, Error> {
    let head = std::str::from_utf8(raw)
        .map_err(|_| Error::MalformedRequestLine("Invalid UTF-8".to_string()))?;

    let mut lines = head.split("\r\n");

    // Parse the request line
    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or(Error::EmptyRequest)?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(Error::MalformedRequestLine(request_line.to_string()));
    }

    let method = Method::from_str(parts[0])?;

    let target = parts[1];
    if !target.starts_with('/') {
        return Err(Error::InvalidPath);
    }

    let version = HttpVersion::from_str(parts[2])?;

    // Repeated fields are combined under the first spelling (RFC 9110, section 5.3)
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut spellings: HashMap<String, String> = HashMap::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(Error::InvalidHeaderFormat)?;
        let (name, value) = (name.trim(), value.trim());

        match spellings.get(&name.to_ascii_lowercase()) {
            Some(first) => {
                if let Some(combined) = headers.get_mut(first) {
                    combined.push_str(", ");
                    combined.push_str(value);
                }
            }
            None => {
                spellings.insert(name.to_ascii_lowercase(), name.to_string());
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }

    if version == HttpVersion::Http11 && find_header(&headers, "Host").is_none() {
        return Err(Error::MissingHeader("Host".to_string()));
    }

    Ok(Head {
        method,
        target: target.to_string(),
        version,
        headers,
        body_start: 0,
    })
}

fn framing(head: &Head) -> Result<Framing, Error> {
    let chunked = find_header(&head.headers, "Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Ok(Framing::Chunked(ChunkedBody::new(head.body_start)));
    }

    let length = match find_header(&head.headers, "Content-Length") {
        Some(value) => content_length(value)?,
        None => 0,
    };
    let end = head
        .body_start
        .checked_add(length)
        .ok_or_else(|| Error::InvalidContentLength(length.to_string()))?;

    Ok(Framing::Length { end })
}

/// Parse a (possibly combined) `Content-Length` value. Repeated values must
/// agree (RFC 9112, section 6.3).
fn content_length(value: &str) -> Result<usize, Error> {
    let invalid = || Error::InvalidContentLength(value.to_string());

    let mut lengths = value.split(',').map(|v| v.trim().parse::<usize>());
    let first = lengths.next().and_then(Result::ok).ok_or_else(invalid)?;
    for length in lengths {
        if length.ok() != Some(first) {
            return Err(invalid());
        }
    }
    Ok(first)
}

impl ChunkedBody {
    fn new(pos: usize) -> Self {
        Self {
            pos,
            scanned: pos,
            phase: Phase::Size,
            body: Vec::new(),
        }
    }

    /// Decode as many chunks as `buf` holds. Returns the end offset of the
    /// body once the terminating chunk and trailers are in.
    fn advance(&mut self, buf: &[u8]) -> Result<Option<usize>, Error> {
        loop {
            match self.phase {
                Phase::Size => {
                    let Some(line_end) = self.next_line(buf) else {
                        return Ok(None);
                    };
                    let line = std::str::from_utf8(&buf[self.pos..line_end])
                        .map_err(|_| Error::InvalidChunk("Invalid UTF-8 in chunk size".to_string()))?;

                    // Chunk extensions after ';' are ignored
                    let size_field = line.split_once(';').map_or(line, |(size, _)| size).trim();
                    let size = usize::from_str_radix(size_field, 16)
                        .map_err(|_| Error::InvalidChunk(line.to_string()))?;

                    self.pos = line_end + CRLF.len();
                    self.phase = if size == 0 { Phase::Trailers } else { Phase::Data(size) };
                }
                Phase::Data(size) => {
                    let data_end = self
                        .pos
                        .checked_add(size)
                        .ok_or_else(|| Error::InvalidChunk(format!("{size:x}")))?;
                    if buf.len() < data_end || buf.len() - data_end < CRLF.len() {
                        return Ok(None);
                    }
                    if &buf[data_end..data_end + CRLF.len()] != CRLF {
                        return Err(Error::InvalidChunk("Missing CRLF after chunk data".to_string()));
                    }

                    self.body.extend_from_slice(&buf[self.pos..data_end]);
                    self.pos = data_end + CRLF.len();
                    self.phase = Phase::Size;
                }
                Phase::Trailers => {
                    let Some(line_end) = self.next_line(buf) else {
                        return Ok(None);
                    };
                    let last = line_end == self.pos;
                    self.pos = line_end + CRLF.len();
                    if last {
                        return Ok(Some(self.pos));
                    }
                }
            }
        }
    }

    /// End of the line starting at `pos`, resuming the previous search.
    fn next_line(&mut self, buf: &[u8]) -> Option<usize> {
        let from = self.scanned.max(self.pos);
        match find(&buf[from..], CRLF) {
            Some(offset) => {
                let end = from + offset;
                self.scanned = end + CRLF.len();
                Some(end)
            }
            None => {
                self.scanned = buf.len().saturating_sub(CRLF.len() - 1).max(self.pos);
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
