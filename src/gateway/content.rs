//! Serving a random-access source as HTTP content.
//!
//! Handles `Range` (single and multiple byte ranges), the conditional request
//! headers that make sense without an entity tag, and `HEAD`. The body is
//! streamed from the source in fixed-size chunks, each one a separate
//! [`ReadAt::read_at`] call.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use tracing::warn;

use crate::error::{RelayError, Result};
use crate::io::ReadAt;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// What the gateway knows about the content it serves.
#[derive(Debug, Clone)]
pub struct ContentInfo {
    pub name: String,
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ContentInfo {
    /// Describe content named `name`; the type is guessed from its extension.
    pub fn new(name: impl Into<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        let name = name.into();
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();
        Self {
            name,
            content_type,
            last_modified,
        }
    }
}

/// One satisfiable byte range, already clamped to the content size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// Inclusive last byte.
    pub fn end(&self) -> u64 {
        self.start + self.length - 1
    }

    fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end(), size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// The header is not a valid `bytes=` range set.
    Malformed,
    /// No range in the set overlaps the content.
    Unsatisfiable,
}

/// Parse a `Range` header value against content of `size` bytes.
///
/// Ranges starting past the end are dropped; the set is unsatisfiable when
/// nothing remains. An empty set (`bytes=`) yields no ranges.
pub fn parse_range(value: &str, size: u64) -> std::result::Result<Vec<ByteRange>, RangeError> {
    let specs = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;

    for spec in specs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (start, end) = spec.split_once('-').ok_or(RangeError::Malformed)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix range: the last `end` bytes.
            let suffix = parse_position(end)?;
            if suffix == 0 || size == 0 {
                no_overlap = true;
                continue;
            }
            let length = suffix.min(size);
            ranges.push(ByteRange {
                start: size - length,
                length,
            });
            continue;
        }

        let start = parse_position(start)?;
        let last = if end.is_empty() {
            None
        } else {
            let end = parse_position(end)?;
            if start > end {
                return Err(RangeError::Malformed);
            }
            Some(end)
        };

        if start >= size {
            no_overlap = true;
            continue;
        }

        let last = last.map_or(size - 1, |end| end.min(size - 1));
        ranges.push(ByteRange {
            start,
            length: last - start + 1,
        });
    }

    if no_overlap && ranges.is_empty() {
        return Err(RangeError::Unsatisfiable);
    }
    Ok(ranges)
}

fn parse_position(value: &str) -> std::result::Result<u64, RangeError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed);
    }
    value.parse().map_err(|_| RangeError::Malformed)
}

/// Format a timestamp as an HTTP-date.
pub fn http_date(time: &DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, PartialEq, Eq)]
enum Precondition {
    Proceed,
    NotModified,
    Failed,
}

/// Evaluate conditional headers; the content has no entity tag.
fn check_preconditions(
    method: &Method,
    headers: &HeaderMap,
    modified: Option<&DateTime<Utc>>,
) -> Precondition {
    let is_read = method == Method::GET || method == Method::HEAD;

    if let Some(value) = header_str(headers, &header::IF_MATCH) {
        if value.trim() != "*" {
            return Precondition::Failed;
        }
    } else if let (Some(value), Some(modified)) =
        (header_str(headers, &header::IF_UNMODIFIED_SINCE), modified)
    {
        if let Some(since) = parse_http_date(value) {
            if modified.timestamp() > since.timestamp() {
                return Precondition::Failed;
            }
        }
    }

    if let Some(value) = header_str(headers, &header::IF_NONE_MATCH) {
        if value.trim() == "*" {
            return if is_read {
                Precondition::NotModified
            } else {
                Precondition::Failed
            };
        }
    } else if let (true, Some(value), Some(modified)) =
        (is_read, header_str(headers, &header::IF_MODIFIED_SINCE), modified)
    {
        if let Some(since) = parse_http_date(value) {
            if modified.timestamp() <= since.timestamp() {
                return Precondition::NotModified;
            }
        }
    }

    Precondition::Proceed
}

/// Whether a `Range` header should be honoured given `If-Range`.
fn if_range_allows(headers: &HeaderMap, modified: Option<&DateTime<Utc>>) -> bool {
    let Some(value) = header_str(headers, &header::IF_RANGE) else {
        return true;
    };
    let value = value.trim();
    if value.starts_with('"') || value.starts_with("W/") {
        // Entity tags never match: the content has none.
        return false;
    }
    match (parse_http_date(value), modified) {
        (Some(date), Some(modified)) => date.timestamp() == modified.timestamp(),
        _ => false,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Piece of a response body.
enum Segment {
    Literal(Bytes),
    Span { offset: u64, remaining: u64 },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Segment::Literal(bytes) => bytes.len() as u64,
            Segment::Span { remaining, .. } => *remaining,
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct BodyPlan<R> {
    reader: Arc<R>,
    segments: VecDeque<Segment>,
    chunk_size: usize,
}

/// Stream the planned segments, reading spans chunk by chunk.
fn body_stream<R>(plan: BodyPlan<R>) -> impl Stream<Item = Result<Bytes>> + Send + 'static
where
    R: ReadAt + 'static,
{
    stream::try_unfold(plan, |mut plan| async move {
        let Some(segment) = plan.segments.pop_front() else {
            return Ok::<_, RelayError>(None);
        };

        match segment {
            Segment::Literal(bytes) => Ok(Some((bytes, plan))),
            Segment::Span { offset, remaining } => {
                let want = remaining.min(plan.chunk_size as u64) as usize;
                let mut buf = vec![0u8; want];
                let n = match plan.reader.read_at(offset, &mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(offset, want, "body read failed: {e}");
                        return Err(e);
                    }
                };
                if n < want {
                    warn!(offset, want, received = n, "content ended early");
                    return Err(RelayError::LengthMismatch {
                        requested: want,
                        received: n,
                    });
                }
                if remaining > want as u64 {
                    plan.segments.push_front(Segment::Span {
                        offset: offset + want as u64,
                        remaining: remaining - want as u64,
                    });
                }
                Ok(Some((Bytes::from(buf), plan)))
            }
        }
    })
}

/// Random boundary; content cannot anticipate it.
fn multipart_boundary() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Build the segments of a `multipart/byteranges` body.
fn multipart_segments(
    ranges: &[ByteRange],
    size: u64,
    content_type: &str,
    boundary: &str,
) -> VecDeque<Segment> {
    let mut segments = VecDeque::new();
    for (i, range) in ranges.iter().enumerate() {
        let lead = if i == 0 { "" } else { "\r\n" };
        let part_header = format!(
            "{lead}--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: {}\r\n\r\n",
            range.content_range(size)
        );
        segments.push_back(Segment::Literal(Bytes::from(part_header)));
        segments.push_back(Segment::Span {
            offset: range.start,
            remaining: range.length,
        });
    }
    segments.push_back(Segment::Literal(Bytes::from(format!("\r\n--{boundary}--\r\n"))));
    segments
}

fn status_only(status: StatusCode, info: &ContentInfo) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    if let Some(modified) = &info.last_modified {
        set_header(response.headers_mut(), header::LAST_MODIFIED, &http_date(modified));
    }
    response
}

/// Answer a GET or HEAD for the content behind `reader`.
///
/// Errors only when the source cannot report its size; failures while
/// streaming the body abort the response mid-stream.
pub async fn serve_content<R>(
    reader: Arc<R>,
    info: &ContentInfo,
    method: &Method,
    headers: &HeaderMap,
    chunk_size: usize,
) -> Result<Response>
where
    R: ReadAt + 'static,
{
    let modified = info.last_modified.as_ref();
    match check_preconditions(method, headers, modified) {
        Precondition::Proceed => {}
        Precondition::NotModified => return Ok(status_only(StatusCode::NOT_MODIFIED, info)),
        Precondition::Failed => return Ok(status_only(StatusCode::PRECONDITION_FAILED, info)),
    }

    let size = reader.size().await?;

    let mut ranges = Vec::new();
    if let Some(value) = header_str(headers, &header::RANGE) {
        if if_range_allows(headers, modified) {
            match parse_range(value, size) {
                Ok(parsed) => ranges = parsed,
                Err(_) => {
                    let mut response = Response::new(Body::from("range not satisfiable"));
                    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                    set_header(
                        response.headers_mut(),
                        header::CONTENT_RANGE,
                        &format!("bytes */{size}"),
                    );
                    return Ok(response);
                }
            }
        }
    }
    // Ranges adding up to more than the content are served as a whole.
    if ranges.iter().map(|r| r.length).sum::<u64>() > size {
        ranges.clear();
    }

    let mut response_headers = HeaderMap::new();
    let (status, segments) = match ranges.as_slice() {
        [] => {
            set_header(&mut response_headers, header::CONTENT_TYPE, &info.content_type);
            let mut segments = VecDeque::new();
            segments.push_back(Segment::Span {
                offset: 0,
                remaining: size,
            });
            (StatusCode::OK, segments)
        }
        [range] => {
            set_header(&mut response_headers, header::CONTENT_TYPE, &info.content_type);
            set_header(&mut response_headers, header::CONTENT_RANGE, &range.content_range(size));
            let mut segments = VecDeque::new();
            segments.push_back(Segment::Span {
                offset: range.start,
                remaining: range.length,
            });
            (StatusCode::PARTIAL_CONTENT, segments)
        }
        many => {
            let boundary = multipart_boundary();
            set_header(
                &mut response_headers,
                header::CONTENT_TYPE,
                &format!("multipart/byteranges; boundary={boundary}"),
            );
            (
                StatusCode::PARTIAL_CONTENT,
                multipart_segments(many, size, &info.content_type, &boundary),
            )
        }
    };

    let content_length: u64 = segments.iter().map(Segment::len).sum();
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(modified) = modified {
        set_header(&mut response_headers, header::LAST_MODIFIED, &http_date(modified));
    }

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let segments = segments.into_iter().filter(|s| !s.is_empty()).collect();
        Body::from_stream(body_stream(BodyPlan {
            reader,
            segments,
            chunk_size: chunk_size.max(1),
        }))
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
