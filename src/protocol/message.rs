//! The streaming HTTP object model.
//!
//! An HTTP message travels through a pipeline as a sequence of objects: a
//! headers-bearing [`MessageHead`], zero or more [`HttpContent`] chunks, and
//! a terminating [`LastHttpContent`] optionally carrying trailing headers.
//! [`FullMessage`] collapses the whole sequence into one object for handlers
//! that work on aggregated messages. [`HttpObject`] is the union the content
//! codecs consume and produce.
//!
//! Every object carries a [`DecoderResult`] recording whether the upstream
//! wire decoder produced it cleanly.

use std::sync::Arc;

use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

use crate::buffer::{BufferError, ByteBuf, ReferenceCounted};
use crate::pipeline::CodecError;

/// The outcome the upstream decoder attached to an HTTP object.
#[derive(Debug, Clone, Default)]
pub enum DecoderResult {
    /// The object was decoded without problems.
    #[default]
    Success,
    /// Decoding failed; the cause is preserved for downstream handlers.
    Failure(Arc<CodecError>),
}

impl DecoderResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DecoderResult::Success)
    }

    /// Returns the failure cause, if any.
    pub fn cause(&self) -> Option<&CodecError> {
        match self {
            DecoderResult::Success => None,
            DecoderResult::Failure(cause) => Some(cause),
        }
    }
}

/// A request or response head: version, method/URI or status, header map.
///
/// Wraps the standard `http` types so header access, ordering and
/// case-insensitivity follow RFC 7230 without re-implementation.
#[derive(Debug)]
pub enum Head {
    Request(Request<()>),
    Response(Response<()>),
}

impl Head {
    pub fn version(&self) -> Version {
        match self {
            Head::Request(request) => request.version(),
            Head::Response(response) => response.version(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            Head::Request(request) => request.headers(),
            Head::Response(response) => response.headers(),
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        match self {
            Head::Request(request) => request.headers_mut(),
            Head::Response(response) => response.headers_mut(),
        }
    }

    /// The response status, or `None` for requests.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Head::Request(_) => None,
            Head::Response(response) => Some(response.status()),
        }
    }

    /// The request method, or `None` for responses.
    pub fn method(&self) -> Option<&Method> {
        match self {
            Head::Request(request) => Some(request.method()),
            Head::Response(_) => None,
        }
    }

    /// The request URI, or `None` for responses.
    pub fn uri(&self) -> Option<&Uri> {
        match self {
            Head::Request(request) => Some(request.uri()),
            Head::Response(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Head::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Head::Response(_))
    }
}

/// A headers-bearing message object (no body attached).
#[derive(Debug)]
pub struct MessageHead {
    head: Head,
    result: DecoderResult,
}

impl MessageHead {
    pub fn new(head: Head) -> Self {
        Self { head, result: DecoderResult::Success }
    }

    pub fn request(request: Request<()>) -> Self {
        Self::new(Head::Request(request))
    }

    pub fn response(response: Response<()>) -> Self {
        Self::new(Head::Response(response))
    }

    pub fn from_parts(head: Head, result: DecoderResult) -> Self {
        Self { head, result }
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.head.headers_mut()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.head.status()
    }

    pub fn decoder_result(&self) -> &DecoderResult {
        &self.result
    }

    pub fn set_decoder_result(&mut self, result: DecoderResult) {
        self.result = result;
    }

    pub fn into_head(self) -> Head {
        self.head
    }
}

/// A chunk of message body owning its payload buffer.
#[derive(Debug)]
pub struct HttpContent {
    payload: ByteBuf,
}

impl HttpContent {
    pub fn new(payload: ByteBuf) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &ByteBuf {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut ByteBuf {
        &mut self.payload
    }

    pub fn into_payload(self) -> ByteBuf {
        self.payload
    }
}

/// The terminating body object, optionally carrying trailing headers.
#[derive(Debug)]
pub struct LastHttpContent {
    payload: ByteBuf,
    trailers: HeaderMap,
    result: DecoderResult,
}

impl LastHttpContent {
    /// An empty terminator without trailers.
    pub fn empty() -> Self {
        Self { payload: ByteBuf::heap(0), trailers: HeaderMap::new(), result: DecoderResult::Success }
    }

    pub fn new(payload: ByteBuf, trailers: HeaderMap) -> Self {
        Self { payload, trailers, result: DecoderResult::Success }
    }

    pub fn payload(&self) -> &ByteBuf {
        &self.payload
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn decoder_result(&self) -> &DecoderResult {
        &self.result
    }

    pub fn into_parts(self) -> (ByteBuf, HeaderMap, DecoderResult) {
        (self.payload, self.trailers, self.result)
    }
}

/// A fully aggregated message: head, body and trailers in one object.
#[derive(Debug)]
pub struct FullMessage {
    head: Head,
    payload: ByteBuf,
    trailers: HeaderMap,
    result: DecoderResult,
}

impl FullMessage {
    pub fn new(head: Head, payload: ByteBuf) -> Self {
        Self { head, payload, trailers: HeaderMap::new(), result: DecoderResult::Success }
    }

    pub fn with_trailers(head: Head, payload: ByteBuf, trailers: HeaderMap) -> Self {
        Self { head, payload, trailers, result: DecoderResult::Success }
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.head.headers_mut()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.head.status()
    }

    pub fn payload(&self) -> &ByteBuf {
        &self.payload
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn decoder_result(&self) -> &DecoderResult {
        &self.result
    }

    pub fn set_decoder_result(&mut self, result: DecoderResult) {
        self.result = result;
    }

    pub fn into_parts(self) -> (Head, ByteBuf, HeaderMap, DecoderResult) {
        (self.head, self.payload, self.trailers, self.result)
    }
}

/// Union of the HTTP objects a content codec observes.
#[derive(Debug)]
pub enum HttpObject {
    Head(MessageHead),
    Content(HttpContent),
    Last(LastHttpContent),
    Full(FullMessage),
}

impl HttpObject {
    /// Returns whether this object terminates a message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HttpObject::Last(_) | HttpObject::Full(_))
    }

    /// Returns the message headers for head-bearing objects.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            HttpObject::Head(head) => Some(head.headers()),
            HttpObject::Full(full) => Some(full.headers()),
            _ => None,
        }
    }
}

impl ReferenceCounted for HttpObject {
    fn reference_count(&self) -> usize {
        match self {
            HttpObject::Head(_) => 1,
            HttpObject::Content(content) => content.payload.reference_count(),
            HttpObject::Last(last) => last.payload.reference_count(),
            HttpObject::Full(full) => full.payload.reference_count(),
        }
    }

    fn release(&self) -> Result<bool, BufferError> {
        match self {
            HttpObject::Head(_) => Ok(false),
            HttpObject::Content(content) => content.payload.release(),
            HttpObject::Last(last) => last.payload.release(),
            HttpObject::Full(full) => full.payload.release(),
        }
    }
}
