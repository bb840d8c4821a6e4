//! Body framing: the one thing this crate lets the caller derive from
//! headers without parsing them itself.

/// How the body of an HTTP/1.x message is delimited on the wire.
///
/// A natural sum type rather than an integer tag with a side-channel
/// length field; see the "Tagged encoding" design note this crate follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `Transfer-Encoding: chunked`. The body is framed as a sequence of
    /// hex-size-prefixed chunks terminated by a zero-size chunk.
    Chunked,
    /// `Content-Length: n`. The body is exactly `n` bytes.
    ContentLength(u64),
    /// Neither header is present (or the caller doesn't care): the body
    /// extends until the peer closes the channel.
    Unknown,
}

impl Default for TransferEncoding {
    fn default() -> TransferEncoding {
        TransferEncoding::Unknown
    }
}
