//! The chunked-transfer-encoding decoder (spec §4.1 "Chunked decoder").
//!
//! Operates in place on a `netbuf::Buf`, interleaving parses with the live
//! append stream: `idx` is the write-cursor of collapsed payload (the
//! prefix of the buffer that is pure body bytes, framing already
//! stripped), `len` is the remaining byte count of the chunk currently
//! being received whose header has been consumed but whose payload has
//! not fully arrived. This mirrors the `buffered`/`pending` cursor pair
//! this module is adapted from, but with hand-rolled hex/CRLF parsing
//! (spec-mandated, liberal about chunk extensions and case) instead of a
//! parser crate, and an explicit `ProtocolError` instead of a silent stall
//! on malformed input.

use netbuf::Buf;

use buffer::{parse_hex_prefix, remove_block, substring_index};
use error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for a chunk-size header at `idx`. `first` is true only for
    /// the very first header, which has no preceding chunk payload and so
    /// no leading CRLF to strip before it.
    Header { first: bool },
    /// Consuming `len` payload bytes of the current chunk as they arrive.
    Payload,
    /// Zero-size chunk header has been consumed. Terminal: no further
    /// bytes (trailers included) are part of this decode.
    Done,
}

/// Decode cursor for one chunked-encoded body.
#[derive(Debug, Clone)]
pub struct ChunkState {
    idx: usize,
    len: usize,
    phase: Phase,
}

impl ChunkState {
    pub fn new() -> ChunkState {
        ChunkState {
            idx: 0,
            len: 0,
            phase: Phase::Header { first: true },
        }
    }

    /// Runs one decode pass, collapsing as much framing out of `buf` as
    /// the currently-buffered bytes allow. Returns the number of newly
    /// collapsed (ready-to-deliver) payload bytes.
    pub fn parse(&mut self, buf: &mut Buf) -> Result<usize, ProtocolError> {
        let start = self.idx;
        loop {
            match self.phase {
                Phase::Done => break,
                Phase::Payload => {
                    let avail = buf.len() - self.idx;
                    if avail >= self.len {
                        self.idx += self.len;
                        self.len = 0;
                        self.phase = Phase::Header { first: false };
                    } else {
                        break;
                    }
                }
                Phase::Header { first } => {
                    let pos = self.idx;
                    let hdr_start = if first {
                        pos
                    } else {
                        if buf.len() < pos + 2 {
                            break;
                        }
                        if &buf[pos..pos + 2] != b"\r\n" {
                            return Err(ProtocolError::MissingPayloadTerminator);
                        }
                        pos + 2
                    };
                    match parse_chunk_header(&buf[hdr_start..]) {
                        ChunkHeader::Partial => break,
                        ChunkHeader::Invalid(e) => return Err(e),
                        ChunkHeader::Complete { header_len, size } => {
                            remove_block(buf, pos, (hdr_start - pos) + header_len);
                            if size == 0 {
                                self.len = 0;
                                self.phase = Phase::Done;
                            } else {
                                self.len = size;
                                self.phase = Phase::Payload;
                            }
                        }
                    }
                }
            }
        }
        Ok(self.idx - start)
    }

    /// Bytes of decoded body ready for delivery, i.e. `buf[0..idx]`.
    pub fn buffered(&self) -> usize {
        self.idx
    }

    /// Whether the terminating zero-size chunk has been fully consumed.
    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Marks `n` already-collapsed bytes as delivered. Called after the
    /// caller has both handed them to `body_chunk_cb` and, if
    /// `overwrite_chunks` is set, removed them from the buffer.
    pub fn consume(&mut self, n: usize) {
        assert!(self.idx >= n);
        self.idx -= n;
    }
}

enum ChunkHeader {
    Partial,
    Invalid(ProtocolError),
    Complete { header_len: usize, size: usize },
}

/// Parses one `<hex-size>[;ext...]\r\n` chunk header from the start of
/// `data`. Chunk extensions are accepted and discarded; case of the hex
/// digits is not significant.
fn parse_chunk_header(data: &[u8]) -> ChunkHeader {
    let crlf = match substring_index(data, b"\r\n") {
        Some(i) => i,
        None => return ChunkHeader::Partial,
    };
    let size_field = &data[..crlf];
    match parse_hex_prefix(size_field) {
        Some(run) => {
            if run.digits < size_field.len() {
                warn!("discarding chunk extension: {:?}",
                      String::from_utf8_lossy(&size_field[run.digits..]));
            }
            ChunkHeader::Complete {
                header_len: crlf + 2,
                size: run.value as usize,
            }
        }
        None => ChunkHeader::Invalid(ProtocolError::BadChunkSize),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use netbuf::Buf;

    fn buf_from(bytes: &[u8]) -> Buf {
        let mut b = Buf::new();
        b.extend(bytes);
        b
    }

    #[test]
    fn decodes_two_chunks_in_one_pass() {
        let mut buf = buf_from(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n");
        let mut st = ChunkState::new();
        let n = st.parse(&mut buf).unwrap();
        assert_eq!(n, 9);
        assert!(st.is_done());
        assert_eq!(&buf[..st.buffered()], b"Wikipedia");
    }

    #[test]
    fn stops_on_partial_chunk_size_line() {
        let mut buf = buf_from(b"4\r\nWi");
        let mut st = ChunkState::new();
        let n = st.parse(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert!(!st.is_done());
        // remaining "ki" bytes haven't arrived; buf holds what did.
        assert_eq!(&buf[..st.buffered()], b"Wi");
    }

    #[test]
    fn header_split_across_two_passes() {
        let mut buf = buf_from(b"4\r");
        let mut st = ChunkState::new();
        assert_eq!(st.parse(&mut buf).unwrap(), 0);
        buf.extend(b"\nWiki\r\n0\r\n");
        assert_eq!(st.parse(&mut buf).unwrap(), 4);
        assert!(st.is_done());
    }

    #[test]
    fn payload_split_across_reads() {
        let mut buf = buf_from(b"5\r\nhel");
        let mut st = ChunkState::new();
        assert_eq!(st.parse(&mut buf).unwrap(), 3);
        buf.extend(b"lo\r\n0\r\n");
        assert_eq!(st.parse(&mut buf).unwrap(), 2);
        assert!(st.is_done());
        assert_eq!(&buf[..st.buffered()], b"hello");
    }

    #[test]
    fn zero_length_body() {
        let mut buf = buf_from(b"0\r\n");
        let mut st = ChunkState::new();
        assert_eq!(st.parse(&mut buf).unwrap(), 0);
        assert!(st.is_done());
    }

    #[test]
    fn consume_and_reset_on_overwrite() {
        let mut buf = buf_from(b"4\r\nWiki\r\n0\r\n");
        let mut st = ChunkState::new();
        let n = st.parse(&mut buf).unwrap();
        assert_eq!(n, 4);
        remove_block(&mut buf, 0, n);
        st.consume(n);
        assert_eq!(st.buffered(), 0);
        assert!(st.is_done());
    }

    #[test]
    fn chunk_extensions_are_discarded() {
        let mut buf = buf_from(b"4;foo=bar\r\nWiki\r\n0\r\n");
        let mut st = ChunkState::new();
        let n = st.parse(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Wiki");
        assert!(st.is_done());
    }

    #[test]
    fn malformed_chunk_size_is_protocol_error() {
        let mut buf = buf_from(b"zz\r\n");
        let mut st = ChunkState::new();
        assert_eq!(st.parse(&mut buf), Err(ProtocolError::BadChunkSize));
    }

    #[test]
    fn missing_payload_terminator_is_protocol_error() {
        let mut buf = buf_from(b"3\r\nabcXX");
        let mut st = ChunkState::new();
        assert_eq!(st.parse(&mut buf), Err(ProtocolError::MissingPayloadTerminator));
    }

    #[test]
    fn round_trip_arbitrary_body() {
        fn frame(body: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            if !body.is_empty() {
                out.extend(format!("{:x}\r\n", body.len()).into_bytes());
                out.extend(body);
                out.extend(b"\r\n");
            }
            out.extend(b"0\r\n");
            out
        }
        for body in &[&b""[..], &b"x"[..], &b"hello world"[..], &vec![b'a'; 5000][..]] {
            let wire = frame(body);
            let mut buf = buf_from(&wire);
            let mut st = ChunkState::new();
            let n = st.parse(&mut buf).unwrap();
            assert_eq!(&buf[..n], *body);
            assert!(st.is_done());
        }
    }
}
