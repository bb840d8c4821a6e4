//! Asynchronous HTTP/1.x message transfer core for the `tokio-rs` stack.
//!
//! This crate drives a single full-duplex HTTP/1.x message exchange over a
//! non-blocking byte stream. It reads and writes headers, then streams a
//! message body framed as one of the three HTTP transfer encodings
//! (chunked, content-length, or connection-close/unknown), surfacing
//! header-complete, incremental-body, and message-complete events through
//! callbacks.
//!
//! Connection pooling, proxy chaining, TLS negotiation, URL parsing, cookie
//! handling, authentication, request queueing, and keep-alive connection
//! reuse are not part of this crate. It does not interpret headers
//! semantically except to let the caller derive body framing from them.
#![recursion_limit="100"]

extern crate futures;
extern crate tokio_core;
extern crate tokio_io;
extern crate netbuf;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
extern crate libc;

mod buffer;
mod chunked;
mod config;
mod encoding;
mod error;
mod flow;
mod handle;
mod reader;
mod sigpipe;
mod writer;

pub use config::Config;
pub use encoding::TransferEncoding;
pub use error::ProtocolError;
pub use flow::Flow;
pub use reader::{ReadCallbacks, Reader, ReaderHandle, read_start};
pub use writer::{WriteCallbacks, Writer, WriterHandle, write_start};
