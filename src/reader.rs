//! The Reader half of the transfer core (spec §4.1).
//!
//! Consumes bytes from a shared, non-blocking channel, finds the header
//! terminator, asks the caller (via `headers_done`) how the body is
//! framed, then decodes the body per that framing and emits incremental
//! `body_chunk` events followed by exactly one of `done`/`error`.
//!
//! `Reader<S>` is itself a `futures::Future`; spawning it onto a
//! `tokio_core::reactor::Handle` is what plays the role of "the external
//! scheduler" and "readiness callbacks" from spec §5 -- each `poll()` is
//! one readable-handler invocation.

use std::cell::RefCell;
use std::cmp;
use std::io;
use std::rc::Rc;

use futures::{Async, Future, Poll, task};
use futures::task::Task;
use netbuf::Buf;
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use buffer::{remove_block, substring_index};
use chunked::ChunkState;
use config::Config;
use encoding::TransferEncoding;
use error::ProtocolError;
use flow::Flow;
use handle::{Arena, Index};

const HEADER_TERMINATOR: &'static [u8] = b"\r\n\r\n";

/// The four callbacks a reader drives, in the order spec §5 guarantees:
/// `headers_done` at most once and before any `body_chunk`; `body_chunk`
/// zero or more times; exactly one of `done`/`error` last.
pub struct ReadCallbacks {
    /// Header section is complete. Set `*encoding` (and `*content_length`
    /// when `*encoding` is `ContentLength`) from the parsed header bytes.
    /// Returning `Flow::End` ends the transfer with no further callbacks.
    pub headers_done: Box<FnMut(&[u8], &mut TransferEncoding, &mut u64) -> Flow>,
    /// A chunk of decoded body bytes is available. Returning `Flow::End`
    /// ends the transfer without `done` firing.
    pub body_chunk: Box<FnMut(&[u8]) -> Flow>,
    /// The message completed successfully. Carries the full body when
    /// `Config::overwrite_chunks` is false; empty otherwise.
    pub done: Box<FnMut(&[u8])>,
    /// The channel hung up or errored. `body_started` distinguishes a
    /// header-phase failure from a mid-body one.
    pub error: Box<FnMut(bool)>,
}

struct ReadControl {
    processing: bool,
    cancelled: bool,
    pending_callbacks: Option<ReadCallbacks>,
    task: Option<Task>,
}

impl ReadControl {
    fn new() -> ReadControl {
        ReadControl {
            processing: false,
            cancelled: false,
            pending_callbacks: None,
            task: None,
        }
    }
}

/// A cancellation/replacement handle for a live `Reader`.
///
/// Cheap to clone; all clones refer to the same reader. Calling `cancel`
/// from inside one of that reader's own callbacks is a documented no-op
/// (spec invariant 1/5) -- use `Flow::End` from the callback instead.
#[derive(Clone)]
pub struct ReaderHandle {
    control: Rc<RefCell<Arena<ReadControl>>>,
    index: Index,
}

impl ReaderHandle {
    /// Tears down the reader: deregisters it from its scheduler and frees
    /// its buffers on the next poll. A no-op if a callback belonging to
    /// this reader is currently on the stack, and a no-op if the reader
    /// has already finished.
    pub fn cancel(&self) {
        let mut arena = self.control.borrow_mut();
        if let Some(ctrl) = arena.get_mut(self.index) {
            if ctrl.processing {
                debug!("read_cancel ignored: a callback is on the stack");
                return;
            }
            ctrl.cancelled = true;
            if let Some(task) = ctrl.task.take() {
                task.notify();
            }
        }
    }

    /// Atomically replaces the four callbacks. Unlike the C-style source
    /// this crate follows, there's no danger in doing this while a
    /// callback is on the stack -- closures are moved, not freed in
    /// place -- so this always takes effect (on the next poll) as long as
    /// the reader is still live.
    pub fn set_callbacks(&self, callbacks: ReadCallbacks) {
        let mut arena = self.control.borrow_mut();
        if let Some(ctrl) = arena.get_mut(self.index) {
            ctrl.pending_callbacks = Some(callbacks);
            if let Some(task) = ctrl.task.take() {
                task.notify();
            }
        }
    }
}

enum DrainOutcome {
    Progress,
    NeedMore,
    Eof,
}

enum HeaderOutcome {
    NeedMore,
    Found,
    Ended,
}

enum BodyOutcome {
    NeedMore,
    Stopped,
    Done,
}

/// The Reader state machine (spec §3 "Reader state", §4.1).
pub struct Reader<S> {
    channel: Rc<RefCell<S>>,
    recv_buf: Buf,
    scratch: Vec<u8>,
    header_len: usize,
    encoding: TransferEncoding,
    content_length: u64,
    body_received: u64,
    chunk_state: ChunkState,
    delivered_any: bool,
    config: Config,
    callbacks: ReadCallbacks,
    control: Rc<RefCell<Arena<ReadControl>>>,
    index: Index,
    finished: bool,
}

/// Begins reading a message from `channel`. Registers the returned future
/// with `reactor` (the "external scheduler") and hands back a handle for
/// cancellation or callback replacement.
pub fn read_start<S>(
    channel: Rc<RefCell<S>>,
    config: Config,
    callbacks: ReadCallbacks,
    reactor: &Handle,
) -> ReaderHandle
where
    S: AsyncRead + AsyncWrite + 'static,
{
    let control = Rc::new(RefCell::new(Arena::new()));
    let index = control.borrow_mut().insert(ReadControl::new());
    let scratch = vec![0u8; config.read_chunk_size];
    let reader = Reader {
        channel,
        recv_buf: Buf::new(),
        scratch,
        header_len: 0,
        encoding: TransferEncoding::Unknown,
        content_length: 0,
        body_received: 0,
        chunk_state: ChunkState::new(),
        delivered_any: false,
        config,
        callbacks,
        control: control.clone(),
        index,
        finished: false,
    };
    let result = ReaderHandle { control, index };
    reactor.spawn(reader);
    result
}

impl<S: AsyncRead + AsyncWrite> Reader<S> {
    /// Applies a cancellation request or a pending callback swap queued by
    /// the handle. Returns true if the reader should stop right now.
    fn sync_with_handle(&mut self) -> bool {
        let mut arena = self.control.borrow_mut();
        match arena.get_mut(self.index) {
            None => true,
            Some(ctrl) => {
                if ctrl.cancelled {
                    return true;
                }
                ctrl.task = Some(task::current());
                if let Some(cb) = ctrl.pending_callbacks.take() {
                    self.callbacks = cb;
                }
                false
            }
        }
    }

    fn set_processing(&self, value: bool) {
        if let Some(ctrl) = self.control.borrow_mut().get_mut(self.index) {
            ctrl.processing = value;
        }
    }

    fn teardown(&mut self) {
        self.finished = true;
        self.control.borrow_mut().remove(self.index);
    }

    fn drain_channel(&mut self) -> Result<DrainOutcome, io::Error> {
        let mut got_any = false;
        loop {
            let n = {
                let mut channel = self.channel.borrow_mut();
                channel.read(&mut self.scratch[..])
            };
            match n {
                Ok(0) => return Ok(DrainOutcome::Eof),
                Ok(n) => {
                    self.recv_buf.extend(&self.scratch[..n]);
                    got_any = true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if got_any { DrainOutcome::Progress } else { DrainOutcome::NeedMore });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_consume_headers(&mut self) -> HeaderOutcome {
        let boundary = match substring_index(&self.recv_buf[..], HEADER_TERMINATOR) {
            Some(k) => k,
            None => return HeaderOutcome::NeedMore,
        };
        let header_len = boundary + HEADER_TERMINATOR.len();
        self.set_processing(true);
        let flow = {
            let Reader { ref recv_buf, ref mut encoding, ref mut content_length, ref mut callbacks, .. } = *self;
            (callbacks.headers_done)(&recv_buf[..header_len], encoding, content_length)
        };
        self.set_processing(false);
        match flow {
            Flow::End => HeaderOutcome::Ended,
            Flow::Continue => {
                remove_block(&mut self.recv_buf, 0, header_len);
                self.header_len = header_len;
                trace!("header section complete ({} bytes), encoding={:?}", header_len, self.encoding);
                HeaderOutcome::Found
            }
        }
    }

    fn deliver_chunk(&mut self, data_range: (usize, usize)) -> Flow {
        let (start, end) = data_range;
        self.set_processing(true);
        let flow = (self.callbacks.body_chunk)(&self.recv_buf[start..end]);
        self.set_processing(false);
        self.delivered_any = true;
        self.body_received += (end - start) as u64;
        flow
    }

    fn decode_content_length(&mut self) -> BodyOutcome {
        if self.body_received >= self.content_length {
            return BodyOutcome::Done;
        }
        let start = if self.config.overwrite_chunks { 0 } else { self.body_received as usize };
        if self.recv_buf.len() <= start {
            return BodyOutcome::NeedMore;
        }
        let remaining_target = (self.content_length - self.body_received) as usize;
        let available = self.recv_buf.len() - start;
        let deliver_len = cmp::min(available, remaining_target);
        if deliver_len == 0 {
            return BodyOutcome::NeedMore;
        }
        let flow = self.deliver_chunk((start, start + deliver_len));
        if self.config.overwrite_chunks {
            remove_block(&mut self.recv_buf, 0, deliver_len);
        }
        if flow.is_end() {
            return BodyOutcome::Stopped;
        }
        if self.body_received >= self.content_length {
            BodyOutcome::Done
        } else {
            BodyOutcome::NeedMore
        }
    }

    fn decode_unknown(&mut self) -> BodyOutcome {
        let start = if self.config.overwrite_chunks { 0 } else { self.body_received as usize };
        if self.recv_buf.len() <= start {
            return BodyOutcome::NeedMore;
        }
        let end = self.recv_buf.len();
        let flow = self.deliver_chunk((start, end));
        if self.config.overwrite_chunks {
            remove_block(&mut self.recv_buf, 0, end - start);
        }
        if flow.is_end() {
            BodyOutcome::Stopped
        } else {
            // Unknown never self-declares completion; only EOF does.
            BodyOutcome::NeedMore
        }
    }

    fn decode_chunked(&mut self) -> Result<BodyOutcome, ProtocolError> {
        self.chunk_state.parse(&mut self.recv_buf)?;
        let ready = self.chunk_state.buffered();
        let start = if self.config.overwrite_chunks { 0 } else { self.body_received as usize };
        if ready <= start {
            return Ok(if self.chunk_state.is_done() && ready == start {
                BodyOutcome::Done
            } else {
                BodyOutcome::NeedMore
            });
        }
        let flow = self.deliver_chunk((start, ready));
        if self.config.overwrite_chunks {
            remove_block(&mut self.recv_buf, 0, ready);
            self.chunk_state.consume(ready);
        }
        if flow.is_end() {
            return Ok(BodyOutcome::Stopped);
        }
        Ok(if self.chunk_state.is_done() { BodyOutcome::Done } else { BodyOutcome::NeedMore })
    }

    fn decode_body(&mut self) -> Result<BodyOutcome, ProtocolError> {
        match self.encoding {
            TransferEncoding::ContentLength(n) => {
                self.content_length = n;
                Ok(self.decode_content_length())
            }
            TransferEncoding::Unknown => Ok(self.decode_unknown()),
            TransferEncoding::Chunked => self.decode_chunked(),
        }
    }

    /// Whether the body has progressed past the header section, used to
    /// tell a header-phase failure from a mid-body one in `error_cb`.
    fn body_started(&self) -> bool {
        self.header_len > 0 && (self.recv_buf.len() > 0 || self.delivered_any)
    }

    fn deliver_done(&mut self) {
        self.set_processing(true);
        {
            let body: &[u8] = &self.recv_buf[..];
            (self.callbacks.done)(body);
        }
        self.set_processing(false);
        self.teardown();
    }

    fn deliver_error(&mut self, body_started: bool) {
        self.set_processing(true);
        (self.callbacks.error)(body_started);
        self.set_processing(false);
        self.teardown();
    }

    fn handle_eof(&mut self) -> Async<()> {
        let unknown_success = matches!(self.encoding, TransferEncoding::Unknown)
            && self.header_len > 0
            && (self.recv_buf.len() > 0 || self.delivered_any);
        if unknown_success {
            debug!("peer closed after {} unframed body bytes; treating as done", self.body_received);
            self.deliver_done();
        } else {
            let started = self.body_started();
            warn!("channel hung up (body_started={})", started);
            self.deliver_error(started);
        }
        Async::Ready(())
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Reader<S> {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        if self.finished {
            return Ok(Async::Ready(()));
        }
        if self.sync_with_handle() {
            self.teardown();
            return Ok(Async::Ready(()));
        }

        match self.drain_channel() {
            Ok(DrainOutcome::Eof) => return Ok(self.handle_eof()),
            Ok(DrainOutcome::Progress) | Ok(DrainOutcome::NeedMore) => {}
            Err(e) => {
                let started = self.body_started();
                warn!("read error (body_started={}): {}", started, e);
                self.deliver_error(started);
                return Ok(Async::Ready(()));
            }
        }

        if self.header_len == 0 {
            match self.try_consume_headers() {
                HeaderOutcome::NeedMore => return Ok(Async::NotReady),
                HeaderOutcome::Ended => {
                    self.teardown();
                    return Ok(Async::Ready(()));
                }
                HeaderOutcome::Found => {}
            }
        }

        match self.decode_body() {
            Ok(BodyOutcome::NeedMore) => Ok(Async::NotReady),
            Ok(BodyOutcome::Stopped) => {
                self.teardown();
                Ok(Async::Ready(()))
            }
            Ok(BodyOutcome::Done) => {
                self.deliver_done();
                Ok(Async::Ready(()))
            }
            Err(e) => {
                let started = self.body_started();
                warn!("chunk decode error (body_started={}): {}", started, e);
                self.deliver_error(started);
                Ok(Async::Ready(()))
            }
        }
    }
}
