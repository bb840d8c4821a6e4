//! The Writer half of the transfer core (spec §4.2).
//!
//! Flushes a pre-serialized header block, then pulls body bytes from the
//! caller on demand and streams them out framed per `TransferEncoding`
//! (chunk-wrapped for `Chunked`, raw otherwise), surfacing a
//! headers-flushed checkpoint and a final `done`/`error`.
//!
//! Mirrors `reader.rs`'s shape: a `Future` spawned onto the reactor, a
//! generation-checked handle for cancellation, `processing` guarding
//! reentrancy into the handle from inside a callback.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use futures::{Async, Future, Poll, task};
use futures::task::Task;
use netbuf::Buf;
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use buffer::remove_block;
use encoding::TransferEncoding;
use flow::Flow;
use handle::{Arena, Index};
use sigpipe::SigpipeGuard;

/// The callbacks a writer drives, in order: `headers_done` once, then
/// `produce_body` zero or more times, then exactly one of `done`/`error`.
pub struct WriteCallbacks {
    /// The header block has been fully flushed to the channel. Returning
    /// `Flow::End` ends the transfer with no body and no `done`.
    pub headers_done: Box<FnMut() -> Flow>,
    /// Pull the next slice of body bytes, appended to `chunk`. An empty
    /// `chunk` with `Flow::Continue` means no data is ready *yet* --
    /// see [`WriterHandle::body_ready`] for how to wake the writer once
    /// more becomes available. `Flow::End` marks `chunk` (possibly empty)
    /// as the final piece of body.
    pub produce_body: Box<FnMut(&mut Vec<u8>) -> Flow>,
    /// Every byte has been handed to the channel and (for `Chunked`) the
    /// terminating chunk has been written.
    pub done: Box<FnMut()>,
    /// The channel errored or hung up mid-write. The argument is whether
    /// the header block had already been fully flushed (mirrors the
    /// reader's `body_started` on its own error callback).
    pub error: Box<FnMut(bool)>,
}

struct WriteControl {
    processing: bool,
    cancelled: bool,
    pending_callbacks: Option<WriteCallbacks>,
    task: Option<Task>,
}

impl WriteControl {
    fn new() -> WriteControl {
        WriteControl {
            processing: false,
            cancelled: false,
            pending_callbacks: None,
            task: None,
        }
    }
}

/// A cancellation/replacement/wakeup handle for a live `Writer`.
#[derive(Clone)]
pub struct WriterHandle {
    control: Rc<RefCell<Arena<WriteControl>>>,
    index: Index,
}

impl WriterHandle {
    /// Tears down the writer on the next poll. A no-op while one of its
    /// own callbacks is on the stack, and a no-op once it has finished.
    pub fn cancel(&self) {
        let mut arena = self.control.borrow_mut();
        if let Some(ctrl) = arena.get_mut(self.index) {
            if ctrl.processing {
                debug!("write_cancel ignored: a callback is on the stack");
                return;
            }
            ctrl.cancelled = true;
            if let Some(task) = ctrl.task.take() {
                task.notify();
            }
        }
    }

    /// Replaces the four callbacks, taking effect on the next poll.
    pub fn set_callbacks(&self, callbacks: WriteCallbacks) {
        let mut arena = self.control.borrow_mut();
        if let Some(ctrl) = arena.get_mut(self.index) {
            ctrl.pending_callbacks = Some(callbacks);
            if let Some(task) = ctrl.task.take() {
                task.notify();
            }
        }
    }

    /// Wakes a writer that is waiting on `produce_body` to have more to
    /// say. Call this once new body bytes become available after
    /// `produce_body` returned an empty chunk with `Flow::Continue`.
    pub fn body_ready(&self) {
        if let Some(ctrl) = self.control.borrow_mut().get_mut(self.index) {
            if let Some(task) = ctrl.task.take() {
                task.notify();
            }
        }
    }
}

enum FlushOutcome {
    WouldBlock,
    Drained,
}

/// The Writer state machine (spec §3 "Writer state", §4.2).
pub struct Writer<S> {
    channel: Rc<RefCell<S>>,
    write_buf: Buf,
    header_len: usize,
    written: u64,
    headers_reported: bool,
    encoding: TransferEncoding,
    chunk_first: bool,
    body_done: bool,
    callbacks: WriteCallbacks,
    control: Rc<RefCell<Arena<WriteControl>>>,
    index: Index,
    finished: bool,
}

/// Begins writing a message to `channel`: `header_bytes` is a
/// fully-serialized header block (this crate does not build or interpret
/// headers), `initial_body` is optional data to queue immediately (e.g. a
/// small body already in hand), and `encoding` selects how later body
/// bytes pulled from `produce_body` are framed on the wire.
pub fn write_start<S>(
    channel: Rc<RefCell<S>>,
    header_bytes: &[u8],
    initial_body: Option<&[u8]>,
    encoding: TransferEncoding,
    callbacks: WriteCallbacks,
    reactor: &Handle,
) -> WriterHandle
where
    S: AsyncRead + AsyncWrite + 'static,
{
    let control = Rc::new(RefCell::new(Arena::new()));
    let index = control.borrow_mut().insert(WriteControl::new());
    let mut write_buf = Buf::new();
    write_buf.extend(header_bytes);
    let header_len = header_bytes.len();
    let mut writer = Writer {
        channel,
        write_buf,
        header_len,
        written: 0,
        headers_reported: false,
        encoding,
        chunk_first: true,
        body_done: false,
        callbacks,
        control: control.clone(),
        index,
        finished: false,
    };
    if let Some(body) = initial_body {
        writer.queue_body(body);
    }
    let result = WriterHandle { control, index };
    reactor.spawn(writer);
    result
}

impl<S: AsyncRead + AsyncWrite> Writer<S> {
    fn queue_body(&mut self, data: &[u8]) {
        match self.encoding {
            TransferEncoding::Chunked => {
                if !self.chunk_first {
                    self.write_buf.extend(b"\r\n");
                }
                self.write_buf.extend(format!("{:x}\r\n", data.len()).as_bytes());
                self.write_buf.extend(data);
                self.chunk_first = false;
            }
            TransferEncoding::ContentLength(_) | TransferEncoding::Unknown => {
                self.write_buf.extend(data);
            }
        }
    }

    fn queue_final_chunk(&mut self) {
        if let TransferEncoding::Chunked = self.encoding {
            if !self.chunk_first {
                self.write_buf.extend(b"\r\n");
            }
            self.write_buf.extend(b"0\r\n");
        }
    }

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

    fn flush_buf(&mut self) -> Result<FlushOutcome, io::Error> {
        let _sigpipe = SigpipeGuard::block();
        while self.write_buf.len() > 0 {
            let n = {
                let mut channel = self.channel.borrow_mut();
                channel.write(&self.write_buf[..])
            };
            match n {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned zero bytes"));
                }
                Ok(n) => {
                    self.written += n as u64;
                    remove_block(&mut self.write_buf, 0, n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::WouldBlock);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(FlushOutcome::Drained)
    }

    fn deliver_done(&mut self) {
        self.set_processing(true);
        (self.callbacks.done)();
        self.set_processing(false);
        self.teardown();
    }

    fn deliver_error(&mut self, err: io::Error) {
        warn!("write error: {}", err);
        let headers_reported = self.headers_reported;
        self.set_processing(true);
        (self.callbacks.error)(headers_reported);
        self.set_processing(false);
        self.teardown();
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Writer<S> {
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

        loop {
            match self.flush_buf() {
                Ok(FlushOutcome::WouldBlock) => return Ok(Async::NotReady),
                Ok(FlushOutcome::Drained) => {}
                Err(e) => {
                    self.deliver_error(e);
                    return Ok(Async::Ready(()));
                }
            }

            if !self.headers_reported && self.written >= self.header_len as u64 {
                self.set_processing(true);
                let flow = (self.callbacks.headers_done)();
                self.set_processing(false);
                self.headers_reported = true;
                trace!("header block flushed ({} bytes)", self.header_len);
                if flow.is_end() {
                    self.teardown();
                    return Ok(Async::Ready(()));
                }
            }

            if self.write_buf.len() > 0 {
                continue;
            }

            if self.body_done {
                self.deliver_done();
                return Ok(Async::Ready(()));
            }

            let mut chunk = Vec::new();
            self.set_processing(true);
            let flow = (self.callbacks.produce_body)(&mut chunk);
            self.set_processing(false);

            if !chunk.is_empty() {
                self.queue_body(&chunk);
            }
            if flow.is_end() {
                self.queue_final_chunk();
                self.body_done = true;
                continue;
            }
            if chunk.is_empty() {
                // Nothing to send yet; wait for WriterHandle::body_ready().
                return Ok(Async::NotReady);
            }
        }
    }
}
