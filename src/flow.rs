/// Result of a user callback that may request early termination.
///
/// Returned from `headers_done`, `body_chunk` and `produce_body` callbacks.
/// `End` lets a callback stop a transfer without the core having to expose
/// a separate cancel-from-inside-a-callback path (see the reentrancy
/// guard notes on `ReaderHandle`/`WriterHandle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the transfer going.
    Continue,
    /// Stop the transfer now; no further body-related callbacks fire.
    End,
}

impl Flow {
    pub fn is_end(&self) -> bool {
        matches!(*self, Flow::End)
    }
}
