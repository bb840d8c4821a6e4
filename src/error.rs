quick_error! {
    /// Malformed chunked-transfer framing.
    ///
    /// The source this crate is modeled on doesn't distinguish these from a
    /// transport error or premature hangup: the decoder just stalls waiting
    /// for bytes that will never arrive. This crate reports them instead --
    /// a deliberate enhancement, not a silent behavior change, since it only
    /// fires where the original design would have hung forever.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProtocolError {
        /// The hex chunk-size run was empty or contained no valid digits.
        BadChunkSize {
            description("invalid or missing chunk size")
        }
        /// A chunk's payload wasn't followed by the mandatory CRLF before
        /// the next chunk header (the zero-size terminating chunk included).
        MissingPayloadTerminator {
            description("chunk payload not terminated by CRLF")
        }
    }
}
