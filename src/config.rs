/// Tunables for a [`Reader`](::Reader)/[`Writer`](::Writer) pair.
///
/// The source this crate is modeled on hard-codes these as a stack-sized
/// read chunk and a per-reader boolean; here they're promoted to a small
/// config struct the way the rest of this lineage configures its readers
/// (compare `server::Config`/`client::Config` in the sibling protocol
/// crate), scoped to only what the transfer core itself needs.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Size of the stack buffer used to drain the channel on each readable
    /// event (spec step "Drain the channel"). Does not bound `recv_buf`
    /// itself, only how much is read from the channel per `read()` call.
    pub read_chunk_size: usize,
    /// When true, delivered body bytes are removed from `recv_buf` as soon
    /// as they're handed to a callback, bounding peak memory for streaming
    /// consumers. When false, the whole body is retained for a final
    /// consolidated delivery in `done`.
    pub overwrite_chunks: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            read_chunk_size: 8 * 1024,
            overwrite_chunks: true,
        }
    }
}
