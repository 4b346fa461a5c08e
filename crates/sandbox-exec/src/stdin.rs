//! Piped-stdin detection, bounded chunking, and delivery into a session.

use std::io::Read;
use std::os::fd::RawFd;

use tracing::debug;

use sandbox_rpc::ControlTransport;

use crate::error::PipelineError;
use crate::session::ProcessSession;

/// Upper bound for one stdin chunk on the wire.
pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// Whether the local process's stdin is fed by a pipe rather than a
/// terminal. A failed stat reads as "not piped" so detection never crashes
/// an otherwise healthy run.
pub fn stdin_is_piped() -> bool {
    fd_is_fifo(libc::STDIN_FILENO)
}

fn fd_is_fifo(fd: RawFd) -> bool {
    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat writes into the provided buffer and is otherwise
    // side-effect free; a bad fd yields -1, handled below.
    let rc = unsafe { libc::fstat(fd, stat.as_mut_ptr()) };
    if rc != 0 {
        return false;
    }
    let stat = unsafe { stat.assume_init() };
    (stat.st_mode & libc::S_IFMT) == libc::S_IFIFO
}

/// Reads a byte source in chunks of at most `max_bytes`.
///
/// When the source is textual, a multi-byte character is never split across
/// two chunks: an incomplete UTF-8 sequence at a chunk boundary is carried
/// into the next chunk. Sources that are not valid UTF-8 are chunked purely
/// by byte count. Concatenating all chunks always reproduces the source
/// exactly.
pub struct ChunkReader<R: Read> {
    source: R,
    max_bytes: usize,
    carry: Vec<u8>,
    eof: bool,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(source: R, max_bytes: usize) -> Result<Self, PipelineError> {
        if max_bytes == 0 {
            return Err(PipelineError::InvalidChunkSize(max_bytes));
        }
        Ok(Self {
            source,
            max_bytes,
            carry: Vec::new(),
            eof: false,
        })
    }

    /// Next chunk, or `None` at end of input. An empty source yields zero
    /// chunks and completes successfully.
    pub fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = std::mem::take(&mut self.carry);

        while buf.len() < self.max_bytes && !self.eof {
            let start = buf.len();
            buf.resize(self.max_bytes, 0);
            match self.source.read(&mut buf[start..]) {
                Ok(0) => {
                    buf.truncate(start);
                    self.eof = true;
                }
                Ok(n) => buf.truncate(start + n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    buf.truncate(start);
                }
                Err(e) => return Err(e),
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }
        if self.eof {
            // Final chunk; nothing left to rebalance against.
            return Ok(Some(buf));
        }

        // The buffer is full. Hold back an incomplete trailing character so
        // textual sources never see a split code point; anything invalid in
        // the middle marks the source as binary and chunks by byte count.
        if let Err(e) = std::str::from_utf8(&buf) {
            if e.error_len().is_none() && e.valid_up_to() > 0 {
                self.carry = buf.split_off(e.valid_up_to());
            }
        }
        Ok(Some(buf))
    }
}

/// How a full stdin delivery concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinDelivery {
    /// Every chunk was delivered and (when supported) stdin was half-closed.
    Complete,
    /// The process exited while input was still being delivered. Non-fatal:
    /// the `end` event still determines the run's outcome.
    Interrupted,
}

/// Drains `source` into the session in order.
///
/// A not-found reply to any chunk stops delivery immediately (no further
/// chunks, no half-close) and reports `Interrupted`. All other delivery and
/// half-close failures are fatal. The half-close is only attempted when the
/// transport supports it.
pub fn pump<R: Read, T: ControlTransport + 'static>(
    source: R,
    session: &ProcessSession<T>,
    max_bytes: usize,
) -> Result<StdinDelivery, PipelineError> {
    let mut chunks = ChunkReader::new(source, max_bytes)?;

    while let Some(chunk) = chunks.next_chunk()? {
        match session.send_stdin(&chunk) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(pid = session.pid(), "process exited during stdin delivery");
                return Ok(StdinDelivery::Interrupted);
            }
            Err(e) => return Err(PipelineError::Deliver(e)),
        }
    }

    if session.supports_stdin_close() {
        match session.close_stdin() {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(pid = session.pid(), "process exited before stdin close");
            }
            Err(e) => return Err(PipelineError::Close(e)),
        }
    }

    Ok(StdinDelivery::Complete)
}
