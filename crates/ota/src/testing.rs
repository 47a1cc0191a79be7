//! Scripted IO used by the receiver tests.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// A reader that hands out its chunks one read at a time.
///
/// A chunk larger than the caller's buffer is split across reads. Once the
/// chunks are exhausted the reader reports end of stream, or an error if
/// built with [`ScriptedReader::failing`].
#[derive(Debug, Default)]
pub(crate) struct ScriptedReader {
    chunks: VecDeque<Vec<u8>>,
    fail_at_end: bool,
    reads: usize,
}

impl ScriptedReader {
    pub(crate) fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self { chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(), fail_at_end: false, reads: 0 }
    }

    pub(crate) fn failing<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self { fail_at_end: true, ..Self::new(chunks) }
    }

    /// Splits `data` into reads of at most `size` bytes.
    pub(crate) fn fragmented(data: &[u8], size: usize) -> Self {
        Self::new(data.chunks(size))
    }

    /// Bytes that were never read
    pub(crate) fn unread(&self) -> Vec<u8> {
        self.chunks.iter().flatten().copied().collect()
    }

    /// Number of reads that returned data, end of stream or an error
    pub(crate) fn reads(&self) -> usize {
        self.reads
    }
}

impl AsyncRead for ScriptedReader {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        self.reads += 1;
        let Some(chunk) = self.chunks.front_mut() else {
            if self.fail_at_end {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
            }
            return Poll::Ready(Ok(()));
        };

        let amt = std::cmp::min(chunk.len(), buf.remaining());
        buf.put_slice(&chunk[..amt]);
        chunk.drain(..amt);
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Poll::Ready(Ok(()))
    }
}
