//! De-duplicating line reader over one child output stream.
//!
//! At most one physical read is in flight per stream. The first caller
//! creates a shared read future and parks it in the reader's slot; every
//! caller that arrives while it is still running clones that future and
//! receives the same line. The raw line is appended to the captured buffer
//! inside the shared future, so each physical line lands exactly once.
//!
//! Handles returned by [`LineStreamReader::read`] may be dropped at any
//! time without cancelling the physical read: the slot keeps the shared
//! future alive and the next caller resumes it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::trace;

use crate::error::{HarnessError, Result};

/// Which child output stream a reader is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one physical read: `Ok(None)` means end of stream.
pub type LineResult = Result<Option<String>>;

/// A cloneable handle on a (possibly shared) in-flight read.
pub type ReadHandle = Shared<BoxFuture<'static, LineResult>>;

type BoxedSource = Box<dyn AsyncRead + Send + Unpin>;
type SharedSource = Arc<tokio::sync::Mutex<BufReader<BoxedSource>>>;

pub struct LineStreamReader {
    kind: StreamKind,
    source: Option<SharedSource>,
    captured: Arc<Mutex<String>>,
    in_flight: Mutex<Option<ReadHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LineStreamReader {
    /// A reader with no stream behind it. Every read returns immediately.
    pub fn detached(kind: StreamKind) -> Self {
        Self {
            kind,
            source: None,
            captured: Arc::new(Mutex::new(String::new())),
            in_flight: Mutex::new(None),
        }
    }

    pub fn attached<R>(kind: StreamKind, source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let boxed: BoxedSource = Box::new(source);
        Self {
            source: Some(Arc::new(tokio::sync::Mutex::new(BufReader::new(boxed)))),
            ..Self::detached(kind)
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn is_attached(&self) -> bool {
        self.source.is_some()
    }

    /// Join the in-flight read, or start one if none is running.
    pub fn read(&self) -> ReadHandle {
        let Some(source) = &self.source else {
            return future::ready(Ok(None)).boxed().shared();
        };

        let mut slot = lock(&self.in_flight);
        if let Some(handle) = slot.as_ref() {
            if handle.peek().is_none() {
                return handle.clone();
            }
        }

        let handle = read_one_line(self.kind, Arc::clone(source), Arc::clone(&self.captured))
            .boxed()
            .shared();
        *slot = Some(handle.clone());
        handle
    }

    /// Next line, trimmed. Empty when detached or at end of stream.
    pub async fn read_line(&self) -> Result<String> {
        Ok(self.read().await?.unwrap_or_default())
    }

    /// Let a read that is still in flight run to completion.
    pub async fn settle(&self) -> Result<()> {
        let pending = lock(&self.in_flight)
            .as_ref()
            .filter(|handle| handle.peek().is_none())
            .cloned();
        if let Some(handle) = pending {
            handle.await?;
        }
        Ok(())
    }

    /// Collect everything left on the stream up to end of file.
    ///
    /// Settles any in-flight read first so no line is split between the
    /// two paths. Returns the newly captured text.
    pub async fn drain_to_end(&self) -> Result<String> {
        let Some(source) = &self.source else {
            return Ok(String::new());
        };
        self.settle().await?;

        let mut raw = Vec::new();
        source
            .lock()
            .await
            .read_to_end(&mut raw)
            .await
            .map_err(|e| HarnessError::stream_io(self.kind, e))?;

        let rest = String::from_utf8_lossy(&raw).into_owned();
        lock(&self.captured).push_str(&rest);
        Ok(rest)
    }

    /// Everything captured from this stream so far.
    pub fn captured(&self) -> String {
        lock(&self.captured).clone()
    }
}

async fn read_one_line(
    kind: StreamKind,
    source: SharedSource,
    captured: Arc<Mutex<String>>,
) -> LineResult {
    let mut raw = Vec::new();
    let n = source
        .lock()
        .await
        .read_until(b'\n', &mut raw)
        .await
        .map_err(|e| HarnessError::stream_io(kind, e))?;
    if n == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&raw).into_owned();
    lock(&captured).push_str(&line);

    let trimmed = line.trim().to_string();
    trace!(stream = %kind, line = %trimmed, "captured line");
    Ok(Some(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn detached_reader_returns_empty_without_reading() {
        let reader = LineStreamReader::detached(StreamKind::Stdout);
        assert!(!reader.is_attached());
        assert_eq!(reader.read_line().await.unwrap(), "");
        assert_eq!(reader.read().await.unwrap(), None);
        assert_eq!(reader.captured(), "");
    }

    #[tokio::test]
    async fn line_is_trimmed_but_captured_raw() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stdout, rx);

        tx.write_all(b"  [runmon] ready  \r\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), "[runmon] ready");
        assert_eq!(reader.captured(), "  [runmon] ready  \r\n");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_physical_read() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stderr, rx);

        let (a, b, c, ()) = tokio::join!(
            reader.read_line(),
            reader.read_line(),
            reader.read_line(),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                tx.write_all(b"first\nsecond\n").await.unwrap();
            }
        );

        assert_eq!(a.unwrap(), "first");
        assert_eq!(b.unwrap(), "first");
        assert_eq!(c.unwrap(), "first");
        assert_eq!(reader.captured(), "first\n");

        assert_eq!(reader.read_line().await.unwrap(), "second");
        assert_eq!(reader.captured(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn dropped_handle_does_not_lose_the_line() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stdout, rx);

        let handle = reader.read();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), handle).await;
        assert!(timed_out.is_err());

        tx.write_all(b"late\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), "late");
        assert_eq!(reader.captured(), "late\n");
    }

    #[tokio::test]
    async fn end_of_stream_reads_as_none() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stdout, rx);

        tx.write_all(b"tail without newline").await.unwrap();
        drop(tx);

        assert_eq!(
            reader.read().await.unwrap().as_deref(),
            Some("tail without newline")
        );
        assert_eq!(reader.read().await.unwrap(), None);
        assert_eq!(reader.read_line().await.unwrap(), "");
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stdout, rx);

        tx.write_all(b"caf\xff\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), "caf\u{fffd}");
    }

    #[tokio::test]
    async fn drain_collects_rest_after_settling_in_flight_read() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stdout, rx);

        let pending = reader.read();
        tx.write_all(b"one\ntwo\nthree").await.unwrap();
        drop(tx);

        let rest = reader.drain_to_end().await.unwrap();
        assert_eq!(rest, "two\nthree");
        assert_eq!(pending.await.unwrap().as_deref(), Some("one"));
        assert_eq!(reader.captured(), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn settle_is_a_no_op_without_in_flight_read() {
        let (_tx, rx) = tokio::io::duplex(64);
        let reader = LineStreamReader::attached(StreamKind::Stderr, rx);
        reader.settle().await.unwrap();
        assert_eq!(reader.captured(), "");
    }
}
