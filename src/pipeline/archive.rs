//! ZIP archive streaming
//!
//! Segments are compressed into a ZIP written in streaming mode, so the
//! archive never has to exist in full, in memory or on disk. The blocking zip
//! writer runs on the blocking pool and hands fixed-size chunks through a
//! bounded channel to the HTTP response body.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::discovery::SegmentFile;
use crate::error::{ArchiveError, SplitError};

/// Size of the chunks handed to the response body
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Deflate level; segments are small and compressed once per request
const COMPRESSION_LEVEL: i64 = 9;

/// What a finished archive contained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    /// Uncompressed bytes read from segment files
    pub input_bytes: u64,
}

/// Write `segments`, in the given order, as a ZIP archive into `sink`.
///
/// Each entry is named after its source file and copied from disk through a
/// small buffer; one segment is open at a time. The archive is finalized only
/// after every entry was written. The first error aborts the whole archive:
/// nothing more reaches `sink`, so it never holds a central directory.
pub fn write_archive<W: Write>(
    segments: &[SegmentFile],
    sink: W,
) -> Result<ArchiveSummary, ArchiveError> {
    let aborted = Rc::new(Cell::new(false));
    let mut zip = ZipWriter::new_stream(AbortableSink {
        inner: sink,
        aborted: Rc::clone(&aborted),
    });
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let mut append_all = || -> Result<u64, ArchiveError> {
        let mut input_bytes = 0u64;
        for segment in segments {
            let mut file =
                File::open(&segment.path).map_err(|source| ArchiveError::ReadSegment {
                    path: segment.path.clone(),
                    source,
                })?;

            zip.start_file(segment.name.as_str(), options)?;
            let copied = io::copy(&mut file, &mut zip).map_err(|source| {
                // Reading and writing share io::copy; tell them apart by kind
                if is_sink_error(&source) {
                    ArchiveError::Write(source)
                } else {
                    ArchiveError::ReadSegment {
                        path: segment.path.clone(),
                        source,
                    }
                }
            })?;
            debug!("Archived {} ({} bytes)", segment.name, copied);
            input_bytes += copied;
        }
        Ok(input_bytes)
    };

    match append_all() {
        Ok(input_bytes) => {
            zip.finish()?;
            Ok(ArchiveSummary {
                entries: segments.len(),
                input_bytes,
            })
        }
        Err(e) => {
            // Dropping the writer would otherwise finalize what was written
            aborted.set(true);
            drop(zip);
            Err(e)
        }
    }
}

/// Sink wrapper that refuses all writes once the archive was aborted
struct AbortableSink<W> {
    inner: W,
    aborted: Rc<Cell<bool>>,
}

impl<W: Write> AbortableSink<W> {
    fn check(&self) -> io::Result<()> {
        if self.aborted.get() {
            Err(io::Error::other("archive aborted"))
        } else {
            Ok(())
        }
    }
}

impl<W: Write> Write for AbortableSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}

fn is_sink_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::TimedOut | io::ErrorKind::WriteZero
    )
}

/// `io::Write` adapter that forwards bytes into a bounded channel.
///
/// Writes block while the channel is full, which is what throttles the zip
/// writer to the speed of the client. They fail with `BrokenPipe` once the
/// receiving side is gone and with `TimedOut` once `cancel` fires.
pub struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
    buf: Vec<u8>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl ChannelWriter {
    /// `runtime` drives the channel sends; the writer itself must run on a
    /// blocking thread, never on a runtime worker.
    pub fn new(tx: mpsc::Sender<Bytes>, cancel: CancellationToken, runtime: Handle) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
            cancel,
            runtime,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(CHUNK_SIZE),
        ));

        let tx = &self.tx;
        let cancel = &self.cancel;
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "archive stream cancelled",
                )),
                sent = tx.send(chunk) => sent.map_err(|_| io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "archive receiver closed",
                )),
            }
        })
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "archive stream cancelled",
            ));
        }
        let room = CHUNK_SIZE - self.buf.len();
        let n = data.len().min(room);
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Handle on a running archive writer.
///
/// Completion is explicit: [`ArchiveHandle::wait`] returns only after the
/// writer stopped touching segment files, so cleanup can safely follow it.
pub struct ArchiveHandle {
    task: JoinHandle<Result<ArchiveSummary, ArchiveError>>,
    done: oneshot::Sender<bool>,
    cancel: CancellationToken,
}

/// Start writing `segments` as a ZIP archive into a streaming response body.
///
/// The body yields archive chunks as they are produced. After the last chunk
/// it waits for the outcome reported through the handle: success ends the
/// body normally, failure ends it with an error so the connection is aborted
/// instead of delivering a truncated archive as if it were complete.
pub fn spawn_archive(segments: Vec<SegmentFile>, capacity: usize) -> (Body, ArchiveHandle) {
    let (tx, rx) = mpsc::channel::<Bytes>(capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel::<bool>();
    let cancel = CancellationToken::new();

    let writer = ChannelWriter::new(tx, cancel.clone(), Handle::current());
    let task = tokio::task::spawn_blocking(move || -> Result<ArchiveSummary, ArchiveError> {
        let mut writer = writer;
        let summary = write_archive(&segments, &mut writer)?;
        writer.flush()?;
        Ok(summary)
    });

    let chunks = ReceiverStream::new(rx).map(Ok::<Bytes, io::Error>);
    let tail = futures::stream::once(async move {
        match done_rx.await {
            Ok(true) => None,
            _ => Some(Err(io::Error::other("archive stream aborted"))),
        }
    })
    .filter_map(futures::future::ready);

    let body = Body::from_stream(chunks.chain(tail));
    (
        body,
        ArchiveHandle {
            task,
            done: done_tx,
            cancel,
        },
    )
}

impl ArchiveHandle {
    /// Wait for the writer to reach a terminal state.
    ///
    /// If `timeout` elapses first the writer is cancelled, and this still
    /// waits for it to stop before returning `StreamTimeout`.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<ArchiveSummary, SplitError> {
        let ArchiveHandle {
            mut task,
            done,
            cancel,
        } = self;

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => Ok(joined),
                Err(_) => {
                    warn!(
                        "Archive stream exceeded {} seconds, cancelling",
                        limit.as_secs()
                    );
                    cancel.cancel();
                    let _ = task.await;
                    Err(SplitError::StreamTimeout {
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => Ok(task.await),
        };

        let result = match joined {
            Ok(Ok(Ok(summary))) => Ok(summary),
            Ok(Ok(Err(e))) => Err(SplitError::Archive(e)),
            Ok(Err(join_err)) => Err(SplitError::Archive(ArchiveError::Join(
                join_err.to_string(),
            ))),
            Err(e) => Err(e),
        };

        // The body may already be gone if the client disconnected
        let _ = done.send(result.is_ok());
        result
    }
}
