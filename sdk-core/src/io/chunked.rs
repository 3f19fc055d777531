//! Fixed-size chunk tracker and the bounded-parallel worker pool that
//! drives one Source/Destination pair to completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChunkedIoError;
use crate::feedback::Feedback;
use crate::io::{Destination, Source};
use crate::retry::{Action, Retry, RetryError};

/// One fixed-size chunk of the logical transfer.
#[derive(Debug, Clone, Copy)]
pub struct ChunkMetadata {
    pub id: usize,
    pub offset: u64,
    pub size: u64,
}

/// Tracks completion of every chunk covering `[0, total_size)` in
/// `chunk_size` strides; the last chunk may be smaller. Survives across
/// failed `run()` attempts so a later run can resume.
pub struct ChunkedIoTracker {
    chunks: Vec<ChunkMetadata>,
    completed: Vec<AtomicBool>,
    total_size: u64,
}

impl ChunkedIoTracker {
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut id = 0usize;
        while offset < total_size {
            let size = chunk_size.min(total_size - offset);
            chunks.push(ChunkMetadata { id, offset, size });
            offset += size;
            id += 1;
        }
        let completed = chunks.iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            chunks,
            completed,
            total_size,
        }
    }

    pub fn chunks(&self) -> &[ChunkMetadata] {
        &self.chunks
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_complete(&self, id: usize) -> bool {
        self.completed[id].load(Ordering::SeqCst)
    }

    /// Marks a chunk complete. Idempotent.
    pub fn set_complete(&self, id: usize) {
        self.completed[id].store(true, Ordering::SeqCst);
    }

    /// Fraction of chunks completed, in `[0, 1]`. `0` when there are no
    /// chunks.
    pub fn progress(&self) -> f64 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        let done = self.completed.iter().filter(|c| c.load(Ordering::SeqCst)).count();
        done as f64 / self.chunks.len() as f64
    }

    pub fn is_done(&self) -> bool {
        self.completed.iter().all(|c| c.load(Ordering::SeqCst))
    }

    fn incomplete_ids(&self) -> VecDeque<usize> {
        self.chunks
            .iter()
            .filter(|c| !self.is_complete(c.id))
            .map(|c| c.id)
            .collect()
    }
}

/// Drives one Source/Destination pair to completion using up to
/// `max_workers` concurrent chunk transfers.
pub struct ChunkedIoManager {
    tracker: ChunkedIoTracker,
}

impl ChunkedIoManager {
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        Self {
            tracker: ChunkedIoTracker::new(total_size, chunk_size),
        }
    }

    pub fn tracker(&self) -> &ChunkedIoTracker {
        &self.tracker
    }

    /// Moves `tracker().total_size()` bytes from `source` to
    /// `destination`. On success every chunk's retry-budget was refreshed
    /// by `reset_counter()`, so transient mid-transfer failures don't
    /// monotonically consume it. On a non-recoverable failure, the
    /// tracker is left intact so a later `run()` with a fresh `source`
    /// can resume from the first incomplete chunk.
    pub async fn run(
        &self,
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
        max_workers: usize,
        retry: Retry,
        cancel: CancellationToken,
        feedback: Arc<dyn Feedback>,
    ) -> Result<(), ChunkedIoError> {
        let pending = self.tracker.incomplete_ids();
        if pending.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut tasks = tokio::task::JoinSet::new();

        for id in pending {
            let meta = self.tracker.chunks[id];
            let source = source.clone();
            let destination = destination.clone();
            let semaphore = semaphore.clone();
            // Each chunk gets its own copy of the configured policy, so a
            // slow or flaky chunk's backoff never blocks the other
            // concurrently-running chunks; only the policy (max attempts,
            // backoff shape) is shared, not an in-flight attempt counter.
            let mut retry = retry.clone();
            let cancel = cancel.clone();
            let feedback = feedback.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                if cancel.is_cancelled() {
                    debug!(chunk_id = meta.id, "skipping chunk: run cancelled");
                    return Ok(None);
                }

                let outcome = retry
                    .run(|mut attempt| {
                        let source = source.clone();
                        let destination = destination.clone();
                        async move {
                            match transfer_one_chunk(&*source, &*destination, meta).await {
                                Ok(()) => {
                                    attempt.reset_counter();
                                    Action::Done(())
                                }
                                Err(e @ ChunkedIoError::Recoverable(_)) => {
                                    let recovered =
                                        source.recover().await || destination.recover().await;
                                    if recovered {
                                        Action::Retry(e)
                                    } else {
                                        Action::Fatal(e)
                                    }
                                }
                                Err(e) => Action::Fatal(e),
                            }
                        }
                    })
                    .await;

                match outcome {
                    Ok(()) => Ok(Some(meta.id)),
                    Err(RetryError::Fatal(e)) => Err(e),
                    Err(RetryError::Exhausted(errors)) => Err(ChunkedIoError::RetryExhausted {
                        caused_by: Box::new(RetryError::Exhausted(errors)),
                    }),
                }
            });
        }

        let mut first_error: Option<ChunkedIoError> = None;
        while let Some(result) = tasks.join_next().await {
            match result.expect("chunk task panicked") {
                Ok(Some(id)) => {
                    self.tracker.set_complete(id);
                    feedback.progress(self.tracker.progress() * 100.0, None);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "chunk transfer failed permanently");
                    if first_error.is_none() {
                        first_error = Some(e);
                        cancel.cancel();
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn transfer_one_chunk(
    source: &dyn Source,
    destination: &dyn Destination,
    meta: ChunkMetadata,
) -> Result<(), ChunkedIoError> {
    let data = source.read_chunk(meta.offset, meta.size).await?;
    destination.write_chunk(meta.offset, data).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_covers_total_size_with_a_smaller_final_chunk() {
        let tracker = ChunkedIoTracker::new(250, 100);
        let sizes: Vec<u64> = tracker.chunks().iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(tracker.progress(), 0.0);
    }

    #[test]
    fn set_complete_is_idempotent_and_tracks_progress() {
        let tracker = ChunkedIoTracker::new(100, 50);
        tracker.set_complete(0);
        tracker.set_complete(0);
        assert_eq!(tracker.progress(), 0.5);
        tracker.set_complete(1);
        assert!(tracker.is_done());
        assert_eq!(tracker.progress(), 1.0);
    }
}
