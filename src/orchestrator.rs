//! Bounded fan-out of chunk processing with ordered, fail-fast collection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::pipeline::{ChunkProcessor, ClipResult};
use crate::utils::Chunk;

/// Runs a [`ChunkProcessor`] over every chunk with at most `workers` chunks in
/// flight.
///
/// Results come back in chunk order whatever the completion order. The first
/// failure stops new chunks from starting; chunks already running finish and
/// keep their artifacts, then the failure is returned.
pub struct ParallelOrchestrator<P> {
    processor: Arc<P>,
    workers: usize,
}

impl<P: ChunkProcessor> ParallelOrchestrator<P> {
    pub fn new(processor: Arc<P>, workers: usize) -> Self {
        Self {
            processor,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run(&self, chunks: Vec<Chunk>) -> Result<Vec<ClipResult>> {
        let total = chunks.len();
        let slots_permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        // task id -> (result slot, chunk index)
        let mut slot_of_task = HashMap::with_capacity(total);

        for (slot, chunk) in chunks.into_iter().enumerate() {
            let chunk_index = chunk.index;
            let processor = Arc::clone(&self.processor);
            let permits = Arc::clone(&slots_permits);
            let handle = tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Err(PipelineError::Cancelled);
                };
                info!("Processing chunk {}/{}", chunk.index + 1, total);
                processor
                    .process(&chunk)
                    .await
                    .map_err(|e| e.in_chunk(chunk.index))
            });
            slot_of_task.insert(handle.id(), (slot, chunk_index));
        }

        let mut slots: Vec<Option<ClipResult>> = vec![None; total];
        let mut first_error: Option<PipelineError> = None;

        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((id, result)) => result.map(|clip| (slot_of_task[&id].0, clip)),
                Err(join_err) => {
                    let failure =
                        PipelineError::generation(format!("chunk task did not complete: {join_err}"));
                    Err(match slot_of_task.get(&join_err.id()) {
                        Some(&(_, index)) => failure.in_chunk(index),
                        None => failure,
                    })
                }
            };
            match outcome {
                Ok((slot, clip)) => slots[slot] = Some(clip),
                Err(PipelineError::Cancelled) => {}
                Err(e) => {
                    if first_error.is_none() {
                        error!("{}", e);
                        // waiting chunks see a closed semaphore and bail out
                        slots_permits.close();
                        first_error = Some(e);
                    } else {
                        error!("Additional failure after abort: {}", e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(slot, clip)| {
                clip.ok_or_else(|| PipelineError::generation(format!("no clip for chunk slot {slot}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Finishes later chunks first and can fail on one index.
    struct ReverseTimed {
        total: usize,
        fail_at: Option<usize>,
        panic_at: Option<usize>,
        started: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ReverseTimed {
        fn new(total: usize, fail_at: Option<usize>) -> Self {
            Self {
                total,
                fail_at,
                panic_at: None,
                started: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChunkProcessor for ReverseTimed {
        async fn process(&self, chunk: &Chunk) -> Result<ClipResult> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = (self.total - chunk.index) as u64 * 5;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_at == Some(chunk.index) {
                panic!("encoder crashed on chunk {}", chunk.index);
            }
            if self.fail_at == Some(chunk.index) {
                return Err(PipelineError::generation("diffusion crashed"));
            }
            Ok(ClipResult {
                index: chunk.index,
                path: PathBuf::from(format!("chunk_{:03}/clip.mp4", chunk.index)),
                duration: 1.0,
            })
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|index| Chunk {
                index,
                text: format!("Sentence {index}."),
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_follow_chunk_order() {
        for workers in [1, 2, 4] {
            let processor = Arc::new(ReverseTimed::new(6, None));
            let orchestrator = ParallelOrchestrator::new(Arc::clone(&processor), workers);

            let clips = orchestrator.run(chunks(6)).await.unwrap();

            let order: Vec<usize> = clips.iter().map(|c| c.index).collect();
            assert_eq!(order, vec![0, 1, 2, 3, 4, 5], "workers={workers}");
            assert!(processor.max_in_flight.load(Ordering::SeqCst) <= workers);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_is_used_concurrently() {
        let processor = Arc::new(ReverseTimed::new(8, None));
        let orchestrator = ParallelOrchestrator::new(Arc::clone(&processor), 4);
        orchestrator.run(chunks(8)).await.unwrap();
        assert!(processor.max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_chunk_index() {
        let processor = Arc::new(ReverseTimed::new(5, Some(3)));
        let orchestrator = ParallelOrchestrator::new(processor, 2);

        let err = orchestrator.run(chunks(5)).await.unwrap_err();
        match err {
            PipelineError::Chunk { index, source } => {
                assert_eq!(index, 3);
                assert!(matches!(*source, PipelineError::Generation(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_panicked_chunk_is_reported_with_index() {
        let processor = Arc::new(ReverseTimed {
            panic_at: Some(2),
            ..ReverseTimed::new(4, None)
        });
        let orchestrator = ParallelOrchestrator::new(processor, 2);

        let err = orchestrator.run(chunks(4)).await.unwrap_err();
        match err {
            PipelineError::Chunk { index, source } => {
                assert_eq!(index, 2);
                assert!(source.to_string().contains("did not complete"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_chunks() {
        let processor = Arc::new(ReverseTimed::new(20, Some(0)));
        let orchestrator = ParallelOrchestrator::new(Arc::clone(&processor), 1);

        assert!(orchestrator.run(chunks(20)).await.is_err());
        assert!(processor.started.load(Ordering::SeqCst) < 20);
    }

    #[tokio::test]
    async fn test_no_chunks_yields_no_clips() {
        let orchestrator = ParallelOrchestrator::new(Arc::new(ReverseTimed::new(0, None)), 1);
        assert!(orchestrator.run(Vec::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_zero_workers_clamped() {
        let orchestrator = ParallelOrchestrator::new(Arc::new(ReverseTimed::new(1, None)), 0);
        assert_eq!(orchestrator.workers(), 1);
    }
}
