// Owns a thread pool and a token-aware batch packer over an
// `EmbeddingProvider`: first-fit-decreasing packing bounded by the
// provider's token cap, a bounded worker pool, and futures returned in
// input order.

use std::sync::Arc;
use std::time::Duration;

use tiktoken_rs::CoreBPE;
use tokio::sync::{oneshot, Semaphore};

use crate::application::background::IndexingPipes;
use crate::error::DaemonError;

use super::provider::EmbeddingProvider;

/// Transient provider errors are retried at the batch level; fatal ones
/// are surfaced immediately. Backoff delays double each attempt.
const MAX_TRANSIENT_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

pub struct VectorCalculationManager {
    provider: Arc<dyn EmbeddingProvider>,
    bpe: CoreBPE,
    worker_permits: Arc<Semaphore>,
}

struct SubBatch {
    indices: Vec<usize>,
    texts: Vec<String>,
}

impl VectorCalculationManager {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, worker_count: usize) -> anyhow::Result<Self> {
        Ok(Self {
            provider,
            bpe: tiktoken_rs::cl100k_base()?,
            worker_permits: Arc::new(Semaphore::new(worker_count.max(1))),
        })
    }

    fn token_count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// First-fit-decreasing: sort chunks largest-token-count first, then
    /// place each into the first open sub-batch it fits in, opening a new
    /// sub-batch when none does. A single chunk whose own token count
    /// already exceeds the cap can never fit anywhere and fails with
    /// `ChunkTooLarge` before packing begins.
    fn pack(&self, texts: &[String], cap: usize) -> Result<Vec<SubBatch>, DaemonError> {
        let mut sized: Vec<(usize, usize)> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| (i, self.token_count(t)))
            .collect();

        if let Some((_, too_large)) = sized.iter().find(|(_, tokens)| *tokens > cap) {
            let _ = too_large;
            return Err(DaemonError::ChunkTooLarge);
        }

        sized.sort_by(|a, b| b.1.cmp(&a.1));

        let mut batches: Vec<(usize, SubBatch)> = Vec::new();
        for (idx, tokens) in sized {
            if let Some((used, batch)) = batches.iter_mut().find(|(used, _)| used + tokens <= cap) {
                *used += tokens;
                batch.indices.push(idx);
                batch.texts.push(texts[idx].clone());
            } else {
                batches.push((
                    tokens,
                    SubBatch {
                        indices: vec![idx],
                        texts: vec![texts[idx].clone()],
                    },
                ));
            }
        }

        Ok(batches.into_iter().map(|(_, batch)| batch).collect())
    }

    /// Submits `texts` for embedding and returns one receiver per input
    /// text, in the same order as `texts`. Sub-batches run concurrently up
    /// to the worker pool's bound; cancelling `pipes` stops new sub-batches
    /// from starting but lets in-flight ones finish, so provider calls
    /// already paid for are not wasted.
    pub fn submit_chunks(
        &self,
        texts: Vec<String>,
        pipes: IndexingPipes,
    ) -> Result<Vec<oneshot::Receiver<Result<Vec<f32>, DaemonError>>>, DaemonError> {
        let cap = self.provider.max_batch_tokens();
        let batches = self.pack(&texts, cap)?;

        let mut per_index_tx: Vec<Option<oneshot::Sender<Result<Vec<f32>, DaemonError>>>> =
            Vec::with_capacity(texts.len());
        let mut ordered_rx = Vec::with_capacity(texts.len());
        for _ in 0..texts.len() {
            let (tx, rx) = oneshot::channel();
            per_index_tx.push(Some(tx));
            ordered_rx.push(rx);
        }

        for batch in batches {
            let provider = self.provider.clone();
            let permits = self.worker_permits.clone();
            let pipes = pipes.clone();
            let senders: Vec<_> = batch
                .indices
                .iter()
                .map(|idx| per_index_tx[*idx].take().expect("each index assigned to exactly one batch"))
                .collect();
            let texts = batch.texts;

            tokio::spawn(async move {
                if pipes.is_cancelled() {
                    for tx in senders {
                        let _ = tx.send(Err(DaemonError::Cancelled));
                    }
                    return;
                }

                let _permit = permits.acquire().await;
                let result = embed_with_retry(provider.as_ref(), &texts).await;
                match result {
                    Ok(vectors) => {
                        for (tx, vector) in senders.into_iter().zip(vectors) {
                            let _ = tx.send(Ok(vector));
                        }
                    }
                    Err(err) => {
                        for tx in senders {
                            let _ = tx.send(Err(clone_err(&err)));
                        }
                    }
                }
            });
        }

        Ok(ordered_rx)
    }
}

/// Retries a sub-batch's `embed` call while the provider reports
/// transient errors, up to [`MAX_TRANSIENT_RETRIES`] additional attempts
/// with doubling backoff; a fatal error or exhausted retries is returned
/// as-is.
async fn embed_with_retry(provider: &dyn EmbeddingProvider, texts: &[String]) -> Result<Vec<Vec<f32>>, DaemonError> {
    let mut delay = RETRY_BASE_DELAY;
    for attempt in 0..=MAX_TRANSIENT_RETRIES {
        match provider.embed(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(DaemonError::EmbeddingTransient(message)) => {
                if attempt == MAX_TRANSIENT_RETRIES {
                    return Err(DaemonError::EmbeddingTransient(message));
                }
                tracing::warn!(attempt, %message, "transient embedding error; retrying batch");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(other) => return Err(other),
        }
    }
    unreachable!("loop always returns by the final attempt")
}

fn clone_err(err: &DaemonError) -> DaemonError {
    match err {
        DaemonError::EmbeddingTransient(m) => DaemonError::EmbeddingTransient(m.clone()),
        DaemonError::EmbeddingFatal(m) => DaemonError::EmbeddingFatal(m.clone()),
        DaemonError::ChunkTooLarge => DaemonError::ChunkTooLarge,
        DaemonError::Cancelled => DaemonError::Cancelled,
        other => DaemonError::StorageError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::FakeEmbeddingProvider;

    #[tokio::test]
    async fn futures_resolve_in_input_order() {
        let provider = Arc::new(FakeEmbeddingProvider { dim: 4, max_batch_tokens: 1000 });
        let manager = VectorCalculationManager::new(provider, 2).unwrap();
        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
        let pipes = IndexingPipes::detached();
        let receivers = manager.submit_chunks(texts, pipes).unwrap();

        let mut results = Vec::new();
        for rx in receivers {
            results.push(rx.await.unwrap().unwrap());
        }
        assert_eq!(results[0][0], 1.0);
        assert_eq!(results[1][0], 2.0);
        assert_eq!(results[2][0], 3.0);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_at_the_batch_level() {
        use crate::embedding::provider::FlakyEmbeddingProvider;

        let provider = Arc::new(FlakyEmbeddingProvider {
            dim: 4,
            max_batch_tokens: 1000,
            flaky_calls: std::sync::atomic::AtomicUsize::new(2),
        });
        let manager = VectorCalculationManager::new(provider, 1).unwrap();
        let receivers = manager.submit_chunks(vec!["hello".to_string()], IndexingPipes::detached()).unwrap();
        let vector = receivers.into_iter().next().unwrap().await.unwrap().unwrap();
        assert_eq!(vector[0], 5.0);
    }

    #[tokio::test]
    async fn oversized_chunk_fails_fast() {
        let provider = Arc::new(FakeEmbeddingProvider { dim: 4, max_batch_tokens: 1 });
        let manager = VectorCalculationManager::new(provider, 2).unwrap();
        let texts = vec!["this is definitely more than one token".to_string()];
        let err = manager.submit_chunks(texts, IndexingPipes::detached()).unwrap_err();
        assert!(matches!(err, DaemonError::ChunkTooLarge));
    }
}
