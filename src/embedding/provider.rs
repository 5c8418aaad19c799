// The embedding provider is treated as a black box: it turns a batch of
// text chunks into fixed-length vectors and carries its own maximum-tokens-
// per-batch cap. The production implementation wraps `async-openai`.

use async_trait::async_trait;

use crate::error::DaemonError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, DaemonError>;

    fn dim(&self) -> usize;

    /// Provider-imposed maximum tokens per single `embed` call. Treated as
    /// configuration, not a language constant: different providers have
    /// different caps.
    fn max_batch_tokens(&self) -> usize;
}

pub struct OpenAiEmbeddingProvider {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dim: usize,
    max_batch_tokens: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(model: impl Into<String>, dim: usize, max_batch_tokens: usize) -> Self {
        Self {
            client: async_openai::Client::new(),
            model: model.into(),
            dim,
            max_batch_tokens,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, DaemonError> {
        use async_openai::types::CreateEmbeddingRequestArgs;

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(batch.to_vec())
            .build()
            .map_err(|e| DaemonError::EmbeddingFatal(e.to_string()))?;

        let response = self.client.embeddings().create(request).await.map_err(|e| {
            // async-openai surfaces rate limits and 5xx as the same error
            // variant; treat anything here as transient and let the
            // vector manager decide whether to retry at the batch level.
            DaemonError::EmbeddingTransient(e.to_string())
        })?;

        Ok(response
            .data
            .into_iter()
            .map(|entry| entry.embedding.into_iter().map(|v| v as f32).collect())
            .collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_batch_tokens(&self) -> usize {
        self.max_batch_tokens
    }
}

/// Deterministic fake used by tests: returns a vector derived from the text
/// length so results are stable without a network call.
#[cfg(any(test, feature = "test-util"))]
pub struct FakeEmbeddingProvider {
    pub dim: usize,
    pub max_batch_tokens: usize,
}

/// Fails with `EmbeddingTransient` for the first `flaky_calls` invocations
/// of `embed`, then succeeds like [`FakeEmbeddingProvider`]. Used to
/// exercise the Vector Calculation Manager's batch-level retry path.
#[cfg(any(test, feature = "test-util"))]
pub struct FlakyEmbeddingProvider {
    pub dim: usize,
    pub max_batch_tokens: usize,
    pub flaky_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl EmbeddingProvider for FlakyEmbeddingProvider {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, DaemonError> {
        if self.flaky_calls.load(std::sync::atomic::Ordering::SeqCst) > 0 {
            self.flaky_calls.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err(DaemonError::EmbeddingTransient("simulated transient failure".to_string()));
        }
        Ok(batch
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dim];
                vector[0] = text.len() as f32;
                vector
            })
            .collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_batch_tokens(&self) -> usize {
        self.max_batch_tokens
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, DaemonError> {
        Ok(batch
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dim];
                vector[0] = text.len() as f32;
                vector
            })
            .collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_batch_tokens(&self) -> usize {
        self.max_batch_tokens
    }
}
