//! Embedding provider adapters.

pub mod openai;

use std::sync::Arc;

pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};

use crate::domain::errors::DomainResult;
use crate::domain::models::{EmbeddingProviderKind, EmbeddingsConfig};
use crate::domain::ports::{EmbeddingProvider, NullEmbeddingProvider};

/// Build the provider selected by configuration.
pub fn provider_from_config(config: &EmbeddingsConfig) -> DomainResult<Arc<dyn EmbeddingProvider>> {
    Ok(match config.provider {
        EmbeddingProviderKind::None => Arc::new(NullEmbeddingProvider::new()),
        EmbeddingProviderKind::Openai => {
            Arc::new(OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig::from(config))?)
        }
    })
}
