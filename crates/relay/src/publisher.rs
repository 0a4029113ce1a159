//! Message transport boundary.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::PublishError;

/// Opaque byte publish onto a topic or queue.
///
/// The relay derives the topic from the row's event type and only looks at
/// success or failure of the call.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Publisher that only logs. Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl MessagePublisher for LoggingPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        tracing::info!(topic, bytes = payload.len(), "Published event");
        Ok(())
    }
}

/// A message captured by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<PublishedMessage>,
    fail_on_publish: bool,
}

/// In-memory publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<Mutex<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent publish fail until reset.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state().fail_on_publish = fail;
    }

    /// Messages published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn published_count(&self) -> usize {
        self.state().published.len()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut state = self.state();
        if state.fail_on_publish {
            return Err(PublishError::Transport("broker unavailable".to_string()));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
