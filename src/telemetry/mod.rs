//! Inbound telemeter queue
//!
//! Parsed agent messages are buffered here, deduplicated against a bounded
//! recency window, kept ordered by (priority desc, arrival asc), and handed to
//! subscribers in batches by a periodic tick.

mod dedup;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::flag::InProgress;
use crate::registry::duration_ms;
use crate::types::identifiers::AgentId;
use crate::types::messages::{AgentMessage, InboundEnvelope, InboundMessage, MessagePriority};
use crate::types::stats::InboundStats;

pub use dedup::DedupWindow;

/// Boxed future returned by a [`BatchSubscriber`]
pub type BatchFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Async consumer of emitted batches
pub type BatchSubscriber = Arc<dyn Fn(Arc<[AgentMessage]>) -> BatchFuture + Send + Sync>;

struct Buffer {
    envelopes: VecDeque<InboundEnvelope>,
    dedup: DedupWindow,
    next_seq: u64,
}

/// Deduplicating, priority-ordered inbound buffer
pub struct TelemeterQueue {
    buffer: Mutex<Buffer>,
    subscribers: RwLock<Vec<BatchSubscriber>>,
    processing: InProgress,
    batch_size: usize,
    interval: Duration,
}

impl TelemeterQueue {
    /// Create a queue emitting at most `batch_size` messages per tick
    #[must_use]
    pub fn new(batch_size: usize, interval: Duration, dedup_window: usize) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                envelopes: VecDeque::new(),
                dedup: DedupWindow::new(dedup_window),
                next_seq: 0,
            }),
            subscribers: RwLock::new(Vec::new()),
            processing: InProgress::default(),
            batch_size: batch_size.max(1),
            interval,
        }
    }

    /// Register a batch consumer
    pub fn subscribe<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<[AgentMessage]>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let subscriber: BatchSubscriber = Arc::new(move |batch| Box::pin(f(batch)) as BatchFuture);
        self.subscribers.write().push(subscriber);
    }

    /// Buffer a message from `agent_id`.
    ///
    /// `priority` overrides the priority derived from the message shape.
    /// Returns `false` when the message repeats a key still in the dedup
    /// window; the duplicate is dropped.
    pub fn enqueue(
        &self,
        message: InboundMessage,
        agent_id: AgentId,
        priority: Option<MessagePriority>,
    ) -> bool {
        let priority = priority.unwrap_or_else(|| message.derive_priority());
        let mut buffer = self.buffer.lock();

        let seq = buffer.next_seq;
        buffer.next_seq += 1;
        let dedup_key = message
            .dedup_key(&agent_id)
            .unwrap_or_else(|| format!("{agent_id}:local:{seq}"));

        if !buffer.dedup.insert(&dedup_key) {
            log::debug!("Dropping duplicate message {dedup_key}");
            return false;
        }

        let envelope = InboundEnvelope {
            message,
            agent_id,
            priority,
            dedup_key,
            enqueued_at: Utc::now(),
            seq,
        };
        let at = buffer
            .envelopes
            .partition_point(|queued| queued.priority >= envelope.priority);
        buffer.envelopes.insert(at, envelope);
        true
    }

    /// Emit the next batch to every subscriber.
    ///
    /// Returns the number of messages emitted: zero when the buffer is empty or
    /// another batch is still being processed.
    ///
    /// # Errors
    /// Returns the last subscriber error after every subscriber has run
    pub async fn tick(&self) -> Result<usize> {
        let Some(_running) = self.processing.try_begin() else {
            return Ok(0);
        };

        let batch: Vec<InboundEnvelope> = {
            let mut buffer = self.buffer.lock();
            let take = self.batch_size.min(buffer.envelopes.len());
            buffer.envelopes.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let messages: Arc<[AgentMessage]> = batch
            .into_iter()
            .map(|envelope| envelope.message.normalize(envelope.agent_id, envelope.enqueued_at))
            .collect();
        let emitted = messages.len();
        log::debug!("Emitting inbound batch of {emitted}");

        let subscribers = self.subscribers.read().clone();
        let mut failure = None;
        for subscriber in subscribers {
            if let Err(e) = subscriber(Arc::clone(&messages)).await {
                log::error!("Inbound batch subscriber failed: {e}");
                failure = Some(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(emitted),
        }
    }

    /// Messages waiting for the next batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().envelopes.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().envelopes.is_empty()
    }

    /// Tick interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current queue statistics
    #[must_use]
    pub fn stats(&self) -> InboundStats {
        let buffer = self.buffer.lock();
        InboundStats {
            queue_length: buffer.envelopes.len(),
            batch_size: self.batch_size,
            interval_ms: duration_ms(self.interval),
            dedup_entries: buffer.dedup.len(),
            processing: self.processing.is_set(),
        }
    }
}
