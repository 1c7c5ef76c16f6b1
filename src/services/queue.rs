use redis::AsyncCommands;

use crate::models::link::{LinkRetryStatus, StageError, SubmittedLink};

const QUEUE_KEY: &str = "job_links:pending";
const PROCESSING_KEY: &str = "job_links:processing";

/// Redis-backed queue of submitted links awaiting a pipeline run.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a link for processing.
    pub async fn enqueue(&self, link: &SubmittedLink) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(link)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Pop the oldest link, moving it onto the processing list.
    ///
    /// Returns the payload alongside the link so `complete` can remove the
    /// exact entry even if re-serialization would differ.
    pub async fn dequeue(&self) -> Result<Option<(SubmittedLink, String)>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => match serde_json::from_str::<SubmittedLink>(&payload) {
                Ok(link) => Ok(Some((link, payload))),
                Err(e) => {
                    // Unreadable entries would otherwise sit in processing forever.
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
                    Err(QueueError::Serialize(e))
                }
            },
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Get the current queue depth (pending links).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    /// Remove a dequeued payload from the processing list.
    pub async fn complete(&self, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, payload).await?;
        Ok(())
    }

    /// Put the next attempt of `link` back on the queue and drop the current one.
    pub async fn requeue(&self, link: &SubmittedLink, payload: &str) -> Result<(), QueueError> {
        self.enqueue(&link.next_attempt()).await?;
        self.complete(payload).await
    }
}

/// Long-horizon scheduling rule.
///
/// `attempts_count` is the number of runs before the one that just finished;
/// a link is abandoned once the error cannot be retried or `max_attempts`
/// runs have completed.
pub fn retry_status(attempts_count: u32, max_attempts: u32, error: &StageError) -> LinkRetryStatus {
    if error.retryable && has_runs_left(attempts_count, max_attempts) {
        LinkRetryStatus::PendingRetry
    } else {
        LinkRetryStatus::Failed
    }
}

/// Whether another run fits in the budget after the current one.
pub fn has_runs_left(attempts_count: u32, max_attempts: u32) -> bool {
    attempts_count.saturating_add(1) < max_attempts
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
