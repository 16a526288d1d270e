//! Work queue seam
//!
//! `WorkQueue` is the object-safe boundary between the consumer and the
//! actual queue service, so tests can run against an in-memory double.
//! `SqsQueue` is the production implementation; a second instance pointed at
//! the DLQ URL serves as the dead-letter sink's outbound queue.

use async_trait::async_trait;
use aws_sdk_sqs::Client as SqsClient;
use shared::PipelineError;

/// One received message with the handle needed to delete it
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub receipt: String,
    pub body: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Receive up to the configured batch of messages (long poll).
    async fn receive(&self) -> Result<Vec<QueueMessage>, PipelineError>;

    /// Delete a message by receipt handle. Deleting an already-deleted
    /// message is not an error.
    async fn delete(&self, receipt: &str) -> Result<(), PipelineError>;

    /// Publish a message body to this queue.
    async fn send(&self, body: &str) -> Result<(), PipelineError>;
}

/// SQS-backed work queue
#[derive(Clone)]
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
    max_messages: i32,
    wait_time_seconds: i32,
    visibility_timeout: i32,
}

impl SqsQueue {
    pub fn new(
        client: SqsClient,
        queue_url: String,
        max_messages: i32,
        wait_time_seconds: i32,
        visibility_timeout: i32,
    ) -> Self {
        Self {
            client,
            queue_url,
            max_messages,
            wait_time_seconds,
            visibility_timeout,
        }
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>, PipelineError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_seconds)
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("sqs receive: {e}")))?;

        let msgs = resp
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                Some(QueueMessage {
                    id: m.message_id.clone().unwrap_or_default(),
                    receipt: m.receipt_handle.clone()?,
                    body: m.body?,
                })
            })
            .collect();
        Ok(msgs)
    }

    async fn delete(&self, receipt: &str) -> Result<(), PipelineError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("sqs delete: {e}")))?;
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<(), PipelineError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("sqs send: {e}")))?;
        Ok(())
    }
}
