//! Application state for ingest-server

use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use aws_sdk_sqs::Client as SqsClient;
use sqlx::PgPool;

use crate::backoff::Backoff;
use crate::blob::S3BlobStore;
use crate::config::Config;
use crate::consumer::{ProcessPolicy, Worker};
use crate::db::{PgCheckpointStore, PgStateWriter};
use crate::dead_letter::DeadLetterHandler;
use crate::queue::{SqsQueue, WorkQueue};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool
    pub pool: PgPool,
    /// AWS SQS client
    pub sqs: SqsClient,
    /// AWS S3 client (bulk snapshot objects)
    pub s3: S3Client,
    pub config: Config,
}

impl AppState {
    /// Create a new AppState: connect, migrate, build AWS clients.
    pub async fn new(config: Config) -> Result<Self, BoxError> {
        let pool = PgPool::connect(&config.database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        // Endpoint override for local development (LocalStack); S3 needs
        // path-style addressing there.
        let (sqs, s3) = if let Some(endpoint) = &config.aws_endpoint_url {
            let sqs_config = aws_sdk_sqs::config::Builder::from(&aws_config)
                .endpoint_url(endpoint)
                .build();
            let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
                .endpoint_url(endpoint)
                .force_path_style(true)
                .build();
            (
                SqsClient::from_conf(sqs_config),
                S3Client::from_conf(s3_config),
            )
        } else {
            (SqsClient::new(&aws_config), S3Client::new(&aws_config))
        };

        Ok(Self {
            pool,
            sqs,
            s3,
            config,
        })
    }

    /// Wire a consumer worker over the production stores.
    pub fn worker(&self) -> Worker {
        let queue: Arc<dyn WorkQueue> = Arc::new(SqsQueue::new(
            self.sqs.clone(),
            self.config.queue_url.clone(),
            self.config.max_messages,
            self.config.wait_time_seconds,
            self.config.visibility_timeout,
        ));
        let dlq: Option<Arc<dyn WorkQueue>> = self.config.dlq_url.clone().map(|url| {
            Arc::new(SqsQueue::new(self.sqs.clone(), url, 1, 0, 0)) as Arc<dyn WorkQueue>
        });

        Worker::new(
            queue,
            Arc::new(S3BlobStore::new(self.s3.clone())),
            Arc::new(PgCheckpointStore::new(self.pool.clone())),
            Arc::new(PgStateWriter::new(self.pool.clone())),
            Arc::new(DeadLetterHandler::new(self.pool.clone(), dlq)),
            ProcessPolicy {
                retry_budget: self.config.retry_budget,
                requeue_on_storage_error: self.config.requeue_on_storage_error,
            },
            Backoff::new(
                self.config.backoff_max_attempts,
                std::time::Duration::from_millis(self.config.backoff_base_ms),
                std::time::Duration::from_millis(self.config.backoff_cap_ms),
            ),
        )
    }
}
