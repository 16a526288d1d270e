//! Bulk object storage seam
//!
//! Pointer messages reference item lists too large for a queue body; the
//! consumer fetches them here. Trait-shaped for the same reason as
//! `WorkQueue`: tests run on an in-memory double.

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use shared::PipelineError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError>;
}

/// S3-backed blob store
#[derive(Clone)]
pub struct S3BlobStore {
    client: S3Client,
}

impl S3BlobStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError> {
        let obj = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("s3 get s3://{bucket}/{key}: {e}")))?;

        let bytes = obj
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::Transport(format!("s3 read s3://{bucket}/{key}: {e}")))?;
        Ok(bytes.to_vec())
    }
}
