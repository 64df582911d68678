use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use std::time::Duration;

use super::{ArtifactSigner, StoreError, StoreResult};

const ARTIFACT_STORE: &str = "artifacts";

/// Presigns firmware downloads out of an S3 bucket.
pub struct S3Signer {
    client: Client,
}

impl S3Signer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactSigner for S3Signer {
    async fn presign_download(
        &self,
        location: &str,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|err| StoreError::unavailable(ARTIFACT_STORE, err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(location)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| {
                StoreError::unavailable(ARTIFACT_STORE, DisplayErrorContext(&err).to_string())
            })?;
        Ok(request.uri().to_string())
    }
}
