use crate::config::S3Config;
use crate::store::{ArtifactStore, StoreError, StoredArtifact};
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

/// Object storage target for uploaded images
pub struct S3Store {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3Store {
    /// Create a new S3 store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            public_read = config.public_read,
            "S3 store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Object key for a storage name
    pub fn object_key(&self, name: &str) -> String {
        object_key(&self.config.key_prefix, name)
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Single-part upload for small files
    async fn simple_upload(&self, key: &str, content_type: &str, data: Bytes) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| object_store_error("Failed to upload object", e))?;

        Ok(())
    }

    /// Multipart upload for large files; aborted on any part failure
    async fn multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        data: &Bytes,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| object_store_error("Failed to create multipart upload", e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::ObjectStore("No upload ID in response".to_string()))?
            .to_string();

        match self.upload_parts(key, &upload_id, data).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| object_store_error("Failed to complete multipart upload", e))?;

                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %key,
                        error = %DisplayErrorContext(&abort),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        data: &Bytes,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let part_size = self.config.part_size_bytes.max(1);
        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        for offset in (0..data.len()).step_by(part_size) {
            let end = (offset + part_size).min(data.len());
            let body = ByteStream::from(data.slice(offset..end));

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|e| object_store_error("Failed to upload part", e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        Ok(completed_parts)
    }

    /// Grant public read. Failure leaves the object private and is only logged.
    async fn make_public(&self, key: &str) {
        if let Err(e) = self
            .client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
        {
            warn!(
                key = %key,
                error = %DisplayErrorContext(&e),
                "Failed to set public access"
            );
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    #[instrument(skip(self, data), fields(bucket = %self.bucket, bytes = data.len()))]
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredArtifact, StoreError> {
        let key = self.object_key(name);
        let size = data.len() as u64;

        debug!(key = %key, content_type = %content_type, "Uploading object");

        if data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(&key, content_type, &data).await?;
        } else {
            self.simple_upload(&key, content_type, data).await?;
        }

        if self.config.public_read {
            self.make_public(&key).await;
        }

        info!(key = %key, size_bytes = size, "Object uploaded");

        Ok(StoredArtifact {
            name: key,
            size,
            content_type: content_type.to_string(),
            bucket: Some(self.bucket.clone()),
        })
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.config.key_prefix)
    }
}

fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn object_store_error<E>(context: &str, e: E) -> StoreError
where
    E: std::error::Error + 'static,
{
    StoreError::ObjectStore(format!("{}: {}", context, DisplayErrorContext(&e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "20240115_103045_image.jpg"), "20240115_103045_image.jpg");
        assert_eq!(object_key("cams", "a.jpg"), "cams/a.jpg");
        assert_eq!(object_key("/cams/north/", "a.jpg"), "cams/north/a.jpg");
    }

    #[tokio::test]
    async fn test_store_reports_bucket() {
        let config = S3Config {
            bucket: "camlink-images".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://127.0.0.1:9000".to_string()),
            force_path_style: true,
            key_prefix: "uploads".to_string(),
            public_read: false,
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
        };

        let store = S3Store::new(&config).await.unwrap();
        assert_eq!(store.bucket(), "camlink-images");
        assert_eq!(store.object_key("a.jpg"), "uploads/a.jpg");
        assert_eq!(store.describe(), "s3://camlink-images/uploads");
    }
}
