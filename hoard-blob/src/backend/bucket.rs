use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};
use bytes::Bytes;
use tracing::debug;

use super::{BackendCapabilities, BlobBackend, ObjectPut};
use crate::{BlobError, BlobResult};

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    pub endpoint_url: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Prepended to every object name
    pub prefix: String,
}

impl BucketConfig {
    pub fn new(endpoint_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            prefix: String::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_credentials(mut self, access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        self.access_key_id = access_key_id.into();
        self.secret_access_key = secret_access_key.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Object bucket backend: arbitrary object sizes, native byte-range reads
#[derive(Clone)]
pub struct BucketBackend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl BucketBackend {
    pub async fn connect(config: BucketConfig) -> BlobResult<Self> {
        if config.bucket.is_empty() {
            return Err(BlobError::invalid("bucket name is required"));
        }

        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "hoard",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .load()
            .await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build(),
        );

        Ok(Self::from_client(client, config.bucket, config.prefix))
    }

    pub fn from_client(client: Client, bucket: String, prefix: String) -> Self {
        Self { client, bucket, prefix }
    }

    fn object_key(&self, object_name: &str) -> String {
        format!("{}{}", self.prefix, object_name)
    }

    async fn fetch(&self, remote_id: &str, range: Option<String>) -> BlobResult<Bytes> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(remote_id);
        if let Some(range) = range {
            request = request.range(range);
        }

        let result = request
            .send()
            .await
            .map_err(|e| BlobError::read_failed(remote_id, e.to_string()))?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| BlobError::read_failed(remote_id, e.to_string()))?;
        Ok(body.into_bytes())
    }
}

#[async_trait]
impl BlobBackend for BucketBackend {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::basic().with_range()
    }

    async fn put(&self, object: &ObjectPut, data: Bytes) -> BlobResult<String> {
        let key = self.object_key(&object.object_name);
        let size = data.len();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_length(size as i64)
            .body(AwsByteStream::from(data))
            .metadata("filename", &object.file_name);

        if let Some(ct) = &object.content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| BlobError::upload_failed(format!("put {key}: {e}")))?;

        debug!("Stored {} bytes at s3://{}/{}", size, self.bucket, key);
        Ok(key)
    }

    async fn get(&self, remote_id: &str) -> BlobResult<Bytes> {
        self.fetch(remote_id, None).await
    }

    async fn get_range(&self, remote_id: &str, offset: u64, len: u64) -> BlobResult<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        let data = self.fetch(remote_id, Some(range)).await?;
        if data.len() as u64 != len {
            return Err(BlobError::read_failed(
                remote_id,
                format!("expected {len} bytes from ranged read, got {}", data.len()),
            ));
        }
        Ok(data)
    }

    async fn delete(&self, remote_id: &str) -> BlobResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(remote_id)
            .send()
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }
}
