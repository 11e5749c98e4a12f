// S3 snapshot store
// Works against real S3 or S3-compatible services (LocalStack, MinIO)

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use super::{SnapshotStore, StoreError};

/// S3 store configuration.
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    /// Gzip objects at rest; the snapshot document itself stays plain JSON
    pub compression: bool,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            bucket: "vpchron-snapshots".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            compression: false,
        }
    }
}

/// Snapshot store backed by an S3 bucket.
pub struct S3SnapshotStore {
    client: Client,
    config: S3StoreConfig,
}

impl S3SnapshotStore {
    /// Build a store, resolving client configuration from the environment.
    pub async fn new(config: S3StoreConfig) -> Result<Self, StoreError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        if !self.config.compression {
            return Ok(data.to_vec());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| StoreError::Io(format!("compress: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| StoreError::Io(format!("compress: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        if !self.config.compression {
            return Ok(data.to_vec());
        }
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| StoreError::Io(format!("decompress: {}", e)))?;
        Ok(out)
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let body = self.compress(&bytes)?;
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StoreError::Io(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::Io(format!("get {}: {}", key, service_error))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Io(format!("get {}: {}", key, e)))?
            .into_bytes();
        self.decompress(&bytes)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StoreError::Io(format!("list {}: {}", prefix, e)))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
