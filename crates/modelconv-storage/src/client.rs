//! S3 client implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use modelconv_models::ObjectLocator;

use crate::error::{StorageError, StorageResult};
use crate::store::{partial_path, ObjectStore};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (MinIO, R2, LocalStack); AWS default when unset
    pub endpoint_url: Option<String>,
    /// Region; taken from the default provider chain when unset
    pub region: Option<String>,
    /// Explicit access key ID; default credential chain when unset
    pub access_key_id: Option<String>,
    /// Explicit secret access key
    pub secret_access_key: Option<String>,
    /// Use path-style addressing (required by most S3-compatible stores)
    pub force_path_style: bool,
    /// Upper bound for a single download or upload
    pub timeout: Duration,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            timeout: Duration::from_secs(300),
        }
    }
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let access_key_id = non_empty_env("S3_ACCESS_KEY_ID");
        let secret_access_key = non_empty_env("S3_SECRET_ACCESS_KEY");
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::config_error(
                "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together",
            ));
        }

        let timeout_secs = match non_empty_env("STORAGE_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                StorageError::config_error(format!("STORAGE_TIMEOUT_SECS is not a number: {}", raw))
            })?,
            None => 300,
        };

        Ok(Self {
            endpoint_url: non_empty_env("S3_ENDPOINT_URL"),
            region: non_empty_env("S3_REGION"),
            access_key_id,
            secret_access_key,
            force_path_style: non_empty_env("S3_FORCE_PATH_STYLE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// S3 object store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    timeout: Duration,
}

impl S3Store {
    /// Create a new S3 store from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(id, secret, None, None, "modelconv"));
        }
        let sdk_config = loader.load().await;

        let mut builder = Builder::from(&sdk_config).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            timeout: config.timeout,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Self::new(config).await
    }

    /// Stream an object body into `path`. Returns bytes written.
    async fn fetch(&self, source: &ObjectLocator, path: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&source.bucket)
            .key(&source.key)
            .send()
            .await
            .map_err(classify)?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::transient(format!("body stream interrupted: {}", e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn put(&self, source: &Path, destination: &ObjectLocator, content_type: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn download(&self, source: &ObjectLocator, destination: &Path) -> StorageResult<()> {
        debug!("Downloading {} to {}", source, destination.display());

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(destination);

        let outcome = match tokio::time::timeout(self.timeout, self.fetch(source, &partial)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(bytes) => {
                tokio::fs::rename(&partial, destination).await?;
                info!("Downloaded {} ({} bytes) to {}", source, bytes, destination.display());
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", partial.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn upload(
        &self,
        source: &Path,
        destination: &ObjectLocator,
        content_type: &str,
    ) -> StorageResult<()> {
        let metadata = tokio::fs::metadata(source).await?;
        if metadata.len() == 0 {
            return Err(StorageError::EmptyUpload(source.to_path_buf()));
        }

        debug!("Uploading {} to {}", source.display(), destination);
        match tokio::time::timeout(self.timeout, self.put(source, destination, content_type)).await {
            Ok(result) => result?,
            Err(_) => return Err(StorageError::Timeout(self.timeout)),
        }

        info!("Uploaded {} ({} bytes) to {}", source.display(), metadata.len(), destination);
        Ok(())
    }
}

/// Map an SDK failure onto the storage error taxonomy.
fn classify<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(ctx) => {
            StorageError::from_service(ctx.err().code(), Some(ctx.raw().status().as_u16()), detail)
        }
        SdkError::ConstructionFailure(_) => StorageError::config_error(detail),
        _ => StorageError::transient(detail),
    }
}
