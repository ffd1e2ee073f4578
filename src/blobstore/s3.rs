use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Builder, Credentials};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_types::error::display::DisplayErrorContext;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::{Blobstore, StoreError};
use crate::config::StoreConfig;

/// Error codes S3-compatible stores use when a write would exceed capacity.
const QUOTA_CODES: &[&str] = &["QuotaExceeded", "XMinioStorageFull", "XMinioAdminBucketQuotaExceeded"];

/// Object-store backend over any S3-compatible service.
#[derive(Clone, Debug)]
pub struct S3Blobstore {
    client: Client,
}

impl S3Blobstore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client for the configured region. A custom endpoint (MinIO)
    /// switches to path-style addressing. Static credentials are used when
    /// both keys are given, otherwise the default provider chain applies.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let (Some(id), Some(secret)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(id, secret, None, None, "mapper-env"));
        }
        let shared = loader.load().await;

        let mut builder = Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

/// Maps an SDK failure onto the blobstore taxonomy.
fn classify<E>(key: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_owned);
    let status = err.raw_response().map(|raw| raw.status().as_u16());
    match (code.as_deref(), status) {
        (Some("NoSuchKey"), _) | (Some("NotFound"), _) | (_, Some(404)) => StoreError::NotFound(key.to_string()),
        (Some(code), _) if QUOTA_CODES.contains(&code) => {
            StoreError::QuotaExceeded(format!("{key}: {}", DisplayErrorContext(&err)))
        }
        _ => StoreError::Unavailable(format!("{key}: {}", DisplayErrorContext(&err))),
    }
}

#[tonic::async_trait]
impl Blobstore for S3Blobstore {
    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StoreError> {
        trace!(bucket = container, object = key, "get_object");
        let mut object = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        let mut content = BytesMut::new();
        while let Some(bytes) = object
            .body
            .try_next()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{key}: {e}")))?
        {
            content.extend_from_slice(&bytes);
        }
        debug!(object = key, len = content.len(), "downloaded");
        Ok(content.freeze())
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<String, StoreError> {
        trace!(bucket = container, object = key, len = data.len(), "put_object");
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(key, e))?;
        Ok(key.to_string())
    }

    fn name(&self) -> &'static str {
        "object-store"
    }
}
