//! S3-compatible backend (AWS S3, MinIO, ...) on top of `aws-sdk-s3`.
//!
//! The client is built once from explicit connection settings and owned by
//! the backend; the SDK client is internally pooled and safe to share.

use crate::{
    config::StoreConfig,
    models::listing::{ListPage, ListPageRequest, MAX_KEYS_PER_PAGE, ObjectBody},
    services::store::{ObjectStoreBackend, StoreError, StoreResult},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier},
};
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Regions where S3 rejects an explicit `LocationConstraint`.
const DEFAULT_REGION: &str = "us-east-1";

/// Upper bound of keys accepted by one DeleteObjects request.
const MAX_DELETE_BATCH: usize = 1000;

#[derive(Clone, Debug)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client with explicit credentials and an optional endpoint
    /// override. Path-style addressing is forced whenever an endpoint is set,
    /// which MinIO-style servers require.
    pub async fn connect(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "libression",
        );

        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::new(Client::from_conf(builder.build()))
    }
}

fn backend_error<E>(err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Backend(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStoreBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(backend_error)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> StoreResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if !region.is_empty() && region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_bucket_already_owned_by_you()
                    || service_err.is_bucket_already_exists()
                {
                    Err(StoreError::BucketAlreadyExists(bucket.to_string()))
                } else {
                    Err(backend_error(service_err))
                }
            }
        }
    }

    async fn list_page(&self, bucket: &str, request: &ListPageRequest) -> StoreResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(request.max_keys.clamp(1, MAX_KEYS_PER_PAGE) as i32)
            .set_prefix(request.prefix.clone().filter(|p| !p.is_empty()))
            .set_continuation_token(request.continuation_token.clone())
            .set_start_after(request.start_after.clone())
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_bucket() {
                    StoreError::BucketNotFound(bucket.to_string())
                } else {
                    backend_error(service_err)
                }
            })?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_string))
            .collect();

        Ok(ListPage {
            keys,
            is_truncated: output.is_truncated().unwrap_or(false),
            next_continuation_token: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    StoreError::object_not_found(bucket, key)
                } else {
                    backend_error(service_err)
                }
            })?;

        let content_length = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok());
        let content_type = output.content_type().map(str::to_string);
        let stream = ReaderStream::new(output.body.into_async_read()).boxed();

        Ok(ObjectBody {
            content_type,
            content_length,
            stream,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend_error)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(backend_error)?;

            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(backend_error)?;
            debug!("deleted {} keys from {}", chunk.len(), bucket);
        }
        Ok(())
    }
}
