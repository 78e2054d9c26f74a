//! S3 implementation of the blob transport contract.
//!
//! Object keys are `{prefix}/{blob name}`; blob names carry the tenant and
//! timestamp (see [`crate::naming`]), so listings rebuild descriptors
//! without a metadata side-channel. SDK failures are classified into the
//! engine's error kinds so the resilience layer can make retry decisions.

use crate::error::{AuthError, NetworkError, StorageError, SyncError, SyncResult};
use crate::naming::parse_backup_blob_name;
use crate::transport::BlobTransport;
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use clinisync_types::{BackupDescriptor, BackupKind};
use tracing::debug;

/// Static-credential S3 configuration.
#[derive(Clone, Debug)]
pub struct S3TransportConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Endpoint override for MinIO or other S3-compatible stores.
    pub endpoint_override: Option<String>,
    /// Key prefix scoping this tenant's blobs, without trailing slash.
    pub prefix: String,
}

/// S3-backed blob transport.
pub struct S3BlobTransport {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3BlobTransport {
    pub fn new(config: &S3TransportConfig) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "clinisync-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .region(aws_types::region::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .behavior_version_latest();

        if let Some(ref endpoint) = config.endpoint_override {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
        }
    }

    fn object_key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.prefix)
        }
    }

    fn descriptor_for(
        &self,
        key: &str,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> BackupDescriptor {
        let name = match self.prefix.is_empty() {
            true => key,
            false => key.strip_prefix(&format!("{}/", self.prefix)).unwrap_or(key),
        };
        // The blob name is authoritative for tenant and creation time; the
        // object's mtime is only a fallback for foreign keys.
        let (tenant_id, created_at) = match parse_backup_blob_name(name) {
            Some((tenant, ts)) => (tenant, ts),
            None => (String::new(), modified.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)),
        };
        BackupDescriptor {
            id: key.to_string(),
            name: name.to_string(),
            created_at,
            size,
            tenant_id,
            origin_id: None,
            kind: BackupKind::Manual,
        }
    }
}

#[async_trait]
impl BlobTransport for S3BlobTransport {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> SyncResult<String> {
        let key = self.object_key(name);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("upload {key}"), e))?;

        debug!("uploaded {size} bytes to s3://{}/{key}", self.bucket);
        Ok(key)
    }

    async fn download(&self, id: &str) -> SyncResult<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("download {id}"), e))?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| NetworkError::ServerError(format!("read body for {id}: {e}")))?;

        let bytes = body.into_bytes().to_vec();
        debug!("downloaded {} bytes from s3://{}/{id}", bytes.len(), self.bucket);
        Ok(bytes)
    }

    async fn list(&self) -> SyncResult<Vec<BackupDescriptor>> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if !self.prefix.is_empty() {
            request = request.prefix(format!("{}/", self.prefix));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| classify_sdk_error("list backups", e))?;

        let descriptors = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                let size = obj.size().unwrap_or(0).max(0) as u64;
                let modified = obj.last_modified().and_then(|dt| {
                    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
                });
                Some(self.descriptor_for(key, size, modified))
            })
            .collect();

        Ok(descriptors)
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("delete {id}"), e))?;
        debug!("deleted s3://{}/{id}", self.bucket);
        Ok(())
    }
}

/// Maps an SDK failure onto the engine's error taxonomy.
fn classify_sdk_error<E>(context: &str, err: SdkError<E>) -> SyncError
where
    E: std::error::Error + 'static,
{
    match err {
        SdkError::TimeoutError(_) => NetworkError::Timeout.into(),
        SdkError::DispatchFailure(failure) => {
            if failure.is_timeout() {
                NetworkError::Timeout.into()
            } else {
                NetworkError::NoConnectivity.into()
            }
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            match status {
                401 => AuthError::InvalidCredentials.into(),
                403 => AuthError::PermissionDenied.into(),
                404 => StorageError::NotFound(context.to_string()).into(),
                429 => NetworkError::RateLimited { retry_after: None }.into(),
                status if status >= 500 => {
                    NetworkError::ServerError(format!("{context}: HTTP {status}")).into()
                }
                _ => NetworkError::ServerError(format!("{context}: {}", ctx.err())).into(),
            }
        }
        other => NetworkError::ServerError(format!("{context}: {other}")).into(),
    }
}
