//! Blob store abstraction and the S3 adapter.
//!
//! The engine's only persistence primitive: a flat key→bytes namespace with
//! prefix listing, streaming reads, ETag metadata, and fixed-length stream
//! puts. The S3 adapter speaks to AWS S3 or any compatible store
//! (MinIO/LocalStack via `endpoint_url` + `force_path_style`), classifying
//! every fault as transient or durable so callers can apply retry policy.

use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncReadExt, BufReader};
use tracing::{debug, info};

/// Storage faults, classified for retry policy.
///
/// Timeouts, connection failures, and 5xx responses are transient; auth,
/// precondition, and shape problems are durable.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transient storage fault: {0}")]
    Transient(String),

    #[error("storage fault: {0}")]
    Durable(String),

    #[error("declared content length {declared} does not match body length {actual}")]
    LengthMismatch { declared: u64, actual: u64 },
}

impl StorageError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Text content plus the ETag observed at read time.
#[derive(Debug, Clone)]
pub struct TextAndEtag {
    pub text: String,
    pub etag: String,
}

/// A streaming read plus the ETag observed at read time.
pub struct BlobStream {
    pub reader: Box<dyn AsyncBufRead + Send + Unpin>,
    pub etag: String,
}

/// Body of a `put`.
///
/// Stream bodies carry a declared byte count; the adapter must reject the
/// write when the produced bytes differ from it.
pub enum PutBody {
    Bytes(Bytes),
    Text(String),
    Stream {
        reader: Box<dyn AsyncBufRead + Send + Unpin>,
        content_length: u64,
    },
}

/// Result of a successful `put`.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: String,
}

/// Flat key→bytes store.
///
/// Missing keys read as `Ok(None)`. `list` returns the complete set of keys
/// under the prefix; callers treat the result as exhaustive.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn get_text(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn get_text_with_etag(&self, key: &str) -> Result<Option<TextAndEtag>, StorageError>;

    async fn get_stream(&self, key: &str) -> Result<Option<BlobStream>, StorageError>;

    async fn put(&self, key: &str, body: PutBody) -> Result<PutResult, StorageError>;
}

/// Drain a stream body, enforcing the declared length.
///
/// Reads at most `declared + 1` bytes so an over-long producer fails without
/// being drained to the end.
async fn collect_fixed_length(
    mut reader: Box<dyn AsyncBufRead + Send + Unpin>,
    declared: u64,
) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::with_capacity(declared as usize);
    let mut limited = (&mut reader).take(declared + 1);
    limited
        .read_to_end(&mut buf)
        .await
        .map_err(|e| StorageError::Transient(format!("stream body read failed: {e}")))?;
    if buf.len() as u64 != declared {
        return Err(StorageError::LengthMismatch {
            declared,
            actual: buf.len() as u64,
        });
    }
    Ok(buf)
}

impl PutBody {
    /// Materialize the body, enforcing the fixed-length contract for streams.
    pub(crate) async fn into_bytes(self) -> Result<Bytes, StorageError> {
        match self {
            PutBody::Bytes(bytes) => Ok(bytes),
            PutBody::Text(text) => Ok(Bytes::from(text)),
            PutBody::Stream {
                reader,
                content_length,
            } => Ok(Bytes::from(collect_fixed_length(reader, content_length).await?)),
        }
    }
}

/// S3-backed blob store.
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a store from the service configuration.
    pub async fn new(config: &S3Config) -> Result<Self, StorageError> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    async fn get_object(
        &self,
        key: &str,
    ) -> Result<Option<aws_sdk_s3::operation::get_object::GetObjectOutput>, StorageError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(e) => {
                if e.as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(classify(&e, "get", key))
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        // The caller treats the listing as complete, so follow continuation
        // tokens until the store stops returning them.
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(ref token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| classify(&e, "list", prefix))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(prefix = %prefix, count = keys.len(), "Listed blobs");
        Ok(keys)
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_text_with_etag(key).await?.map(|r| r.text))
    }

    async fn get_text_with_etag(&self, key: &str) -> Result<Option<TextAndEtag>, StorageError> {
        let Some(output) = self.get_object(key).await? else {
            return Ok(None);
        };
        let etag = output.e_tag().unwrap_or_default().to_string();
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("get {key}: body read failed: {e}")))?
            .into_bytes();
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| StorageError::Durable(format!("get {key}: body is not UTF-8: {e}")))?;
        Ok(Some(TextAndEtag { text, etag }))
    }

    async fn get_stream(&self, key: &str) -> Result<Option<BlobStream>, StorageError> {
        let Some(output) = self.get_object(key).await? else {
            return Ok(None);
        };
        let etag = output.e_tag().unwrap_or_default().to_string();
        Ok(Some(BlobStream {
            reader: Box::new(BufReader::new(output.body.into_async_read())),
            etag,
        }))
    }

    async fn put(&self, key: &str, body: PutBody) -> Result<PutResult, StorageError> {
        let bytes = body.into_bytes().await?;
        let content_length = bytes.len() as i64;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(content_length)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| classify(&e, "put", key))?;

        debug!(key = %key, size_bytes = content_length, "Blob written");
        Ok(PutResult {
            etag: output.e_tag().unwrap_or_default().to_string(),
        })
    }
}

/// Map an SDK error to the transient/durable split.
///
/// Dispatch failures, timeouts, and malformed responses are connection-level
/// and worth retrying; service errors are retryable only for 5xx and 429.
fn classify<E>(err: &SdkError<E>, op: &str, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient(format!("{op} {key}: {err}"))
        }
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            if status >= 500 || status == 429 {
                StorageError::Transient(format!("{op} {key}: http {status}"))
            } else {
                StorageError::Durable(format!("{op} {key}: http {status}: {err}"))
            }
        }
        _ => StorageError::Durable(format!("{op} {key}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_retryable_classification() {
        assert!(StorageError::Transient("timeout".into()).is_retryable());
        assert!(!StorageError::Durable("403".into()).is_retryable());
        assert!(!StorageError::LengthMismatch {
            declared: 81,
            actual: 80
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_fixed_length_stream_accepts_exact() {
        let body = PutBody::Stream {
            reader: Box::new(Cursor::new(b"abcde".to_vec())),
            content_length: 5,
        };
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn test_fixed_length_stream_rejects_mismatch() {
        let short = PutBody::Stream {
            reader: Box::new(Cursor::new(b"abc".to_vec())),
            content_length: 5,
        };
        match short.into_bytes().await {
            Err(StorageError::LengthMismatch { declared, actual }) => {
                assert_eq!((declared, actual), (5, 3));
            }
            other => panic!("expected length mismatch, got {other:?}"),
        }

        let long = PutBody::Stream {
            reader: Box::new(Cursor::new(b"abcdef".to_vec())),
            content_length: 5,
        };
        assert!(matches!(
            long.into_bytes().await,
            Err(StorageError::LengthMismatch { .. })
        ));
    }
}
