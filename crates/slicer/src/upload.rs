//! Object storage uploads.
//!
//! [`HttpUploader`] PUTs each file to `{endpoint}/{bucket}/{key}` (path-style
//! addressing). With static credentials configured the request is signed
//! with SigV4 for `s3.region`; without them it is sent unsigned, which only
//! works against buckets that accept anonymous writes.

use crate::signing::{encode_key, Signer, SigningError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pixel_slicer_config::S3Config;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, Request, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::io::ReaderStream;

/// HTTP timeout for a single upload.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for uploads
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload request for '{key}' failed: {source}")]
    Request {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upload of '{key}' rejected with status {status}")]
    Rejected { key: String, status: u16 },

    #[error("Object URL for '{key}' is invalid: {reason}")]
    InvalidUrl { key: String, reason: String },

    #[error("Failed to sign upload: {0}")]
    Signing(#[from] SigningError),
}

/// Destination for produced files.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Store the file at `local` under `key`.
    async fn put(&self, local: &Path, key: &str) -> Result<(), UploadError>;
}

/// Path-style S3 PUT client.
pub struct HttpUploader {
    client: Client,
    endpoint: String,
    bucket: String,
    signer: Option<Signer>,
}

impl HttpUploader {
    pub fn new(cfg: &S3Config) -> Self {
        let client = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build upload HTTP client: {e}");
                Client::new()
            });

        Self {
            client,
            endpoint: cfg.endpoint_url.trim_end_matches('/').to_string(),
            bucket: cfg.bucket.clone(),
            signer: cfg.has_credentials().then(|| {
                Signer::new(
                    cfg.access_key_id.clone(),
                    cfg.secret_access_key.clone(),
                    cfg.signing_region(),
                )
            }),
        }
    }

    /// Object URL for `key`, percent-encoded.
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            encode_key(key.trim_start_matches('/'))
        )
    }

    /// Build the PUT for `key`, signed when credentials are configured.
    pub fn build_request(
        &self,
        key: &str,
        body: Body,
        content_length: u64,
        now: DateTime<Utc>,
    ) -> Result<Request, UploadError> {
        let invalid = |reason: String| UploadError::InvalidUrl {
            key: key.to_string(),
            reason,
        };
        let url = Url::parse(&self.object_url(key)).map_err(|e| invalid(e.to_string()))?;

        let mut builder = self
            .client
            .put(url.clone())
            .header(CONTENT_LENGTH, content_length)
            .body(body);

        if let Some(signer) = &self.signer {
            let host = url
                .host_str()
                .ok_or_else(|| invalid("no host".to_string()))?;
            let host = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            let signed = signer.sign("PUT", &host, url.path(), now)?;
            builder = builder
                .header("x-amz-date", signed.amz_date)
                .header("x-amz-content-sha256", signed.content_sha256)
                .header(AUTHORIZATION, signed.authorization);
        }

        builder.build().map_err(|source| UploadError::Request {
            key: key.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn put(&self, local: &Path, key: &str) -> Result<(), UploadError> {
        let read_error = |source: std::io::Error| UploadError::Read {
            path: local.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(local).await.map_err(read_error)?;
        let len = file.metadata().await.map_err(read_error)?.len();

        let body = Body::wrap_stream(ReaderStream::new(file));
        let request = self.build_request(key, body, len, Utc::now())?;
        tracing::debug!(url = %request.url(), bytes = len, "Uploading");

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|source| UploadError::Request {
                key: key.to_string(),
                source,
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UploadError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s3(endpoint: &str) -> S3Config {
        S3Config {
            enabled: true,
            endpoint_url: endpoint.to_string(),
            ..S3Config::default()
        }
    }

    fn build(uploader: &HttpUploader, key: &str) -> Request {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        uploader
            .build_request(key, Body::from("bytes"), 5, now)
            .unwrap()
    }

    #[test]
    fn test_signed_request_carries_authorization() {
        let mut cfg = s3("http://localhost:9000");
        cfg.region = "eu-west-2".to_string();
        cfg.access_key_id = "AKIDEXAMPLE".to_string();
        cfg.secret_access_key = "secret".to_string();
        let uploader = HttpUploader::new(&cfg);

        let request = build(&uploader, "sub/photo-500.jpg");

        let headers = request.headers();
        let auth = headers[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/eu-west-2/s3/aws4_request, "
        ));
        assert_eq!(headers["x-amz-date"], "20240102T030405Z");
        assert_eq!(headers["x-amz-content-sha256"], "UNSIGNED-PAYLOAD");
        assert_eq!(headers[CONTENT_LENGTH], "5");
        assert_eq!(request.method(), &reqwest::Method::PUT);
    }

    #[test]
    fn test_request_without_credentials_is_unsigned() {
        let uploader = HttpUploader::new(&s3("http://localhost:9000"));
        let request = build(&uploader, "photo-500.jpg");

        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert!(request.headers().get("x-amz-date").is_none());
        assert_eq!(
            request.url().as_str(),
            "http://localhost:9000/pixelslicer/photo-500.jpg"
        );
    }

    #[test]
    fn test_request_url_is_encoded() {
        let uploader = HttpUploader::new(&s3("http://localhost:9000"));
        let request = build(&uploader, "sub/my photo.jpg");
        assert_eq!(request.url().path(), "/pixelslicer/sub/my%20photo.jpg");
    }

    #[test]
    fn test_object_url_is_path_style() {
        let uploader = HttpUploader::new(&s3("http://localhost:9000/"));
        assert_eq!(
            uploader.object_url("sub/photo-500.jpg"),
            "http://localhost:9000/pixelslicer/sub/photo-500.jpg"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let uploader = HttpUploader::new(&s3("http://127.0.0.1:9"));
        let result = uploader.put(&dir.path().join("missing.jpg"), "missing.jpg").await;
        assert!(matches!(result, Err(UploadError::Read { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"bytes").unwrap();

        // Port 9 (discard) is closed on test hosts.
        let uploader = HttpUploader::new(&s3("http://127.0.0.1:9"));
        let result = uploader.put(&file, "a.jpg").await;
        assert!(matches!(result, Err(UploadError::Request { .. })));
    }
}
