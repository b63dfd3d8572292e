use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::HttpSource;

pub const CONTENT_TYPE_CSV: &str = "text/csv; charset=utf-8";
pub const CACHE_CONTROL_NO_CACHE: &str = "no-cache";
const VERIFY_SNIPPET_BYTES: usize = 120;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// Write + metadata seam over the object store. Object ACLs are never touched.
pub trait ObjectStore {
    fn put_object(&self, request: PutObject) -> Result<()>;
    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;
}

/// S3 client driven on a private current-thread runtime so the pipeline stays synchronous.
pub struct S3ObjectStore {
    runtime: tokio::runtime::Runtime,
    client: S3Client,
}

impl S3ObjectStore {
    pub fn connect(region: &str, endpoint_url: Option<&str>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build S3 runtime")?;
        let sdk_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .load(),
        );
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = S3Client::from_conf(builder.build());
        Ok(Self { runtime, client })
    }
}

impl ObjectStore for S3ObjectStore {
    fn put_object(&self, request: PutObject) -> Result<()> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&request.bucket)
                    .key(&request.key)
                    .body(ByteStream::from(request.body))
                    .content_type(&request.content_type)
                    .cache_control(&request.cache_control)
                    .send(),
            )
            .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(err)))?;
        Ok(())
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let head = self
            .runtime
            .block_on(self.client.head_object().bucket(bucket).key(key).send())
            .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(err)))?;
        Ok(ObjectMetadata {
            size: head
                .content_length()
                .and_then(|len| u64::try_from(len).ok()),
            content_type: head.content_type().map(str::to_string),
            etag: head.e_tag().map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub bucket: String,
    pub region: String,
    pub key: String,
    pub endpoint_url: Option<String>,
}

impl PublishTarget {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            key: config.key.clone(),
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    /// Virtual-hosted S3 URL, or path-style under a custom endpoint.
    pub fn public_url(&self) -> PipelineResult<String> {
        let (base, bucket_segment) = match self.endpoint_url.as_deref() {
            Some(endpoint) => (endpoint.to_string(), Some(self.bucket.as_str())),
            None => (
                format!("https://{}.s3.{}.amazonaws.com/", self.bucket, self.region),
                None,
            ),
        };
        let mut url = Url::parse(&base).map_err(|err| {
            PipelineError::PublishFailed(format!("invalid object store base {base:?}: {err}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                PipelineError::PublishFailed(format!("object store base {base:?} cannot hold a path"))
            })?;
            segments.pop_if_empty();
            if let Some(bucket) = bucket_segment {
                segments.push(bucket);
            }
            segments.extend(self.key.split('/'));
        }
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub url: String,
    pub bytes: u64,
    pub sha256_short: String,
    pub head: ObjectMetadata,
}

fn sha256_short(bytes: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    digest[..12].to_string()
}

/// Uploads the artifact to the fixed key, then confirms it with a metadata-only HEAD.
pub fn publish<O: ObjectStore + ?Sized>(
    store: &O,
    target: &PublishTarget,
    artifact: &Path,
) -> PipelineResult<Publication> {
    let body = std::fs::read(artifact).map_err(|err| {
        PipelineError::PublishFailed(format!("local artifact {}: {err}", artifact.display()))
    })?;
    let bytes = body.len() as u64;
    let sha = sha256_short(&body);
    let url = target.public_url()?;

    tracing::debug!(
        aws_region = ?std::env::var("AWS_REGION").ok(),
        aws_default_region = ?std::env::var("AWS_DEFAULT_REGION").ok(),
        configured_region = %target.region,
        "object store region"
    );
    tracing::info!(
        path = %artifact.display(),
        bytes,
        sha256 = %sha,
        bucket = %target.bucket,
        key = %target.key,
        "uploading artifact"
    );

    store
        .put_object(PutObject {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            body,
            content_type: CONTENT_TYPE_CSV.to_string(),
            cache_control: CACHE_CONTROL_NO_CACHE.to_string(),
        })
        .map_err(|err| {
            PipelineError::PublishFailed(format!(
                "upload to s3://{}/{}: {err:#}",
                target.bucket, target.key
            ))
        })?;

    let head = store
        .head_object(&target.bucket, &target.key)
        .map_err(|err| {
            PipelineError::PublishFailed(format!(
                "object missing after upload s3://{}/{}: {err:#}",
                target.bucket, target.key
            ))
        })?;
    tracing::info!(
        content_type = ?head.content_type,
        size = ?head.size,
        etag = ?head.etag,
        "object head"
    );
    if let Some(size) = head.size {
        if size != bytes {
            return Err(PipelineError::PublishFailed(format!(
                "object size {size} does not match uploaded {bytes} bytes"
            )));
        }
    }

    Ok(Publication {
        url,
        bytes,
        sha256_short: sha,
        head,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub url: String,
    pub status: u16,
    pub bytes: u64,
    pub expected_bytes: u64,
    pub snippet: String,
}

impl VerificationResult {
    pub fn bytes_match(&self) -> bool {
        self.bytes == self.expected_bytes
    }
}

/// Full public GET of the published object. Callers treat every failure as a warning.
pub fn verify<S: HttpSource + ?Sized>(
    source: &S,
    url: &str,
    expected_bytes: u64,
    timeout: Duration,
) -> PipelineResult<VerificationResult> {
    let response = source
        .get(url, &[], timeout)
        .map_err(|err| PipelineError::VerifyFailed(format!("{err:#}")))?;
    if !response.is_success() {
        return Err(PipelineError::VerifyFailed(format!(
            "GET {url} returned HTTP {}",
            response.status
        )));
    }
    let snippet_len = response.body.len().min(VERIFY_SNIPPET_BYTES);
    let result = VerificationResult {
        url: url.to_string(),
        status: response.status,
        bytes: response.body.len() as u64,
        expected_bytes,
        snippet: String::from_utf8_lossy(&response.body[..snippet_len]).into_owned(),
    };
    tracing::info!(status = result.status, bytes = result.bytes, "verify GET");
    tracing::info!(snippet = %result.snippet, "verify body head");
    if !result.bytes_match() {
        tracing::warn!(
            bytes = result.bytes,
            expected_bytes,
            "published object size differs from local artifact"
        );
    }
    Ok(result)
}
