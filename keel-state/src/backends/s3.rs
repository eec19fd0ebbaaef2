//! S3 backend
//!
//! One object per key below an optional prefix. Conditional writes use S3
//! conditional requests: `If-None-Match: *` for creation and
//! `If-Match: <etag>` for replacement and deletion. The object ETag is the
//! revision.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketVersioningStatus, PublicAccessBlockConfiguration, ServerSideEncryption,
    VersioningConfiguration,
};
use log::info;

use crate::backend::{BackendConfig, BackendError, BackendResult, KvBackend, Revision, Versioned};

/// S3-based backend
pub struct S3Backend {
    /// S3 client
    client: Client,
    /// Bucket name
    bucket: String,
    /// Prefix prepended to every key (e.g. "infra/prod/")
    prefix: String,
    /// AWS region
    region: String,
    /// Whether to encrypt stored objects (default: true)
    encrypt: bool,
    /// Whether to auto-create the bucket if it doesn't exist (default: true)
    auto_create: bool,
}

impl S3Backend {
    /// Create a new S3Backend from configuration
    pub async fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let bucket = config
            .get_string("bucket")
            .ok_or_else(|| BackendError::configuration("Missing required attribute: bucket"))?
            .to_string();

        let region = config
            .get_string("region")
            .ok_or_else(|| BackendError::configuration("Missing required attribute: region"))?;
        let region = validate_region(region)?;
        let prefix = normalize_prefix(config.get_string("prefix").unwrap_or_default());

        let encrypt = config.get_bool_or("encrypt", true);
        let auto_create = config.get_bool_or("auto_create", true);

        // Load AWS config with the specified region
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.clone()))
            .load()
            .await;

        let client = Client::new(&aws_config);

        Ok(Self {
            client,
            bucket,
            prefix,
            region,
            encrypt,
            auto_create,
        })
    }

    /// Get the bucket name
    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Get whether auto_create is enabled
    pub fn auto_create_enabled(&self) -> bool {
        self.auto_create
    }

    fn object_key(&self, key: &str) -> BackendResult<String> {
        if key.is_empty() {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(format!("{}{}", self.prefix, key))
    }

    /// Make sure the bucket exists, creating it when allowed
    pub async fn init(&self) -> BackendResult<()> {
        if self.bucket_exists().await? {
            return Ok(());
        }
        if self.auto_create {
            self.create_bucket().await
        } else {
            Err(BackendError::BucketNotFound(self.bucket.clone()))
        }
    }

    /// Check if the bucket exists
    pub async fn bucket_exists(&self) -> BackendResult<bool> {
        let result = self.client.head_bucket().bucket(&self.bucket).send().await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err.as_service_error().is_some_and(|e| e.is_not_found());
                if is_missing_bucket(not_found, status_of(&err)) {
                    Ok(false)
                } else {
                    Err(BackendError::Aws(format!(
                        "Failed to check bucket {}: {}",
                        self.bucket, err
                    )))
                }
            }
        }
    }

    /// Create the bucket with versioning enabled and public access blocked
    pub async fn create_bucket(&self) -> BackendResult<()> {
        info!("Creating state bucket {} in {}", self.bucket, self.region);

        // Create bucket with location constraint if not us-east-1
        let mut create_request = self.client.create_bucket().bucket(&self.bucket);

        if self.region != "us-east-1" {
            use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            create_request = create_request.create_bucket_configuration(config);
        }

        create_request
            .send()
            .await
            .map_err(|e| BackendError::BucketCreationFailed(e.to_string()))?;

        // Enable versioning
        let versioning_config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();

        self.client
            .put_bucket_versioning()
            .bucket(&self.bucket)
            .versioning_configuration(versioning_config)
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to enable versioning: {}", e)))?;

        // Block public access
        let public_access_block = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .block_public_policy(true)
            .ignore_public_acls(true)
            .restrict_public_buckets(true)
            .build();

        self.client
            .put_public_access_block()
            .bucket(&self.bucket)
            .public_access_block_configuration(public_access_block)
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to block public access: {}", e)))?;

        Ok(())
    }

    /// Conditional put; exactly one of `if_none_match` / `if_match` is set
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        if_match: Option<&Revision>,
    ) -> BackendResult<Revision> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key)?)
            .body(ByteStream::from(value))
            .content_type("application/json");

        request = match if_match {
            Some(revision) => request.if_match(revision.as_str()),
            None => request.if_none_match("*"),
        };

        if self.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        let output = request.send().await.map_err(|err| {
            if is_condition_failed(&err) {
                BackendError::condition_failed(key)
            } else {
                BackendError::Aws(err.to_string())
            }
        })?;

        output
            .e_tag()
            .map(Revision::new)
            .ok_or_else(|| BackendError::Aws(format!("No ETag returned for {}", key)))
    }
}

#[async_trait]
impl KvBackend for S3Backend {
    async fn get(&self, key: &str) -> BackendResult<Option<Versioned>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key)?)
            .send()
            .await;

        match result {
            Ok(output) => {
                let revision = output
                    .e_tag()
                    .map(Revision::new)
                    .ok_or_else(|| BackendError::Aws(format!("No ETag returned for {}", key)))?;
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BackendError::Io(e.to_string()))?;
                Ok(Some(Versioned {
                    value: body.into_bytes().to_vec(),
                    revision,
                }))
            }
            Err(err) => {
                if status_of(&err) == Some(404) {
                    Ok(None)
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> BackendResult<Revision> {
        self.put(key, value, None).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Revision,
        value: Vec<u8>,
    ) -> BackendResult<Revision> {
        self.put(key, value, Some(expected)).await
    }

    async fn delete_if(&self, key: &str, expected: &Revision) -> BackendResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key)?)
            .if_match(expected.as_str())
            .send()
            .await
            .map_err(|err| {
                if is_condition_failed(&err) || status_of(&err) == Some(404) {
                    BackendError::condition_failed(key)
                } else {
                    BackendError::Aws(err.to_string())
                }
            })?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let full_prefix = format!("{}{}", self.prefix, prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| BackendError::Aws(e.to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| key.strip_prefix(&self.prefix))
                    .map(str::to_string),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Accept plain region names such as "ap-northeast-1"
fn validate_region(value: &str) -> BackendResult<String> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(value.to_string())
    } else {
        Err(BackendError::configuration(format!(
            "Invalid region '{}': expected a name like us-east-1",
            value
        )))
    }
}

/// HeadBucket reports a missing bucket as NotFound or 404
fn is_missing_bucket(not_found: bool, status: Option<u16>) -> bool {
    not_found || status == Some(404)
}

/// Ensure a non-empty prefix ends with a single '/'
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|raw| raw.status().as_u16())
}

/// 412 Precondition Failed, or 409 when a concurrent conditional write won
fn is_condition_failed<E>(err: &SdkError<E>) -> bool {
    matches!(status_of(err), Some(412) | Some(409))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_region() {
        assert_eq!(validate_region("ap-northeast-1").unwrap(), "ap-northeast-1");
        assert_eq!(validate_region("us-east-1").unwrap(), "us-east-1");
        assert!(matches!(
            validate_region("aws.Region.ap_northeast_1"),
            Err(BackendError::Configuration(_))
        ));
        assert!(validate_region("").is_err());
    }

    #[test]
    fn test_only_not_found_means_missing_bucket() {
        assert!(is_missing_bucket(true, None));
        assert!(is_missing_bucket(false, Some(404)));
        assert!(!is_missing_bucket(false, Some(403)));
        assert!(!is_missing_bucket(false, Some(500)));
        assert!(!is_missing_bucket(false, None));
    }

    #[tokio::test]
    async fn test_from_config_rejects_dsl_region() {
        let config = BackendConfig::new("s3")
            .with_attribute("bucket", "state")
            .with_attribute("region", "aws.Region.us_west_2");
        let result = S3Backend::from_config(&config).await;
        assert!(matches!(result, Err(BackendError::Configuration(_))));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("infra/prod"), "infra/prod/");
        assert_eq!(normalize_prefix("/infra/prod/"), "infra/prod/");
    }

    #[tokio::test]
    async fn test_from_config_requires_bucket() {
        let config = BackendConfig::new("s3").with_attribute("region", "eu-west-1");
        let result = S3Backend::from_config(&config).await;
        assert!(matches!(result, Err(BackendError::Configuration(_))));
    }
}
