//! `s3` storage factory
//!
//! Turns mount parameters into an [`S3Driver`]. Recognized parameters:
//!
//! | name          | meaning                                   | default       |
//! |---------------|-------------------------------------------|---------------|
//! | endpoint      | service URL, also mounted as a root       | AWS           |
//! | access_key    | static access key (needs secret_key)      | SDK chain     |
//! | secret_key    | static secret key (needs access_key)      | SDK chain     |
//! | region        | signing region                            | us-east-1     |
//! | bucket_lookup | `auto`, `path` or `dns` addressing        | auto          |

use std::sync::Arc;

use async_trait::async_trait;
use objio_core::{DriverFactory, Error, Result, StorageDriver, StorageParameters};

use crate::client::S3Driver;

/// Root every s3 mount owns
pub const S3_ROOT: &str = "s3://";

/// Default signing region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Bucket addressing style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketLookup {
    /// Path style for custom endpoints, virtual-hosted for AWS
    Auto,
    Path,
    Dns,
}

impl BucketLookup {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(Self::Auto),
            "path" => Ok(Self::Path),
            "dns" => Ok(Self::Dns),
            other => Err(Error::Config(format!(
                "bucket_lookup must be auto, path or dns, got '{other}'"
            ))),
        }
    }
}

/// Validated connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Endpoint URL, normalized with a trailing slash
    pub endpoint: Option<String>,
    /// Static (access key, secret key) pair
    pub credentials: Option<(String, String)>,
    pub region: String,
    pub bucket_lookup: BucketLookup,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.credentials.as_ref().map(|(key, _)| key))
            .field("region", &self.region)
            .field("bucket_lookup", &self.bucket_lookup)
            .finish()
    }
}

impl S3Settings {
    pub fn from_parameters(parameters: &StorageParameters) -> Result<Self> {
        let endpoint = parameters.get("endpoint").map(normalize_endpoint).transpose()?;

        let credentials = match (parameters.get("access_key"), parameters.get("secret_key")) {
            (Some(access), Some(secret)) => Some((access.to_string(), secret.to_string())),
            (None, None) => None,
            (Some(_), None) => return Err(Error::MissingParameter("secret_key".into())),
            (None, Some(_)) => return Err(Error::MissingParameter("access_key".into())),
        };

        Ok(Self {
            endpoint,
            credentials,
            region: parameters.get("region").unwrap_or(DEFAULT_REGION).to_string(),
            bucket_lookup: BucketLookup::parse(parameters.get("bucket_lookup").unwrap_or("auto"))?,
        })
    }
}

/// Validate an endpoint URL and give it a trailing slash
pub fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "endpoint must be an http or https URL, got '{endpoint}'"
        )));
    }
    let mut normalized = endpoint.trim_end_matches('/').to_string();
    normalized.push('/');
    Ok(normalized)
}

/// Factory for `s3` mounts
#[derive(Debug, Default)]
pub struct S3Factory;

#[async_trait]
impl DriverFactory for S3Factory {
    fn storage_name(&self) -> &str {
        "s3"
    }

    fn roots(&self, parameters: &StorageParameters) -> Result<Vec<String>> {
        let mut roots = vec![S3_ROOT.to_string()];
        if let Some(endpoint) = parameters.get("endpoint") {
            roots.push(normalize_endpoint(endpoint)?);
        }
        Ok(roots)
    }

    async fn connect(&self, parameters: &StorageParameters) -> Result<Arc<dyn StorageDriver>> {
        let settings = S3Settings::from_parameters(parameters)?;
        Ok(Arc::new(S3Driver::connect(settings).await?))
    }
}
