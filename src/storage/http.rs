//! S3-compatible object store client over plain HTTP
//!
//! Uses path-style addressing (`{endpoint}/{bucket}`). Requests are unsigned;
//! the endpoint is expected to sit behind a gateway that handles credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, instrument, warn};

use crate::config::ObjectStoreConfig;
use crate::error::{Error, Result};

use super::object_store::ObjectStoreClient;

const OBJECT_LOCK_HEADER: &str = "x-amz-bucket-object-lock-enabled";
/// Region that must not be sent as a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Object store client speaking the S3 REST API
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    region: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            region: config.region.clone(),
        })
    }

    fn bucket_url(&self, name: &str) -> String {
        format!("{}/{}", self.endpoint, name)
    }

    fn create_bucket_body(&self) -> Option<String> {
        self.region
            .as_deref()
            .filter(|r| !r.is_empty() && *r != DEFAULT_REGION)
            .map(|region| {
                format!(
                    "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                    xml_escape(region)
                )
            })
    }

    /// Accept an existing bucket only if its object lock setting matches
    async fn ensure_lock_matches(&self, name: &str, locked: bool) -> Result<()> {
        if self.bucket_locked(name).await? == locked {
            info!("Bucket {} already exists", name);
            Ok(())
        } else {
            Err(Error::Conflict(format!(
                "bucket {} already exists with object lock {}",
                name,
                if locked { "disabled" } else { "enabled" }
            )))
        }
    }

    /// Whether an existing bucket has object lock enabled
    async fn bucket_locked(&self, name: &str) -> Result<bool> {
        let url = format!("{}?object-lock", self.bucket_url(name));
        let response = self.client.get(&url).send().await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.text().await?;
                Ok(xml_tag(&body, "ObjectLockEnabled") == Some("Enabled"))
            }
            StatusCode::NOT_FOUND => {
                // ObjectLockConfigurationNotFoundError on an existing bucket
                let err = into_error(StatusCode::NOT_FOUND, response.text().await?);
                match &err {
                    Error::ObjectStoreError { code, .. } if code != "NoSuchBucket" => Ok(false),
                    _ => Err(err),
                }
            }
            status => Err(into_error(status, response.text().await?)),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for HttpObjectStore {
    #[instrument(skip(self))]
    async fn create_bucket(&self, name: &str, locked: bool) -> Result<()> {
        // us-east-1 answers 200 when re-creating an owned bucket, so an
        // existing bucket is detected up front
        if self.bucket_exists(name).await? {
            return self.ensure_lock_matches(name, locked).await;
        }

        let mut request = self.client.put(self.bucket_url(name));
        if locked {
            request = request.header(OBJECT_LOCK_HEADER, "true");
        }
        if let Some(body) = self.create_bucket_body() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Created bucket {} (locked: {})", name, locked);
            return Ok(());
        }

        let err = into_error(status, read_body(response).await);
        match &err {
            Error::ObjectStoreError { code, .. } if code == "BucketAlreadyOwnedByYou" => {
                self.ensure_lock_matches(name, locked).await
            }
            _ => Err(err),
        }
    }

    #[instrument(skip(self))]
    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        let response = self.client.head(self.bucket_url(name)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            // HEAD responses carry no body, so only the status is available
            status => Err(Error::ObjectStoreError {
                status: status.as_u16(),
                code: status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string(),
                message: format!("HEAD {} failed", name),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn bucket_location(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}?location", self.bucket_url(name));
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = read_body(response).await;

        if !status.is_success() {
            return Err(into_error(status, body));
        }

        let location = xml_tag(&body, "LocationConstraint")
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        debug!("Bucket {} location: {:?}", name, location);
        Ok(location)
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let response = self.client.delete(self.bucket_url(name)).send().await?;
        let status = response.status();

        if status.is_success() {
            info!("Deleted bucket {}", name);
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            warn!("Bucket {} not found, already deleted", name);
            return Ok(());
        }

        Err(into_error(status, read_body(response).await))
    }
}

async fn read_body(response: Response) -> String {
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read object store response body: {}", e);
            String::new()
        }
    }
}

/// Turn an S3 error document into an [`Error::ObjectStoreError`]
fn into_error(status: StatusCode, body: String) -> Error {
    let code = xml_tag(&body, "Code")
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());
    let message = xml_tag(&body, "Message")
        .map(str::to_string)
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));

    Error::ObjectStoreError {
        status: status.as_u16(),
        code,
        message,
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Text of the first `<tag>...</tag>` element, if present
///
/// Namespaced opening tags such as `<LocationConstraint xmlns="...">` are
/// accepted.
fn xml_tag<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);

    let mut search_from = 0;
    while let Some(offset) = body[search_from..].find(&open) {
        let start = search_from + offset + open.len();
        let rest = &body[start..];
        match rest.chars().next() {
            Some('>') => {
                let content = &rest[1..];
                return content.find(&close).map(|end| content[..end].trim());
            }
            Some(c) if c.is_whitespace() => {
                let gt = rest.find('>')?;
                if rest[..gt].ends_with('/') {
                    return Some("");
                }
                let content = &rest[gt + 1..];
                return content.find(&close).map(|end| content[..end].trim());
            }
            Some('/') if rest.starts_with("/>") => return Some(""),
            _ => search_from = start,
        }
    }
    None
}
