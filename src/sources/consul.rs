//! Consul HTTP catalog client.

use super::{CatalogClient, ServiceListing};
use crate::core::RawServiceRecord;
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Response, Url, header::HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Header carrying the catalog index of a blocking query.
const INDEX_HEADER: &str = "X-Consul-Index";

/// Header carrying the ACL token.
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Extra time granted to a request beyond its blocking wait.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    node: String,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthService {
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    node: HealthNode,
    service: HealthService,
}

impl From<ServiceEntry> for RawServiceRecord {
    fn from(entry: ServiceEntry) -> Self {
        RawServiceRecord {
            service_name: entry.service.service,
            node_name: entry.node.node,
            node_address: entry.node.address,
            service_address: entry.service.address,
            port: entry.service.port,
            tags: entry.service.tags.unwrap_or_default(),
        }
    }
}

/// [`CatalogClient`] speaking the Consul HTTP API.
///
/// # Examples
///
/// ```rust,no_run
/// use routesync::sources::ConsulCatalogClient;
///
/// # fn example() -> Result<(), routesync::error::StoreError> {
/// let client = ConsulCatalogClient::builder()
///     .with_endpoint("http://127.0.0.1:8500")
///     .with_token("secret")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ConsulCatalogClient {
    endpoint: Url,
    token: Option<String>,
    datacenter: Option<String>,
    client: Client,
}

impl ConsulCatalogClient {
    /// Create a new builder.
    pub fn builder() -> ConsulCatalogClientBuilder {
        ConsulCatalogClientBuilder::new()
    }

    /// Endpoint URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, segments: &[&str]) -> Result<reqwest::RequestBuilder, StoreError> {
        let mut request = self.client.get(self.url(segments));
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| StoreError::Backend(format!("Invalid ACL token: {}", e)))?;
            request = request.header(TOKEN_HEADER, value);
        }
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc.as_str())]);
        }
        Ok(request)
    }
}

async fn checked(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Backend(format!(
        "Consul answered {}: {}",
        status,
        body.trim()
    )))
}

fn send_error(err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::Unreachable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl CatalogClient for ConsulCatalogClient {
    async fn list_services(
        &self,
        wait_index: u64,
        wait_time: Duration,
    ) -> Result<ServiceListing, StoreError> {
        let wait = format!("{}ms", wait_time.as_millis());
        let response = self
            .request(&["v1", "catalog", "services"])?
            .query(&[("index", wait_index.to_string()), ("wait", wait)])
            .timeout(wait_time + REQUEST_SLACK)
            .send()
            .await
            .map_err(send_error)?;
        let response = checked(response).await?;

        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Backend(format!("Missing {} header", INDEX_HEADER)))?;

        let services: BTreeMap<String, Option<Vec<String>>> = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("Invalid service listing: {}", e)))?;

        debug!(index, services = services.len(), "Listed Consul services");

        Ok(ServiceListing {
            services: services
                .into_iter()
                .map(|(name, tags)| (name, tags.unwrap_or_default()))
                .collect(),
            index,
        })
    }

    async fn healthy_service_nodes(
        &self,
        service: &str,
    ) -> Result<Vec<RawServiceRecord>, StoreError> {
        let response = self
            .request(&["v1", "health", "service", service])?
            .query(&[("passing", "true")])
            .send()
            .await
            .map_err(send_error)?;
        let response = checked(response).await?;

        let entries: Vec<ServiceEntry> = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("Invalid health entries: {}", e)))?;
        Ok(entries.into_iter().map(RawServiceRecord::from).collect())
    }
}

/// Builder for [`ConsulCatalogClient`].
pub struct ConsulCatalogClientBuilder {
    endpoint: String,
    token: Option<String>,
    datacenter: Option<String>,
    ca_file: Option<std::path::PathBuf>,
    insecure_skip_verify: bool,
}

impl ConsulCatalogClientBuilder {
    /// Create a builder pointing at the local agent.
    pub fn new() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            ca_file: None,
            insecure_skip_verify: false,
        }
    }

    /// Agent address, scheme included.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// ACL token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Datacenter to query.
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    /// PEM bundle of extra trusted roots.
    pub fn with_ca_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Skip server certificate verification.
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a base URL, the CA file
    /// cannot be read or the HTTP client cannot be constructed.
    pub fn build(self) -> Result<ConsulCatalogClient, StoreError> {
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| StoreError::Backend(format!("Invalid endpoint '{}': {}", self.endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::Backend(format!(
                "Endpoint '{}' cannot carry a path",
                self.endpoint
            )));
        }

        let mut builder = Client::builder().danger_accept_invalid_certs(self.insecure_skip_verify);

        if let Some(path) = &self.ca_file {
            let pem = std::fs::read(path).map_err(|e| {
                StoreError::Backend(format!("Cannot read CA file {}: {}", path.display(), e))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| StoreError::Backend(format!("Invalid CA file: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|e| StoreError::Backend(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ConsulCatalogClient {
            endpoint,
            token: self.token.filter(|token| !token.is_empty()),
            datacenter: self.datacenter.filter(|dc| !dc.is_empty()),
            client,
        })
    }
}

impl Default for ConsulCatalogClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
