use std::future::Future;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::{LAST_MODIFIED, LOCATION};
use reqwest::{Client, Proxy, redirect};
use tokio::time::timeout;

use crate::error::{FetchError, FetchResult, ResolutionError};

/// Port used when a proxy is given as a bare host name.
pub const DEFAULT_PROXY_PORT: u16 = 3128;

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// Optional caching proxy, `host` or `host:port`
    pub proxy: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: format!("xmlresolution/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
        }
    }
}

/// One HTTP exchange, without any redirect following.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Location` header, present on redirects
    pub location: Option<String>,
    /// Raw `Last-Modified` header
    pub last_modified: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Performs a single GET for the schema catalog.
///
/// Implementations must not follow redirects themselves: the catalog needs to
/// see every hop so it can record where a location ended up.
pub trait SchemaFetcher {
    fn get(&self, url: &str) -> impl Future<Output = FetchResult<HttpResponse>> + Send;
}

impl<T: SchemaFetcher + Sync> SchemaFetcher for &T {
    fn get(&self, url: &str) -> impl Future<Output = FetchResult<HttpResponse>> + Send {
        (**self).get(url)
    }
}

/// Split `host[:port]` into its parts, defaulting the port.
pub fn parse_proxy(proxy: &str) -> Result<(String, u16), ResolutionError> {
    let (host, port) = match proxy.split_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                ResolutionError::Config(format!("Invalid proxy port in '{}'", proxy))
            })?;
            (host, port)
        }
        None => (proxy, DEFAULT_PROXY_PORT),
    };

    if host.is_empty() {
        return Err(ResolutionError::Config(format!(
            "Invalid proxy '{}': missing host",
            proxy
        )));
    }

    Ok((host.to_string(), port))
}

/// Async HTTP client for downloading remote schemas
pub struct AsyncHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl AsyncHttpClient {
    /// Create a new async HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, ResolutionError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .redirect(redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10);

        builder = match &config.proxy {
            Some(proxy) => {
                let (host, port) = parse_proxy(proxy)?;
                let proxy = Proxy::http(format!("http://{}:{}", host, port)).map_err(|e| {
                    ResolutionError::Config(format!("Invalid proxy '{}': {}", proxy, e))
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| ResolutionError::Config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Make a single HTTP GET with timeout, collecting the body
    async fn make_request(&self, url: &str) -> FetchResult<HttpResponse> {
        let exchange = async {
            let response = self.client.get(url).send().await?;
            let status = response.status().as_u16();
            let header = |name| {
                response
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
            };
            let location = header(LOCATION);
            let last_modified = header(LAST_MODIFIED);

            let mut body = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.try_next().await? {
                body.extend_from_slice(&chunk);
            }

            Ok::<_, FetchError>(HttpResponse {
                status,
                location,
                last_modified,
                body,
            })
        };

        timeout(Duration::from_secs(self.config.timeout_seconds), exchange)
            .await
            .map_err(|_| FetchError::Timeout {
                location: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            })?
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

impl SchemaFetcher for AsyncHttpClient {
    async fn get(&self, url: &str) -> FetchResult<HttpResponse> {
        tracing::debug!("GET {}", url);
        self.make_request(url).await
    }
}
