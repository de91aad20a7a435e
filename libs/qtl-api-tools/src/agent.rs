use crate::body::{RawCountingBody, count_raw_bytes};
use crate::connect::{OverrideResolver, PeerInfoConnector, TcpConnector};
use crate::error::ApiError;
use crate::tls::{self, TlsRootConfig};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tower::ServiceExt;
use tower::util::MapResponse;
use tower_http::decompression::{Decompression, DecompressionBody};

type CountRawBytes = fn(Response<Incoming>) -> Response<RawCountingBody<Incoming>>;

/// hyper client → raw byte counting → gzip/br decoding.
type AgentService = Decompression<MapResponse<Client<PeerInfoConnector, Full<Bytes>>, CountRawBytes>>;

/// Response body as handed to the executor: decoded, with the raw byte count
/// available through [`RawByteCounter`](crate::body::RawByteCounter) in the
/// response extensions.
pub type ResponseBody = DecompressionBody<RawCountingBody<Incoming>>;

/// Connection-level settings for an [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Host names answered without DNS, e.g. to pin a host to one node.
    pub resolve: HashMap<String, IpAddr>,

    /// TCP connect timeout (default: none, the socket idle timeout still applies)
    pub connect_timeout: Option<Duration>,

    /// Idle time after which pooled connections are closed (default: 90 seconds)
    ///
    /// `None` keeps idle connections indefinitely.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle connections kept per host (default: 32, `0` disables reuse)
    pub pool_max_idle_per_host: usize,

    /// Set `TCP_NODELAY` on new connections (default: true)
    pub nodelay: bool,

    /// TLS trust anchors (default: `WebPki`)
    pub tls_roots: TlsRootConfig,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            resolve: HashMap::new(),
            connect_timeout: None,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            nodelay: true,
            tls_roots: TlsRootConfig::default(),
        }
    }
}

impl AgentOptions {
    /// Answer `host` with `ip` instead of asking DNS.
    #[must_use]
    pub fn resolve(mut self, host: impl Into<String>, ip: IpAddr) -> Self {
        self.resolve.insert(host.into(), ip);
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.tls_roots = roots;
        self
    }
}

/// Connection agent: a keep-alive pool plus the connector stack.
///
/// Cloning is cheap and clones share the pool, so one agent can serve any
/// number of calls. Calls made without an agent get a private one.
#[derive(Clone)]
pub struct Agent {
    service: AgentService,
    options: AgentOptions,
}

impl Agent {
    /// Build an agent from connection options.
    ///
    /// # Errors
    /// Returns `ApiError::Tls` if the TLS root store cannot be set up.
    pub fn new(options: AgentOptions) -> Result<Self, ApiError> {
        let connector = PeerInfoConnector::new(build_https_connector(&options)?);

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .pool_idle_timeout(options.pool_idle_timeout);
        let client = builder.build::<_, Full<Bytes>>(connector);

        let count: CountRawBytes = count_raw_bytes::<Incoming>;
        let service = Decompression::new(MapResponse::new(client, count));

        tracing::debug!(
            overrides = options.resolve.len(),
            tls_roots = options.tls_roots.label(),
            "built connection agent"
        );

        Ok(Self { service, options })
    }

    #[must_use]
    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub(crate) async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, ApiError> {
        Ok(self.service.clone().oneshot(request).await?)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn build_tcp_connector(options: &AgentOptions) -> TcpConnector {
    let mut http = TcpConnector::new_with_resolver(OverrideResolver::new(options.resolve.clone()));
    // The TLS wrapper decides per URI scheme.
    http.enforce_http(false);
    http.set_nodelay(options.nodelay);
    http.set_connect_timeout(options.connect_timeout);
    http
}

/// Build the connector accepting both `http` and `https` URIs.
///
/// # Errors
/// Returns `ApiError::Tls` when the chosen root set yields no usable trust
/// anchors, or the provider rejects the defaults.
fn build_https_connector(options: &AgentOptions) -> Result<HttpsConnector<TcpConnector>, ApiError> {
    let http = build_tcp_connector(options);

    let builder = match tls::client_config(&options.tls_roots)? {
        Some(config) => hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(config),
        None => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::crypto_provider())
            .map_err(|e| ApiError::Tls(Box::new(e)))?,
    };

    Ok(builder.https_or_http().enable_http1().wrap_connector(http))
}
