use crate::agent::{Agent, AgentOptions};
use crate::context::CallContext;
use crate::error::ApiError;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::time::Duration;

/// Idle timeout used when [`RequestOptions::timeout`] is unset.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// URL scheme, selecting plain TCP or TLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    Http,
    /// TLS via rustls (default)
    #[default]
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything [`call_server`](crate::call_server) needs for one request.
///
/// Usually seeded by [`build_auth`](crate::build_auth) and then completed by
/// the caller with a path and, for POST-style calls, a body. The options are
/// consumed by the call and end up in [`CallContext::options`]; they are not
/// meant to be reused since the `Date` and `Authorization` headers are
/// time-bound.
#[derive(Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestOptions {
    pub host: String,
    /// Explicit port; when `None` the scheme's default port is used.
    pub port: Option<u16>,
    /// Path and query, starting with `/`. Empty means `/`.
    pub path: String,
    pub method: http::Method,
    pub scheme: Scheme,
    pub headers: HeaderMap,
    /// Request body, written before the request is finished.
    pub req_body: Option<Bytes>,
    /// Socket idle timeout; [`DEFAULT_IDLE_TIMEOUT`] when `None`.
    pub timeout: Option<Duration>,
    /// Build a dedicated agent for this call (e.g. DNS overrides).
    pub agent_options: Option<AgentOptions>,
    /// Pre-built agent to reuse; takes precedence over `agent_options`.
    pub agent: Option<Agent>,
    /// Drop the call silently on a non-200/201 status or transport failure.
    pub abort_on_error: bool,
    /// Suppress timing and status diagnostics.
    pub quiet: bool,
    /// Log the stringified response when headers arrive.
    pub debug: bool,
    /// Caller-supplied context to accumulate into instead of a fresh one.
    pub ctx: Option<Box<CallContext>>,
}

impl RequestOptions {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn method(mut self, method: http::Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set (or replace) a request header.
    ///
    /// # Errors
    /// Returns `ApiError::InvalidHeaderName` or `ApiError::InvalidHeaderValue`
    /// if either part is not valid in an HTTP/1.1 header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.req_body = Some(body.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn agent_options(mut self, agent_options: AgentOptions) -> Self {
        self.agent_options = Some(agent_options);
        self
    }

    #[must_use]
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    #[must_use]
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn ctx(mut self, ctx: CallContext) -> Self {
        self.ctx = Some(Box::new(ctx));
        self
    }

    /// Effective socket idle timeout.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT)
    }

    /// Absolute URL assembled from scheme, host, port and path.
    #[must_use]
    pub fn url(&self) -> String {
        let path = if self.path.is_empty() {
            "/"
        } else {
            self.path.as_str()
        };
        match self.port {
            Some(port) => format!("{}://{}:{port}{path}", self.scheme, self.host),
            None => format!("{}://{}{path}", self.scheme, self.host),
        }
    }

    pub(crate) fn uri(&self) -> Result<http::Uri, ApiError> {
        let url = self.url();
        url.parse::<http::Uri>()
            .map_err(|e| ApiError::InvalidUri {
                reason: e.to_string(),
                url,
            })
    }
}
