use std::time::Duration;
use thiserror::Error;

/// Errors produced while building or executing an API call.
///
/// Transport-level failures (`Transport`, `Tls`, `Body`, `Timeout`) are
/// normally reported through [`CallContext::err`](crate::CallContext::err)
/// rather than returned, see [`call_server`](crate::call_server).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Host, port and path did not combine into a valid URI
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// The HMAC key was rejected by the MAC implementation
    #[error("Secret key cannot be used as an HMAC-SHA1 key")]
    InvalidSecretKey,

    /// No bytes arrived within the idle timeout
    #[error("Socket idle for {0:?}, request timed out")]
    Timeout(Duration),

    /// Transport error (DNS, connection refused, reset, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Reading or decompressing the response body failed mid-stream
    #[error("Response body error: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// `application/json` body was not valid JSON
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// `application/xml` body was not well-formed
    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML was well-formed token-wise but not a single-rooted document
    #[error("XML document invalid: {0}")]
    XmlStructure(String),
}

impl ApiError {
    /// Whether this error came from the connection rather than the payload.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Tls(_) | Self::Body(_) | Self::Timeout(_)
        )
    }
}

impl From<hyper::Error> for ApiError {
    fn from(err: hyper::Error) -> Self {
        ApiError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for ApiError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        if is_tls_failure(&err) {
            return ApiError::Tls(Box::new(err));
        }
        ApiError::Transport(Box::new(err))
    }
}

/// Walk the source chain looking for a rustls failure.
///
/// `io::Error::source` skips the error it wraps, and hyper-rustls reports a
/// failed handshake as an `io::Error` around tokio-rustls' own `io::Error`,
/// so wrapped errors are followed through `get_ref` first.
fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        current = match e.downcast_ref::<std::io::Error>().and_then(std::io::Error::get_ref) {
            Some(inner) => Some(inner as &(dyn std::error::Error + 'static)),
            None => e.source(),
        };
    }
    false
}
