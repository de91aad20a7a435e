//! Trust anchors for agents.
//!
//! `WebPki` roots ship inside hyper-rustls. Every other choice is turned into
//! a rustls `ClientConfig` here. Native roots are read from the OS store once
//! per process.

use crate::error::ApiError;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Which trust anchors an [`Agent`](crate::Agent) verifies servers against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsRootConfig {
    /// Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// OS native root certificate store
    Native,
    /// Only the given certificates, e.g. a private CA or a server's
    /// self-signed certificate.
    Custom(Vec<CertificateDer<'static>>),
}

impl TlsRootConfig {
    /// Trust exactly `roots`.
    #[must_use]
    pub fn custom(roots: impl IntoIterator<Item = CertificateDer<'static>>) -> Self {
        Self::Custom(roots.into_iter().collect())
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::WebPki => "webpki",
            Self::Native => "native",
            Self::Custom(_) => "custom",
        }
    }
}

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn native_roots() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(|| {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            tracing::warn!(error = %err, "error loading native root certificate");
        }
        result.certs
    })
}

/// Globally installed provider if any, otherwise a private aws-lc-rs one.
pub(crate) fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client config for `roots`, or `None` for `WebPki`, which hyper-rustls
/// installs itself.
///
/// # Errors
/// Returns `ApiError::Tls` when no certificate in the chosen set parses, so
/// an unusable trust store fails the agent build rather than every handshake.
pub(crate) fn client_config(roots: &TlsRootConfig) -> Result<Option<ClientConfig>, ApiError> {
    let certs = match roots {
        TlsRootConfig::WebPki => return Ok(None),
        TlsRootConfig::Native => native_roots(),
        TlsRootConfig::Custom(certs) => certs.as_slice(),
    };
    let store = root_store(roots.label(), certs)?;

    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ApiError::Tls(Box::new(e)))?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(Some(config))
}

fn root_store(source: &str, certs: &[CertificateDer<'static>]) -> Result<RootCertStore, ApiError> {
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(source, added, ignored, "skipped unparsable root certificates");
    }
    if added == 0 {
        return Err(ApiError::Tls(
            format!("no usable {source} root certificates (found {})", certs.len()).into(),
        ));
    }
    tracing::debug!(source, added, "loaded trust anchors");
    Ok(store)
}
