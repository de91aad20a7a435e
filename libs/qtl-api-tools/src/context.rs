use crate::error::ApiError;
use crate::options::RequestOptions;
use http::{HeaderMap, StatusCode};
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Milestones of a single call.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub start: Instant,
    /// Response headers received
    pub header: Option<Instant>,
    /// Body finished, or the call failed
    pub finish: Option<Instant>,
}

impl Timings {
    #[must_use]
    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            header: None,
            finish: None,
        }
    }

    #[must_use]
    pub fn header_latency(&self) -> Option<Duration> {
        self.header.map(|t| t.saturating_duration_since(self.start))
    }

    #[must_use]
    pub fn total_latency(&self) -> Option<Duration> {
        self.finish.map(|t| t.saturating_duration_since(self.start))
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::starting_at(Instant::now())
    }
}

/// Body sizes: `raw` as received on the wire, `decoded` after decompression.
///
/// Both are byte counts. A multi-byte UTF-8 body therefore reports more
/// `decoded` bytes than it has characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyBytes {
    pub raw: usize,
    pub decoded: usize,
}

/// Leaf certificate presented by the server on a TLS connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    pub der: CertificateDer<'static>,
    /// Number of certificates the server sent, leaf included.
    pub chain_len: usize,
}

impl PeerCertificate {
    pub(crate) fn from_chain(chain: &[CertificateDer<'static>]) -> Option<Self> {
        let leaf = chain.first()?;
        Some(Self {
            der: leaf.clone(),
            chain_len: chain.len(),
        })
    }

    /// Lowercase hex SHA-256 over the DER encoding.
    #[must_use]
    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(self.der.as_ref()))
    }
}

/// Per-call record handed to the completion callback.
///
/// Created by [`call_server`](crate::call_server) (or taken from
/// [`RequestOptions::ctx`]) and filled in as the call progresses.
#[derive(Debug, Default)]
pub struct CallContext {
    /// The options the call was made with, `ctx` removed.
    pub options: RequestOptions,
    pub times: Timings,
    pub remote_address: Option<SocketAddr>,
    pub peer_certificate: Option<PeerCertificate>,
    pub status: Option<StatusCode>,
    pub response_headers: Option<HeaderMap>,
    pub body_bytes: Option<BodyBytes>,
    /// Set when the call ended without a parsed body.
    pub err: Option<ApiError>,
    /// Caller data carried through the call untouched.
    pub extensions: http::Extensions,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn finish_now(&mut self) {
        self.times.finish = Some(Instant::now());
    }
}
