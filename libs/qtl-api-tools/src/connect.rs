//! Connector pieces below the hyper client: DNS overrides and capture of the
//! server's TLS certificate.

use crate::context::PeerCertificate;
use http::Uri;
use hyper_rustls::{HttpsConnector, MaybeHttpsStream};
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::{Service, ServiceExt};

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Resolver that answers configured host names from a fixed table and
/// defers everything else to `getaddrinfo`.
///
/// Overrides resolve to port 0; the connector substitutes the port from the
/// request URI.
#[derive(Clone)]
pub struct OverrideResolver {
    overrides: Arc<HashMap<String, IpAddr>>,
    fallback: GaiResolver,
}

impl OverrideResolver {
    pub fn new(overrides: HashMap<String, IpAddr>) -> Self {
        Self {
            overrides: Arc::new(overrides),
            fallback: GaiResolver::new(),
        }
    }
}

impl Service<Name> for OverrideResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        if let Some(ip) = self.overrides.get(name.as_str()) {
            tracing::debug!(host = name.as_str(), %ip, "resolved from override table");
            let addrs = vec![SocketAddr::new(*ip, 0)];
            return Box::pin(async move { Ok(addrs.into_iter()) });
        }

        let fallback = self.fallback.clone();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = fallback.oneshot(name).await?.collect();
            Ok(addrs.into_iter())
        })
    }
}

pub type TcpConnector = HttpConnector<OverrideResolver>;
pub type Stream = MaybeHttpsStream<TokioIo<TcpStream>>;

/// Wraps the HTTPS connector and records the peer certificate of every TLS
/// connection it establishes.
#[derive(Clone)]
pub struct PeerInfoConnector {
    inner: HttpsConnector<TcpConnector>,
}

impl PeerInfoConnector {
    pub fn new(inner: HttpsConnector<TcpConnector>) -> Self {
        Self { inner }
    }
}

impl Service<Uri> for PeerInfoConnector {
    type Response = PeerInfoStream<Stream>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connecting = self.inner.call(uri);
        Box::pin(async move {
            let stream = connecting.await?;
            let peer = peer_certificate(&stream);
            Ok(PeerInfoStream { inner: stream, peer })
        })
    }
}

fn peer_certificate<T>(stream: &MaybeHttpsStream<T>) -> Option<PeerCertificate> {
    match stream {
        MaybeHttpsStream::Http(_) => None,
        MaybeHttpsStream::Https(tls) => {
            let (_, session) = tls.inner().get_ref();
            session
                .peer_certificates()
                .and_then(PeerCertificate::from_chain)
        }
    }
}

pin_project! {
    /// Connection stream carrying the certificate captured at handshake.
    ///
    /// The certificate is published through [`Connected::extra`], which
    /// makes hyper copy it into the extensions of every response received
    /// on this connection.
    pub struct PeerInfoStream<S> {
        #[pin]
        inner: S,
        peer: Option<PeerCertificate>,
    }
}

impl<S: hyper::rt::Read> hyper::rt::Read for PeerInfoStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<S: hyper::rt::Write> hyper::rt::Write for PeerInfoStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }
}

impl<S: Connection> Connection for PeerInfoStream<S> {
    fn connected(&self) -> Connected {
        let connected = self.inner.connected();
        match &self.peer {
            Some(peer) => connected.extra(peer.clone()),
            None => connected,
        }
    }
}
