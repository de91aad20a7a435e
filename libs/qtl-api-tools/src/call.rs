//! Single-shot request execution.
//!
//! [`call_server`] performs one request, decodes and parses the response and
//! hands the outcome to a completion callback. It never retries.

use crate::agent::{Agent, ResponseBody};
use crate::body::RawByteCounter;
use crate::context::{BodyBytes, CallContext, PeerCertificate, Timings};
use crate::error::ApiError;
use crate::options::RequestOptions;
use crate::parse::{BodyKind, ParsedBody, parse_body};
use crate::stringify::{Node, NodeRef, stringify};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::response::Parts;
use http::{HeaderValue, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpInfo;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;

/// Perform one request described by `options` and pass the parsed body to
/// `proc`.
///
/// `proc` runs at most once:
/// - with `Some(body)` when a response was read and parsed. Non-200/201
///   statuses get here too unless `abort_on_error` is set;
/// - with `None` and `ctx.err` set when the connection failed, the idle
///   timeout fired or an `application/xml` body could not be parsed, unless
///   `abort_on_error` is set;
/// - never when `abort_on_error` is set and the status was not 200/201 or
///   the transport failed. The failure is logged and `Ok(None)` returned.
///
/// The return value is `Ok(Some(_))` carrying whatever `proc` returned, or
/// `Ok(None)` when `proc` was skipped.
///
/// # Errors
/// Returns an error without calling `proc` when the request cannot be built
/// (bad host, path or header, TLS setup) and when an `application/json`
/// body is malformed.
pub async fn call_server<F, T>(mut options: RequestOptions, proc: F) -> Result<Option<T>, ApiError>
where
    F: FnOnce(Option<ParsedBody>, CallContext) -> T,
{
    let start = Instant::now();

    // An empty body counts as no body.
    if let Some(body) = options.req_body.as_ref().filter(|b| !b.is_empty()) {
        options
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    let mut ctx = options.ctx.take().map(|ctx| *ctx).unwrap_or_default();
    ctx.times = Timings::starting_at(start);

    let request = build_request(&options)?;
    let agent = match options.agent.take() {
        Some(agent) => agent,
        None => Agent::new(options.agent_options.clone().unwrap_or_default())?,
    };
    options.agent = Some(agent.clone());

    let idle = options.idle_timeout();
    let flags = Flags::from(&options);
    let target = format!("{}{}", options.host, options.path);
    ctx.options = options;

    let response = match time::timeout(idle, agent.send(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => return Ok(fail(ctx, err, flags, proc)),
        Err(_) => return Ok(fail(ctx, ApiError::Timeout(idle), flags, proc)),
    };

    ctx.times.header = Some(Instant::now());
    let (parts, body) = response.into_parts();
    ctx.status = Some(parts.status);
    ctx.remote_address = parts.extensions.get::<HttpInfo>().map(HttpInfo::remote_addr);
    ctx.peer_certificate = parts.extensions.get::<PeerCertificate>().cloned();
    let raw_bytes = parts
        .extensions
        .get::<RawByteCounter>()
        .cloned()
        .unwrap_or_default();

    if flags.debug {
        tracing::info!(response = %describe_response(&parts, &ctx), "response headers received");
    }

    if !is_ok(parts.status) {
        if !flags.quiet {
            tracing::warn!(
                status = parts.status.as_u16(),
                target = %target,
                "did not get an OK from the server"
            );
        }
        if flags.abort_on_error {
            drain(body, idle).await;
            ctx.response_headers = Some(parts.headers);
            return Ok(None);
        }
    }

    let kind = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(BodyKind::Text, BodyKind::from_content_type);
    ctx.response_headers = Some(parts.headers);

    let decoded = match read_body(body, idle).await {
        Ok(decoded) => decoded,
        Err(err) => return Ok(fail(ctx, err, flags, proc)),
    };
    ctx.finish_now();
    ctx.body_bytes = Some(BodyBytes {
        raw: raw_bytes.get(),
        decoded: decoded.len(),
    });

    if !flags.quiet {
        log_completion(&ctx, &target);
    }

    let text = String::from_utf8_lossy(&decoded).into_owned();
    match parse_body(kind, text) {
        Ok(parsed) => Ok(Some(proc(Some(parsed), ctx))),
        Err(err @ ApiError::Json(_)) => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, target = %target, "response body could not be parsed");
            ctx.err = Some(err);
            Ok(Some(proc(None, ctx)))
        }
    }
}

/// Run [`call_server`] on the Tokio runtime and return immediately.
///
/// The completion callback fires from the spawned task; the handle yields
/// the same result `call_server` would.
pub fn spawn_call<F, T>(options: RequestOptions, proc: F) -> JoinHandle<Result<Option<T>, ApiError>>
where
    F: FnOnce(Option<ParsedBody>, CallContext) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(call_server(options, proc))
}

#[derive(Debug, Clone, Copy)]
struct Flags {
    abort_on_error: bool,
    quiet: bool,
    debug: bool,
}

impl From<&RequestOptions> for Flags {
    fn from(options: &RequestOptions) -> Self {
        Self {
            abort_on_error: options.abort_on_error,
            quiet: options.quiet,
            debug: options.debug,
        }
    }
}

fn is_ok(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::CREATED
}

fn build_request(options: &RequestOptions) -> Result<Request<Full<Bytes>>, ApiError> {
    let body = options.req_body.clone().unwrap_or_default();
    let mut request = Request::builder()
        .method(options.method.clone())
        .uri(options.uri()?)
        .body(Full::new(body))?;
    *request.headers_mut() = options.headers.clone();
    Ok(request)
}

/// Terminal failure before a body was parsed.
fn fail<F, T>(mut ctx: CallContext, err: ApiError, flags: Flags, proc: F) -> Option<T>
where
    F: FnOnce(Option<ParsedBody>, CallContext) -> T,
{
    tracing::error!(
        error = %err,
        host = %ctx.options.host,
        path = %ctx.options.path,
        "encountered an error trying to make a request"
    );
    if flags.abort_on_error {
        return None;
    }
    ctx.finish_now();
    ctx.err = Some(err);
    Some(proc(None, ctx))
}

/// Collect the decoded body, allowing at most `idle` between frames.
async fn read_body(body: ResponseBody, idle: Duration) -> Result<Vec<u8>, ApiError> {
    let mut body = std::pin::pin!(body);
    let mut decoded = Vec::new();
    loop {
        let frame = time::timeout(idle, body.frame())
            .await
            .map_err(|_| ApiError::Timeout(idle))?;
        match frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    decoded.extend_from_slice(data);
                }
            }
            Some(Err(err)) => return Err(ApiError::Body(err)),
            None => return Ok(decoded),
        }
    }
}

/// Discard an unwanted body so the connection can go back to the pool.
async fn drain(body: ResponseBody, idle: Duration) {
    if let Err(err) = read_body(body, idle).await {
        tracing::debug!(error = %err, "failed to drain response body");
    }
}

fn log_completion(ctx: &CallContext, target: &str) {
    let header_secs = ctx.times.header_latency().unwrap_or_default().as_secs_f64();
    let total_secs = ctx.times.total_latency().unwrap_or_default().as_secs_f64();
    let bytes = ctx.body_bytes.unwrap_or_default();
    tracing::info!(
        header_secs,
        total_secs,
        status = ctx.status.map(|s| s.as_u16()),
        raw_bytes = bytes.raw,
        decoded_bytes = bytes.decoded,
        target = %target,
        "request complete"
    );
}

/// Debug rendering of a response as it arrived.
fn describe_response(parts: &Parts, ctx: &CallContext) -> String {
    let root = Node::object();
    Node::set(&root, "status", Node::from(u64::from(parts.status.as_u16())).into_ref());
    Node::set(&root, "version", Node::from(format!("{:?}", parts.version)).into_ref());

    let headers = Node::object();
    for name in parts.headers.keys() {
        let values: Vec<NodeRef> = parts
            .headers
            .get_all(name)
            .iter()
            .map(|v| Node::from(String::from_utf8_lossy(v.as_bytes()).into_owned()).into_ref())
            .collect();
        let value = if values.len() == 1 {
            values.into_iter().next().unwrap_or_default()
        } else {
            Node::Array(values).into_ref()
        };
        Node::set(&headers, name.as_str(), value);
    }
    Node::set(&root, "headers", headers);

    if let Some(addr) = ctx.remote_address {
        Node::set(&root, "remoteAddress", Node::from(addr.to_string()).into_ref());
    }
    if let Some(peer) = &ctx.peer_certificate {
        let cert = Node::object();
        Node::set(&cert, "fingerprintSha256", Node::from(peer.fingerprint_sha256()).into_ref());
        Node::set(&cert, "chainLength", Node::from(peer.chain_len as u64).into_ref());
        Node::set(&root, "peerCertificate", cert);
    }

    let request = Node::object();
    Node::set(&request, "method", Node::from(ctx.options.method.as_str()).into_ref());
    Node::set(&request, "url", Node::from(ctx.options.url()).into_ref());
    Node::set(&root, "request", request);

    stringify(&root)
}
