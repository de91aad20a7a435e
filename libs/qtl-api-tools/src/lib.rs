#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Client helpers for talking to a QTL job control server
//!
//! This crate provides:
//! - HMAC-SHA1 request signing (`Authorization` over `user:HMAC(date)`)
//! - A single-shot request executor with a completion callback
//! - Transparent gzip / brotli response decoding with raw and decoded
//!   byte counts
//! - Content-type dispatch to JSON, XML or plain text
//! - Per-call timing, remote address and TLS peer certificate capture
//! - Cycle-tolerant JSON rendering for debug logs
//!
//! # Example
//!
//! ```ignore
//! use qtl_api_tools::{ServerInfo, build_auth, call_server};
//!
//! let server = ServerInfo::new("cnc.example.com", "alice", "s3cr3t");
//! let options = build_auth(&server)?.path("/api/v1/jobs");
//!
//! call_server(options, |body, ctx| {
//!     if let Some(err) = &ctx.err {
//!         eprintln!("request failed: {err}");
//!     } else if let Some(jobs) = body.as_ref().and_then(|b| b.as_json()) {
//!         println!("{} jobs in {:?}", jobs.as_array().map_or(0, Vec::len), ctx.times.total_latency());
//!     }
//! })
//! .await?;
//! ```

mod agent;
mod auth;
pub mod body;
mod call;
mod connect;
mod context;
mod error;
mod options;
mod parse;
mod secret;
pub mod stringify;
mod tls;
pub mod xml;

pub use agent::{Agent, AgentOptions, ResponseBody};
pub use auth::{AUTH_REQUEST_TIMEOUT, ServerInfo, authorization_value, build_auth, build_auth_at};
pub use call::{call_server, spawn_call};
pub use context::{BodyBytes, CallContext, PeerCertificate, Timings};
pub use error::ApiError;
pub use options::{DEFAULT_IDLE_TIMEOUT, RequestOptions, Scheme};
pub use parse::{BodyKind, ParsedBody, parse_body};
pub use secret::SecretKey;
pub use stringify::{CIRCULAR, Node, NodeRef, stringify, stringify_value};
pub use tls::TlsRootConfig;
pub use xml::{XmlDocument, XmlElement};
