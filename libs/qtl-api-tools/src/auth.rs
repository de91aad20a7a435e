//! HMAC-signed Basic authorization for the API server.
//!
//! The server expects the password half of the Basic credentials to be
//! `base64(HMAC-SHA1(secret, Date))`, where `Date` is the exact value sent in
//! the `Date` header. Signatures are therefore only valid for the second
//! they were computed in.

use crate::error::ApiError;
use crate::options::RequestOptions;
use crate::secret::SecretKey;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http::HeaderValue;
use http::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, DATE};
use serde::Deserialize;
use sha1::Sha1;
use std::time::{Duration, SystemTime};

type HmacSha1 = Hmac<Sha1>;

/// Per-request timeout set on authenticated options.
pub const AUTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection details for one API server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub host: String,
    pub user: String,
    pub secret_key: SecretKey,
}

impl ServerInfo {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        secret_key: impl Into<SecretKey>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            secret_key: secret_key.into(),
        }
    }
}

/// Build request options carrying a freshly signed `Authorization` header.
///
/// # Errors
/// See [`build_auth_at`].
pub fn build_auth(server_info: &ServerInfo) -> Result<RequestOptions, ApiError> {
    build_auth_at(server_info, SystemTime::now())
}

/// Same as [`build_auth`] with an explicit clock reading.
///
/// The returned options target `server_info.host` with `GET`, a 10 second
/// timeout and `abort_on_error` set. Inputs are not validated; an empty user
/// simply yields credentials the server will reject.
///
/// # Errors
/// Returns `ApiError::InvalidSecretKey` if the MAC rejects the key and
/// `ApiError::InvalidHeaderValue` if a computed header cannot be encoded.
pub fn build_auth_at(server_info: &ServerInfo, now: SystemTime) -> Result<RequestOptions, ApiError> {
    let date = httpdate::fmt_http_date(now);
    let authorization = authorization_value(&server_info.user, &server_info.secret_key, &date)?;

    let mut options = RequestOptions::new(server_info.host.clone())
        .method(http::Method::GET)
        .timeout(AUTH_REQUEST_TIMEOUT)
        .abort_on_error(true);

    let headers = &mut options.headers;
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(AUTHORIZATION, HeaderValue::try_from(authorization)?);
    headers.insert(DATE, HeaderValue::try_from(date)?);
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    Ok(options)
}

/// Compute the `Authorization` header value for `user` at `date`.
///
/// Result is `" Basic " + base64(user + ":" + base64(HMAC-SHA1(secret, date)))`.
/// The leading space is what the server has always received and is kept.
///
/// # Errors
/// Returns `ApiError::InvalidSecretKey` if the MAC rejects the key.
pub fn authorization_value(user: &str, secret: &SecretKey, date: &str) -> Result<String, ApiError> {
    let digest = hmac_sha1(secret.as_bytes(), date.as_bytes())?;
    let password = STANDARD.encode(digest);
    let credentials = STANDARD.encode(format!("{user}:{password}"));
    Ok(format!(" Basic {credentials}"))
}

fn hmac_sha1(key: &[u8], message: &[u8]) -> Result<Vec<u8>, ApiError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|_| ApiError::InvalidSecretKey)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}
