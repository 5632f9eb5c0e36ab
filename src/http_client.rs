//! Pooled HTTP client for CDN pre-warm and load-test requests (§4.3).
//!
//! `build_client`/`configure_*` form a client-construction pipeline
//! (DNS override, mTLS identity, custom headers, connection pool
//! knobs). [`CdnHttpClient`] layers request-level behavior on top:
//! retry with linear backoff, TTFB measurement, and
//! context-cancellation short-circuiting.

use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::connection_pool::PoolConfig;
use crate::error_category::ErrorCategory;
use crate::results::RequestResult;
use crate::utils::parse_headers_with_escapes;

/// Configuration for building the HTTP client.
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
    pub pool_config: Option<PoolConfig>,
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(
    config: &ClientConfig,
) -> Result<ClientBuildResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut client_builder = reqwest::Client::builder();

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            client_builder = configure_dns_override(client_builder, resolve_str)?;
        } else {
            warn!("resolve_target_addr is set but empty, no DNS override will be applied");
        }
    }

    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!("configured custom default headers");
    }

    let pool_config = config.pool_config.clone().unwrap_or_default();
    client_builder = pool_config.apply_to_builder(client_builder);
    info!(
        max_idle_per_host = pool_config.max_idle_per_host,
        idle_timeout = ?pool_config.idle_timeout,
        "connection pool configured"
    );

    let client = if config.skip_tls_verify {
        warn!("skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

fn configure_dns_override(
    mut client_builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    let parts: Vec<&str> = resolve_str.split(':').collect();
    if parts.len() != 3 {
        return Err(format!(
            "resolve_target_addr ('{}') is not in the expected format 'hostname:ip:port'",
            resolve_str
        )
        .into());
    }

    let hostname_to_override = parts[0].trim();
    let ip_to_resolve_to = parts[1].trim();
    let port_to_connect_to_str = parts[2].trim();

    if hostname_to_override.is_empty() {
        return Err("resolve_target_addr: hostname part cannot be empty".into());
    }
    if ip_to_resolve_to.is_empty() {
        return Err("resolve_target_addr: IP address part cannot be empty".into());
    }
    if port_to_connect_to_str.is_empty() {
        return Err("resolve_target_addr: port part cannot be empty".into());
    }

    let port_to_connect_to: u16 = port_to_connect_to_str
        .parse()
        .map_err(|e| format!("failed to parse port '{}': {}", port_to_connect_to_str, e))?;

    let socket_addr_str = format!("{}:{}", ip_to_resolve_to, port_to_connect_to);
    let socket_addr: SocketAddr = socket_addr_str
        .parse()
        .map_err(|e| format!("failed to parse '{}' into SocketAddr: {}", socket_addr_str, e))?;

    client_builder = client_builder.resolve(hostname_to_override, socket_addr);
    info!(hostname_to_override, %socket_addr, "configured DNS override");

    Ok(client_builder)
}

fn configure_mtls(
    mut client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let mut cert_file = File::open(cert_path)
                .map_err(|e| format!("failed to open client certificate '{}': {}", cert_path, e))?;
            let mut cert_pem_buf = Vec::new();
            cert_file
                .read_to_end(&mut cert_pem_buf)
                .map_err(|e| format!("failed to read client certificate '{}': {}", cert_path, e))?;

            let mut key_file = File::open(key_path)
                .map_err(|e| format!("failed to open client key '{}': {}", key_path, e))?;
            let mut key_pem_buf = Vec::new();
            key_file
                .read_to_end(&mut key_pem_buf)
                .map_err(|e| format!("failed to read client key '{}': {}", key_path, e))?;

            let mut cert_pem_cursor = std::io::Cursor::new(cert_pem_buf.as_slice());
            let certs_result: Vec<_> = rustls_pemfile::certs(&mut cert_pem_cursor).collect();
            if certs_result.is_empty() {
                return Err(format!("no PEM certificates found in {}", cert_path).into());
            }
            for cert in certs_result {
                cert.map_err(|e| format!("failed to parse PEM certificate '{}': {}", cert_path, e))?;
            }

            let mut key_pem_cursor = std::io::Cursor::new(key_pem_buf.as_slice());
            let keys_result: Vec<_> =
                rustls_pemfile::pkcs8_private_keys(&mut key_pem_cursor).collect();
            if keys_result.is_empty() {
                return Err(format!("no PKCS#8 private keys found in '{}'", key_path).into());
            }
            for key in keys_result {
                key.map_err(|e| format!("failed to parse private key '{}': {}", key_path, e))?;
            }

            let mut combined_pem_buf = Vec::new();
            combined_pem_buf.extend_from_slice(&cert_pem_buf);
            if !cert_pem_buf.ends_with(b"\n") && !key_pem_buf.starts_with(b"\n") {
                combined_pem_buf.push(b'\n');
            }
            combined_pem_buf.extend_from_slice(&key_pem_buf);

            let identity = reqwest::Identity::from_pem(&combined_pem_buf)
                .map_err(|e| format!("failed to build reqwest::Identity from PEM: {}", e))?;

            client_builder = client_builder.identity(identity);
            info!("configured mTLS client identity");
        }
        (Some(_), None) => {
            return Err("client_cert_path is set but client_key_path is missing".into());
        }
        (None, Some(_)) => {
            return Err("client_key_path is set but client_cert_path is missing".into());
        }
        (None, None) => {}
    }

    Ok(client_builder)
}

fn configure_custom_headers(
    custom_headers_str: Option<&str>,
) -> Result<HeaderMap, Box<dyn std::error::Error + Send + Sync>> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let header_pair_str_trimmed = header_pair_str.trim();
        if header_pair_str_trimmed.is_empty() {
            continue;
        }

        let parts: Vec<&str> = header_pair_str_trimmed.splitn(2, ':').collect();
        if parts.len() != 2 {
            return Err(format!(
                "invalid header format in custom_headers: '{}', expected 'Name:Value'",
                header_pair_str_trimmed
            )
            .into());
        }

        let name_str = parts[0].trim();
        let value_str = parts[1].trim();
        if name_str.is_empty() {
            return Err(format!("header name cannot be empty in '{}'", header_pair_str_trimmed).into());
        }

        let unescaped_value = value_str.replace("\\,", ",");

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| format!("invalid header name '{}': {}", name_str, e))?;
        let header_value = HeaderValue::from_str(&unescaped_value)
            .map_err(|e| format!("invalid header value for '{}': {}", name_str, e))?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

/// Per-request overrides for [`CdnHttpClient::get`]/[`CdnHttpClient::head`].
#[derive(Debug, Clone, Default)]
pub struct RequestOpts {
    pub timeout: Option<Duration>,
    pub extra_headers: Vec<(String, String)>,
}

/// Retry policy applied by [`CdnHttpClient`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub connection_close_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 2,
            retry_delay: Duration::from_millis(250),
            connection_close_delay: None,
        }
    }
}

/// HTTP method used by a pre-warm or load-test request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

/// Thin wrapper over `reqwest::Client` adding retry, TTFB measurement,
/// and cooperative cancellation (§4.3).
pub struct CdnHttpClient {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
}

impl CdnHttpClient {
    pub fn new(client: reqwest::Client, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            retry_policy,
        }
    }

    pub fn get<'a>(
        &'a self,
        cancel: &'a watch::Receiver<bool>,
        url: &'a str,
        opts: &'a RequestOpts,
    ) -> impl std::future::Future<Output = RequestResult> + 'a {
        self.request(Method::Get, cancel, url, opts)
    }

    pub fn head<'a>(
        &'a self,
        cancel: &'a watch::Receiver<bool>,
        url: &'a str,
        opts: &'a RequestOpts,
    ) -> impl std::future::Future<Output = RequestResult> + 'a {
        self.request(Method::Head, cancel, url, opts)
    }

    /// Issue a request with up to `retry_policy.retry_attempts` extra
    /// attempts on transport error or `status >= 500`. Backoff between
    /// attempts is linear: `retry_delay * attempt_index`. A request in
    /// progress is not interrupted by cancellation; only the *next*
    /// retry is skipped once `cancel` reports true.
    async fn request(
        &self,
        method: Method,
        cancel: &watch::Receiver<bool>,
        url: &str,
        opts: &RequestOpts,
    ) -> RequestResult {
        let max_attempts = self.retry_policy.retry_attempts + 1;
        let mut last_result = None;

        for attempt in 1..=max_attempts {
            if *cancel.borrow() {
                return RequestResult {
                    url: url.to_string(),
                    status_code: None,
                    ttfb_secs: None,
                    total_secs: 0.0,
                    response_bytes: 0,
                    attempts: attempt - 1,
                    error_category: Some(ErrorCategory::Shutdown),
                    error_message: Some("cancelled before attempt".to_string()),
                };
            }

            let result = self.attempt_once(method, url, opts, attempt).await;
            let should_retry = attempt < max_attempts
                && match &result.error_category {
                    None => false,
                    Some(ErrorCategory::Shutdown) => false,
                    Some(ErrorCategory::ServerError) => true,
                    Some(ErrorCategory::Timeout) | Some(ErrorCategory::Network) => true,
                    _ => false,
                };

            if !should_retry {
                return result;
            }

            last_result = Some(result);
            tokio::time::sleep(self.retry_policy.retry_delay * attempt).await;
        }

        last_result.expect("loop runs at least once")
    }

    async fn attempt_once(
        &self,
        method: Method,
        url: &str,
        opts: &RequestOpts,
        attempt: u32,
    ) -> RequestResult {
        let start = Instant::now();

        let mut builder = match method {
            Method::Get => self.client.get(url),
            Method::Head => self.client.head(url),
        };
        if let Some(timeout) = opts.timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &opts.extra_headers {
            builder = builder.header(name, value);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                return RequestResult {
                    url: url.to_string(),
                    status_code: None,
                    ttfb_secs: None,
                    total_secs: start.elapsed().as_secs_f64(),
                    response_bytes: 0,
                    attempts: attempt,
                    error_category: Some(ErrorCategory::from_reqwest_error(&e)),
                    error_message: Some(e.to_string()),
                }
            }
        };

        let ttfb_secs = start.elapsed().as_secs_f64();
        let status = response.status();
        let category = ErrorCategory::from_status_code(status.as_u16());

        let mut response = response;
        let mut response_bytes: u64 = 0;
        let mut stream_error = None;
        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => response_bytes += bytes.len() as u64,
                Ok(None) => break,
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            }
        }

        if let Some(delay) = self.retry_policy.connection_close_delay {
            tokio::time::sleep(delay).await;
        }

        let total_secs = start.elapsed().as_secs_f64();

        if let Some(e) = stream_error {
            return RequestResult {
                url: url.to_string(),
                status_code: Some(status.as_u16()),
                ttfb_secs: Some(ttfb_secs),
                total_secs,
                response_bytes,
                attempts: attempt,
                error_category: Some(ErrorCategory::from_reqwest_error(&e)),
                error_message: Some(e.to_string()),
            };
        }

        RequestResult {
            url: url.to_string(),
            status_code: Some(status.as_u16()),
            ttfb_secs: Some(ttfb_secs),
            total_secs,
            response_bytes,
            attempts: attempt,
            error_category: category,
            error_message: category.map(|_| format!("HTTP {}", status.as_u16())),
        }
    }
}
