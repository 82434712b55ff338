//! Forwarding pipeline
//!
//! Builds the outbound request for a selected backend, optionally routes it
//! through the backend's SOCKS5 intermediary, and relays the response back
//! to the client through the inspection tee. The backend URL is the
//! outbound target verbatim; the client's path and query are not appended.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::header::{HeaderMap, CONTENT_LENGTH, HOST};
use hyper::{Request, Response};
use tracing::{error, info};

use crate::ban::BanTable;
use crate::config::{Backend, BanRule};
use crate::error::{Result, ShuntError};
use crate::proxy::inspect::{InspectingBody, ResponseInspector};

/// Wall-clock deadline for the whole request/response exchange,
/// body included
const REQUEST_DEADLINE: Duration = Duration::from_secs(60);
/// Connect timeout and TCP keep-alive when dialing through SOCKS5
const SOCKS5_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKS5_KEEPALIVE: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Performs outbound requests and response relay
pub struct Forwarder {
    /// Shared client for backends without a SOCKS5 intermediary
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_DEADLINE)
            .build()
            .map_err(ShuntError::Upstream)?;
        Ok(Self { client })
    }

    /// Forward one request to the chosen backend.
    ///
    /// The returned response streams the backend body through the
    /// inspection tee; quarantine decisions happen when that stream ends.
    /// Errors map to 502 at the router and never ban the backend.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        backend: &Backend,
        rules: Arc<Vec<BanRule>>,
        bans: Arc<BanTable>,
    ) -> Result<Response<InspectingBody>>
    where
        B: hyper::body::Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let target = reqwest::Url::parse(&backend.url).map_err(|e| {
            error!(backend = %backend.url, "invalid backend URL: {}", e);
            ShuntError::InvalidBackendUrl(e.to_string())
        })?;

        let client = match &backend.socks5 {
            None => self.client.clone(),
            Some(addr) => socks5_client(addr, backend)?,
        };

        let (parts, body) = req.into_parts();
        info!(
            method = %parts.method,
            path = %parts.uri.path(),
            backend = %backend.url,
            "forwarding request"
        );

        let upstream = client
            .request(parts.method, target)
            .headers(outbound_headers(&parts.headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| {
                error!(backend = %backend.url, "request to backend failed: {}", e);
                ShuntError::Upstream(e)
            })?;

        let status = upstream.status();
        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if !is_hop_by_hop_header(name.as_str()) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }

        let inspector = ResponseInspector::new(backend.url.clone(), status, rules, bans);
        Ok(response.body(InspectingBody::new(upstream.bytes_stream(), inspector))?)
    }
}

/// Build a one-shot client dialing through the backend's SOCKS5
/// intermediary, with credentials when the descriptor carries them
fn socks5_client(addr: &str, backend: &Backend) -> Result<reqwest::Client> {
    let proxy_url = match (&backend.username, &backend.password) {
        (Some(user), Some(pass)) => format!("socks5://{}:{}@{}", user, pass, addr),
        _ => format!("socks5://{}", addr),
    };

    let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| {
        error!(socks5 = %addr, "failed to build SOCKS5 proxy: {}", e);
        ShuntError::Socks5Proxy(e.to_string())
    })?;

    reqwest::Client::builder()
        .proxy(proxy)
        .timeout(REQUEST_DEADLINE)
        .connect_timeout(SOCKS5_CONNECT_TIMEOUT)
        .tcp_keepalive(SOCKS5_KEEPALIVE)
        .build()
        .map_err(|e| ShuntError::Socks5Proxy(e.to_string()))
}

/// Clone the client headers for the outbound request.
///
/// `Host` is dropped so the client library derives it from the backend URL,
/// and `Content-Length` so the framing matches the streamed body.
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == HOST || name == CONTENT_LENGTH || is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
