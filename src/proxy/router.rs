//! Request router
//!
//! Binds each configured path to its strategy, backend pool, and quarantine
//! rules, and dispatches incoming requests through the forwarding pipeline.
//! Every dispatch runs under a panic guard so one request's failure cannot
//! take down the listener or other in-flight requests.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::Full;
use hyper::body::{Body, Frame, SizeHint};
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error, warn};

use crate::ban::BanTable;
use crate::config::{BanRule, RouteConfig};
use crate::error::ShuntError;
use crate::proxy::forward::Forwarder;
use crate::proxy::inspect::InspectingBody;
use crate::proxy::strategy::{create_selector, BackendSelector, Strategy};

/// Response body: either a canned status message or a relayed backend body
pub enum ProxyBody {
    Full(Full<Bytes>),
    Inspected(InspectingBody),
}

impl Body for ProxyBody {
    type Data = Bytes;
    type Error = ShuntError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            ProxyBody::Full(body) => Pin::new(body)
                .poll_frame(cx)
                .map(|frame| frame.map(|res| res.map_err(|never| match never {}))),
            ProxyBody::Inspected(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ProxyBody::Full(body) => body.is_end_stream(),
            ProxyBody::Inspected(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ProxyBody::Full(body) => body.size_hint(),
            ProxyBody::Inspected(_) => SizeHint::default(),
        }
    }
}

/// One path binding
struct Route {
    strategy_tag: String,
    /// None when the configured tag is not a known strategy; the path then
    /// answers 503
    selector: Option<Arc<dyn BackendSelector>>,
    rules: Arc<Vec<BanRule>>,
}

/// Dispatch table from request path to strategy binding.
/// Built once at startup, read-only afterwards.
pub struct Router {
    routes: HashMap<String, Route>,
    forwarder: Forwarder,
    bans: Arc<BanTable>,
}

impl Router {
    pub fn new(configs: Vec<RouteConfig>, bans: Arc<BanTable>, forwarder: Forwarder) -> Self {
        let mut routes = HashMap::with_capacity(configs.len());
        for cfg in configs {
            let selector = match Strategy::from_str(&cfg.strategy) {
                Some(strategy) => {
                    let selector = create_selector(strategy, cfg.backends, Arc::clone(&bans));
                    debug!(
                        path = %cfg.path,
                        strategy = %strategy,
                        pool_size = selector.pool_size(),
                        rules = cfg.rules.len(),
                        "route bound"
                    );
                    Some(selector)
                }
                None => {
                    warn!(
                        path = %cfg.path,
                        strategy = %cfg.strategy,
                        "unsupported strategy, path will answer 503"
                    );
                    None
                }
            };
            routes.insert(
                cfg.path,
                Route {
                    strategy_tag: cfg.strategy,
                    selector,
                    rules: Arc::new(cfg.rules),
                },
            );
        }

        Self {
            routes,
            forwarder,
            bans,
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Dispatch one request; a panic inside the handler surfaces as 500
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();
        with_panic_guard(&path, self.dispatch(req)).await
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();
        let Some(route) = self.routes.get(&path) else {
            debug!(path = %path, "no route configured");
            return status_response(StatusCode::NOT_FOUND);
        };

        let Some(selector) = &route.selector else {
            let err = ShuntError::UnknownStrategy(route.strategy_tag.clone());
            warn!(path = %path, "{}", err);
            return status_response(err.status_code());
        };

        let backend = match selector.select() {
            Ok(backend) => backend,
            Err(e) => {
                warn!(
                    path = %path,
                    strategy = selector.strategy_name(),
                    "selection failed: {}",
                    e
                );
                return status_response(e.status_code());
            }
        };

        match self
            .forwarder
            .forward(req, &backend, Arc::clone(&route.rules), Arc::clone(&self.bans))
            .await
        {
            Ok(response) => response.map(ProxyBody::Inspected),
            Err(e) => status_response(e.status_code()),
        }
    }
}

/// Run a handler future, converting a panic into a logged 500
async fn with_panic_guard<F>(path: &str, handler: F) -> Response<ProxyBody>
where
    F: std::future::Future<Output = Response<ProxyBody>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(
                path = %path,
                "panic recovered in handler: {}",
                panic_message(panic.as_ref())
            );
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Proxy-origin response carrying the status's canonical reason as body
fn status_response(status: StatusCode) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(ProxyBody::Full(Full::new(Bytes::from(
            status.canonical_reason().unwrap_or_default(),
        ))))
        .unwrap()
}
