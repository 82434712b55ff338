//! Response inspection tee
//!
//! Relays the backend body to the client unaltered while capturing a small
//! prefix for quarantine-rule matching. Inspection runs exactly once, after
//! the relay ends (normally, on a relay error, or when the client drops
//! the connection mid-stream), and never alters the current response.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use hyper::body::{Body, Frame};
use hyper::StatusCode;
use tracing::{info, warn};

use crate::ban::BanTable;
use crate::config::BanRule;
use crate::error::ShuntError;

/// How much of the response body is buffered for rule matching
pub const BODY_INSPECT_LIMIT: usize = 200;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, BoxError>> + Send>>;

/// Collects the response projections and decides a quarantine once the
/// relay is over
#[derive(Debug)]
pub struct ResponseInspector {
    backend_url: String,
    status_code: String,
    status_text: String,
    rules: Arc<Vec<BanRule>>,
    bans: Arc<BanTable>,
    buffer: Vec<u8>,
    finished: bool,
}

impl ResponseInspector {
    pub fn new(
        backend_url: String,
        status: StatusCode,
        rules: Arc<Vec<BanRule>>,
        bans: Arc<BanTable>,
    ) -> Self {
        let status_text = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        )
        .to_lowercase();

        Self {
            backend_url,
            status_code: status.as_u16().to_string(),
            status_text,
            rules,
            bans,
            buffer: Vec::with_capacity(BODY_INSPECT_LIMIT),
            finished: false,
        }
    }

    /// Capture up to the inspection limit; bytes past it are ignored
    fn observe(&mut self, chunk: &[u8]) {
        let remaining = BODY_INSPECT_LIMIT.saturating_sub(self.buffer.len());
        if remaining > 0 {
            self.buffer.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
        }
    }

    /// Evaluate the rules over the three projections and ban on the first
    /// hit. Idempotent: later calls are no-ops.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let body = String::from_utf8_lossy(&self.buffer).to_lowercase();
        for rule in self.rules.iter() {
            let token = rule.token.to_lowercase();
            if token == self.status_code
                || self.status_text.contains(&token)
                || body.contains(&token)
            {
                info!(
                    backend = %self.backend_url,
                    token = %rule.token,
                    duration_secs = rule.duration.as_secs(),
                    status = %self.status_code,
                    "quarantining backend"
                );
                self.bans.ban(&self.backend_url, rule.duration);
                return;
            }
        }
    }
}

/// Body that forwards backend bytes to the client while feeding the
/// inspector. The relay path pays only the cost of the prefix copy.
pub struct InspectingBody {
    stream: ByteStream,
    inspector: ResponseInspector,
}

impl std::fmt::Debug for InspectingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectingBody")
            .field("inspector", &self.inspector)
            .finish()
    }
}

impl InspectingBody {
    pub fn new<S, E>(stream: S, inspector: ResponseInspector) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            stream: Box::pin(stream.map(|chunk| chunk.map_err(Into::into))),
            inspector,
        }
    }
}

impl Body for InspectingBody {
    type Data = Bytes;
    type Error = ShuntError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.stream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.inspector.observe(&chunk);
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(Some(Err(e))) => {
                // The client stream is already broken; inspect whatever
                // made it into the buffer.
                warn!(backend = %this.inspector.backend_url, "response relay failed: {}", e);
                this.inspector.finish();
                Poll::Ready(Some(Err(ShuntError::Relay(e.to_string()))))
            }
            Poll::Ready(None) => {
                this.inspector.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for InspectingBody {
    // Covers client disconnect mid-stream: inspection proceeds over the
    // partial buffer.
    fn drop(&mut self) {
        self.inspector.finish();
    }
}
