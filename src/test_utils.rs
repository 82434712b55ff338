//! Test utilities
//!
//! Shared helpers for unit tests: throwaway localhost backends and port
//! allocation.

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// Spawn a throwaway HTTP backend answering every request with a fixed
/// status, headers, and body. Returns its bound address.
pub async fn spawn_backend(
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: impl Into<Bytes>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local_addr failed");
    let body = body.into();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let headers = headers.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| {
                    let headers = headers.clone();
                    let body = body.clone();
                    async move {
                        let mut response = Response::builder().status(status);
                        for (name, value) in &headers {
                            response = response.header(name.as_str(), value.as_str());
                        }
                        response.body(Full::new(body))
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Pick a port that nothing is listening on
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    listener.local_addr().expect("local_addr failed").port()
}
