//! TLS listener
//!
//! Terminates client TLS (minimum version 1.2) and hands each accepted
//! connection to the router, one task per connection.

use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::error::{Result, ShuntError};
use crate::proxy::router::Router;

/// TLS-terminating proxy listener
pub struct ProxyServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Arc<Router>,
}

impl ProxyServer {
    /// Load TLS material and bind the listener. Failure here is fatal to
    /// the process.
    pub async fn bind(
        addr: SocketAddr,
        cert_path: &Path,
        key_path: &Path,
        router: Arc<Router>,
    ) -> Result<Self> {
        let tls_config = load_tls_config(cert_path, key_path)?;
        let listener = TcpListener::bind(addr).await?;
        info!("proxy listening on https://{}", listener.local_addr()?);

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
            router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until the shutdown signal flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let acceptor = self.acceptor.clone();
                            let router = Arc::clone(&self.router);
                            tokio::spawn(async move {
                                if let Err(e) =
                                    Self::handle_connection(stream, acceptor, router).await
                                {
                                    debug!("connection from {} ended: {}", client_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection: TLS handshake, then HTTP service
    async fn handle_connection(
        stream: TcpStream,
        acceptor: TlsAcceptor,
        router: Arc<Router>,
    ) -> Result<()> {
        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(|e| ShuntError::Tls(e.to_string()))?;
        let io = TokioIo::new(tls_stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let router = Arc::clone(&router);
            async move { Ok::<_, Infallible>(router.handle(req).await) }
        });

        http1::Builder::new()
            .serve_connection(io, service)
            .await
            .map_err(|e| ShuntError::Connection(e.to_string()))?;

        Ok(())
    }
}

/// Build the rustls server config: TLS 1.2 minimum, certificate chain and
/// key from PEM files
fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(ShuntError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ShuntError::Tls(format!("no private key found in {}", key_path.display())))?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| ShuntError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ShuntError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban::BanTable;
    use crate::cert::ensure_cert;
    use crate::config::{Backend, RouteConfig};
    use crate::proxy::forward::Forwarder;
    use crate::test_utils::spawn_backend;
    use hyper::StatusCode;

    struct TempDir {
        path: std::path::PathBuf,
    }

    impl TempDir {
        fn new(label: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "shunt-server-{}-{}",
                label,
                std::process::id()
            ));
            let _ = std::fs::remove_dir_all(&path);
            std::fs::create_dir_all(&path).unwrap();
            Self { path }
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    #[tokio::test]
    async fn test_tls_round_trip_through_generated_cert() {
        let dir = TempDir::new("roundtrip");
        let cert = dir.path.join("server.crt");
        let key = dir.path.join("server.key");
        let (cert_path, key_path) = ensure_cert(
            Some(cert.to_str().unwrap()),
            Some(key.to_str().unwrap()),
        )
        .unwrap();

        let backend_addr = spawn_backend(StatusCode::OK, Vec::new(), "over tls").await;
        let router = Arc::new(Router::new(
            vec![RouteConfig {
                path: "/api".to_string(),
                strategy: "round-robin".to_string(),
                backends: vec![Backend {
                    url: format!("http://{}", backend_addr),
                    socks5: None,
                    username: None,
                    password: None,
                    weight: 0,
                }],
                rules: Vec::new(),
            }],
            Arc::new(BanTable::new()),
            Forwarder::new().unwrap(),
        ));

        let server = ProxyServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            &cert_path,
            &key_path,
            router,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(async move { server.run(shutdown_rx).await });

        // Self-signed certificate, so the test client skips verification.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let response = client
            .get(format!("https://127.0.0.1:{}/api", addr.port()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "over tls");

        let missing = client
            .get(format!("https://127.0.0.1:{}/other", addr.port()))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        shutdown_tx.send(true).unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_fails_without_cert_files() {
        let dir = TempDir::new("missing-cert");
        let router = Arc::new(Router::new(
            Vec::new(),
            Arc::new(BanTable::new()),
            Forwarder::new().unwrap(),
        ));

        let result = ProxyServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            &dir.path.join("absent.crt"),
            &dir.path.join("absent.key"),
            router,
        )
        .await;
        assert!(result.is_err());
    }
}
