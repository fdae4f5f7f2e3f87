//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use pong_service::{HttpServer, MetricsRegistry, ServiceConfig, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A service instance running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<MetricsRegistry>,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let registry = Arc::new(MetricsRegistry::new());
        registry.init().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let server = HttpServer::new(ServiceConfig::default(), registry.clone());
        let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

        Self {
            addr,
            registry,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Current value of an unlabelled series, read straight from the registry.
    pub fn metric(&self, series: &str) -> f64 {
        self.registry
            .get()
            .render()
            .lines()
            .find_map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(name), Some(value)) if name == series => value.parse().ok(),
                    _ => None,
                }
            })
            .unwrap_or(0.0)
    }

    /// Trigger shutdown and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle
            .await
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
