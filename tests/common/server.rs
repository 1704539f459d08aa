//! Test server lifecycle management

use super::constants::*;
use mcp_dispatch_server::config::{AppConfig, AuthMode, CliConfig};
use mcp_dispatch_server::mcp::auth::StaticGrant;
use mcp_dispatch_server::mcp::registry::CapabilityRegistry;
use mcp_dispatch_server::server::{make_app, metrics};
use mcp_dispatch_server::server::state::ServerState;
use mcp_dispatch_server::{McpService, RequestsLoggingLevel, ServerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// A running server on a random port, shut down on drop
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The service behind the server, for direct inspection
    pub service: Arc<McpService>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Default test configuration: static tokens, default rate limits
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::resolve(&CliConfig::default(), None).expect("Failed to resolve config");
    config.port = 0;
    config.logging_level = RequestsLoggingLevel::None;
    config.auth.mode = AuthMode::Static {
        tokens: vec![
            StaticGrant::new(ADMIN_TOKEN, ADMIN_IDENTITY, ["admin", "read"]),
            StaticGrant::new(USER_TOKEN, USER_IDENTITY, ["read"]),
        ],
    };
    config
}

impl TestServer {
    /// Spawns a server with the built-in capabilities and default config
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}, |_| {}).await
    }

    /// Spawns a server after adjusting the config and registering extra
    /// capabilities next to the built-ins.
    pub async fn spawn_with(
        configure: impl FnOnce(&mut AppConfig),
        register: impl FnOnce(&CapabilityRegistry),
    ) -> Self {
        let mut config = test_config();
        configure(&mut config);
        metrics::init_metrics();

        let service = McpService::init(&config, "test").expect("Failed to init service");
        service
            .register_builtins(&config)
            .expect("Failed to register built-ins");
        register(&service.registry);
        service.ready();
        let service = Arc::new(service);

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = make_app(ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port,
                metrics_enabled: true,
            },
            start_time: Instant::now(),
            service: service.clone(),
            version: "test".to_string(),
        });

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            service,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// Polls /health until the server answers
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!("Server did not become ready within {}ms", SERVER_READY_TIMEOUT_MS);
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await,
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
