use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::net::TcpListener;

pub mod error;
pub mod executor;
pub mod paths;
pub mod protocol;
pub mod rules;
pub mod store;
pub mod types;

use crate::executor::Executor;
use crate::protocol::ConnectionHandler;
use crate::rules::regex_guard::RegexGuard;
use crate::rules::Ruleset;

/// Server configuration
#[derive(Clone)]
pub struct Config {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Project id served by the emulator
    pub project_id: String,
    /// Optional security-rules file enforced on every request
    pub rules_file: Option<PathBuf>,
    /// Idle timeout after which transaction ids expire
    pub txn_idle_timeout: Duration,
    /// Threshold above which slow regex evaluations are logged
    pub slow_regex_threshold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("invalid default bind address"),
            project_id: "demo-project".to_string(),
            rules_file: None,
            txn_idle_timeout: crate::store::DEFAULT_TXN_IDLE_TIMEOUT,
            slow_regex_threshold: crate::rules::regex_guard::DEFAULT_SLOW_THRESHOLD,
        }
    }
}

/// The emulator server
pub struct Server {
    config: Config,
    executor: Arc<Executor>,
    ruleset: Option<Arc<Ruleset>>,
}

impl Server {
    /// Create a new server with the given configuration
    ///
    /// Loads and strictly parses the rules file if one is configured;
    /// a syntax error fails startup.
    pub fn new(config: Config) -> error::Result<Self> {
        let executor = Arc::new(Executor::new(config.txn_idle_timeout));

        let ruleset = match &config.rules_file {
            Some(path) => {
                let source = std::fs::read_to_string(path)?;
                let ruleset = Ruleset::parse(&source)?
                    .with_guard(RegexGuard::new(config.slow_regex_threshold));
                info!("Loaded security rules from {:?}", path);
                Some(Arc::new(ruleset))
            }
            None => None,
        };

        Ok(Self { config, executor, ruleset })
    }

    /// The engine behind this server (used by tests)
    pub fn executor(&self) -> Arc<Executor> {
        Arc::clone(&self.executor)
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> error::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("MiniStore emulator listening on {}", self.config.bind_addr);
        info!("Serving project: {}", self.config.project_id);
        if self.ruleset.is_none() {
            info!("No rules file loaded; all requests are allowed");
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    // Disable Nagle on the accepted socket; small JSON
                    // responses otherwise get batched behind ~100ms delays.
                    if let Err(e) = stream.set_nodelay(true) {
                        error!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }

                    let executor = Arc::clone(&self.executor);
                    let ruleset = self.ruleset.clone();
                    let config = self.config.clone();

                    // Spawn a task to handle this connection
                    tokio::spawn(async move {
                        let handler = ConnectionHandler::new(stream, executor, ruleset, config);
                        if let Err(e) = handler.run().await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                        info!("Connection closed: {}", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
