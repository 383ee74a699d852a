//! MiniStore - A minimal Firestore-compatible document database emulator
//!
//! Serves the production REST surface for offline development and tests:
//! - batchGet / commit / beginTransaction / rollback, wire-compatible at
//!   the JSON level
//! - Atomic batched writes with preconditions and field transforms
//! - Optimistic-concurrency transactions with snapshot conflict detection
//! - A security-rules engine (lexer, parser, path matcher, evaluator)
//!   gating document access when a rules file is loaded
//!
//! Architecture Overview:
//!
//! ```text
//! Clients (SDKs, curl)
//!        |
//!        v
//! Protocol layer (HTTP framing, REST payloads, routing)
//!        |
//!        +--> Rules engine (lexer -> parser -> evaluator)
//!        |         consulted before every read/write
//!        v
//! Executor (commit coordinator, batchGet, transactions)
//!        |
//!        v
//! Document store (in-memory, single coarse engine lock)
//! ```

use std::path::PathBuf;

use log::info;

use ministore::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    // Parse command line arguments (simple)
    let args: Vec<String> = std::env::args().collect();

    let mut config = Config::default();

    // Simple argument parsing
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    let port: u16 = args[i + 1].parse()?;
                    config.bind_addr = format!("127.0.0.1:{}", port).parse()?;
                    i += 1;
                }
            }
            "--project" => {
                if i + 1 < args.len() {
                    config.project_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--rules" | "-r" => {
                if i + 1 < args.len() {
                    config.rules_file = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("MiniStore - A minimal Firestore-compatible emulator");
                println!();
                println!("Usage: ministore [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --port PORT       Port to listen on (default: 8080)");
                println!("      --project ID      Project id to serve (default: demo-project)");
                println!("  -r, --rules FILE      Security rules file to enforce");
                println!("  -h, --help            Show this help");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!("Starting MiniStore emulator...");

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
