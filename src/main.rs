use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgmem::ops::StdioServer;
use kgmem::{Config, MemoryService, OperationResponse};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "kgmem", version, about = "Persistent knowledge-graph memory store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve line-delimited JSON requests on stdin/stdout (default)
    Serve,
    /// Run a single operation and print the response
    Call {
        /// Operation name, e.g. read_graph or create_entities
        operation: String,
        /// Parameters as a JSON object
        parameters: Option<String>,
    },
    /// Check that the graph document loads
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    // Logs go to stderr; stdout is reserved for responses
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.memory.log_level.as_str()),
    )
    .init();

    let service = MemoryService::from_config(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => StdioServer::new(service).run().await?,
        Command::Call {
            operation,
            parameters,
        } => run_call(&service, &operation, parameters).await?,
        Command::Verify => run_verify(&service)?,
    }

    Ok(())
}

/// Run one operation; exits non-zero when it fails.
async fn run_call(
    service: &MemoryService,
    operation: &str,
    parameters: Option<String>,
) -> Result<()> {
    let parameters: Value = match parameters {
        Some(raw) => serde_json::from_str(&raw).context("parameters must be valid JSON")?,
        None => Value::Null,
    };

    let response = match service.call(operation, parameters).await {
        Ok(result) => OperationResponse::Success { result },
        Err(e) => {
            let failure = OperationResponse::failure(&e, Some(operation));
            println!("{}", serde_json::to_string_pretty(&failure)?);
            anyhow::bail!("{} failed: {}", operation, e);
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_verify(service: &MemoryService) -> Result<()> {
    let path = service.file().path().display().to_string();
    let graph = service
        .file()
        .load()
        .with_context(|| format!("Failed to load graph document {}", path))?;
    let store = kgmem::GraphStore::from_graph(graph.clone());

    log::info!("Graph document: {}", path);
    log::info!("✓ {} entities, {} relations", store.entity_count(), store.relation_count());
    if store.into_graph() != graph {
        log::warn!("Document violates graph invariants; it will be repaired on the next write");
    } else {
        log::info!("✓ Graph invariants hold");
    }
    Ok(())
}
