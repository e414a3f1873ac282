//! Serve command implementation.

use keeldb_core::{Log, LogConfig, Stream};
use keeldb_replication::{LogServer, ServerConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Runs the serve command until Ctrl-C.
///
/// The file is locked for the lifetime of the server, so the log only
/// changes through this process.
pub fn run(path: &Path, bind: SocketAddr, head_interval_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let log: Log<Value> = Log::open_file(path, LogConfig::default().create_dirs(false))?;
    let stream = Stream::new(log);
    let config = ServerConfig::new(bind).with_head_interval(Duration::from_millis(head_interval_ms));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = LogServer::bind(stream.clone(), config).await?;
        println!(
            "Serving {:?} ({} entries) on {}",
            path,
            stream.size(),
            server.url()
        );
        tokio::signal::ctrl_c().await?;
        server.shutdown().await?;
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    tracing::info!("server stopped");
    Ok(())
}
