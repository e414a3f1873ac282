//! Follow command implementation.

use keeldb_core::{Log, LogConfig, Stream};
use keeldb_replication::{ReplicatorConfig, ReplicatorState, RetryConfig};
use serde_json::Value;
use std::path::Path;

/// Runs the follow command until Ctrl-C or until the replicator gives up.
pub fn run(path: &Path, master: &str, max_attempts: u32) -> Result<(), Box<dyn std::error::Error>> {
    let log: Log<Value> = Log::open_file(path, LogConfig::default())?;
    let stream = Stream::new(log);
    let publisher = stream.become_following()?;

    let retry = if max_attempts == 0 {
        RetryConfig::unlimited()
    } else {
        RetryConfig::new(max_attempts)
    };
    let config = ReplicatorConfig::new(master).with_retry(retry);
    println!("Following {} into {:?} from entry {}", master, path, stream.size());

    let runtime = tokio::runtime::Runtime::new()?;
    let state = runtime.block_on(async move {
        let replicator = keeldb_replication::Replicator::start(publisher, config)?;
        let mut state = replicator.watch_state();
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = state.wait_for(|s| matches!(s, ReplicatorState::Failed(_))) => {}
        }
        let final_state = replicator.state();
        drop(replicator.stop().await?);
        Ok::<_, Box<dyn std::error::Error>>(final_state)
    })?;

    println!("Stopped at {} entries, head {}us", stream.size(), stream.head());
    match state {
        ReplicatorState::Failed(message) => Err(message.into()),
        _ => Ok(()),
    }
}
