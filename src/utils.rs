//utils for graceful shutdown of the partitioner and the simulation
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Token cancelled on ctrl-c. Must be called from inside a tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    //spawn once to listen for ctrl-c
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                tc.cancel();
            }
            Err(e) => warn!(error = %e, "failed to install ctrl-c handler"),
        }
    });
    token
}
