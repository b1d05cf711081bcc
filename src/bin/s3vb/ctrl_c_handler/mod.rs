// Cancels the reconciliation when Ctrl+C is received.

use s3vb_rs::ReconcileCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: ReconcileCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, cancelling reconciliation.");
                cancellation_token.cancel();
            }
        }
    })
}
