//! 🩺 Connection health check: ping until the store answers or the policy gives up.

use tracing::{info, warn};

use crate::backends::{BulkClient, ClientBackend};
use crate::error::WriterError;
use crate::retry::RetryPolicy;

/// 📡 Ping the store under `policy`. Resolves on the first successful ping.
///
/// With an unbounded policy this only ever returns `Ok`. Eventually. Hopefully.
pub(crate) async fn await_connection(
    client: &ClientBackend,
    policy: &RetryPolicy,
) -> Result<(), WriterError> {
    let outcome = policy
        .run(|attempt| async move {
            info!("🩺 checking for connection (attempt {attempt})");
            client.ping().await.inspect_err(|err| {
                warn!("📡 health check attempt {attempt} failed: {err:#}");
            })
        })
        .await;

    match outcome {
        Ok(()) => {
            info!("✅ store is reachable");
            Ok(())
        }
        Err((attempts, err)) => Err(WriterError::ConnectionExhausted {
            attempts,
            last_error: format!("{err:#}"),
        }),
    }
}
