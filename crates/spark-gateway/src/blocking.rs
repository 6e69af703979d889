use std::sync::Arc;

use anyhow::anyhow;
use spark_db::Store;

use crate::error::GatewayError;

/// Runs a blocking store operation on the blocking pool. Store calls are the
/// only places the gateway suspends besides socket I/O.
pub async fn call<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T, GatewayError>
where
    F: FnOnce(&dyn Store) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| GatewayError::Storage(anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(GatewayError::Storage)
}
