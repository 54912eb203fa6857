// src/services/model/exclusive.rs
use std::sync::Arc;

use tokio::sync::Mutex;

use super::ModelError;

/// Runs `job` against the shared engine on the blocking pool.
///
/// The lock is taken with `lock_owned` before the job is spawned, so callers
/// are served one at a time in the order they asked for the engine.
pub async fn run_exclusive<E, T, F>(engine: &Arc<Mutex<E>>, job: F) -> Result<T, ModelError>
where
    E: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut E) -> Result<T, ModelError> + Send + 'static,
{
    let mut guard = engine.clone().lock_owned().await;

    tokio::task::spawn_blocking(move || job(&mut *guard))
        .await
        .map_err(|e| ModelError::Unavailable(e.to_string()))?
}
