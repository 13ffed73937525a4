use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use shaver_db::Database;

use crate::error::ChatError;

/// Bounded-wait access to the database.
///
/// Every call runs on the blocking pool; if it does not finish within the
/// timeout the caller gets `Unavailable`. A write that already started may
/// still commit in the background.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    timeout: Duration,
}

impl Store {
    pub fn new(db: Arc<Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!("Store call exceeded {:?}", self.timeout);
                Err(ChatError::Unavailable)
            }
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                Err(ChatError::Internal(anyhow::anyhow!("store task failed: {}", e)))
            }
            Ok(Ok(result)) => result.map_err(ChatError::Internal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_calls_become_unavailable() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Store::new(db, Duration::from_millis(20));

        let res = store
            .call(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ChatError::Unavailable)));
    }

    #[tokio::test]
    async fn storage_errors_are_internal() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Store::new(db, Duration::from_secs(1));

        let res: Result<(), _> = store.call(|_| Err(anyhow::anyhow!("boom"))).await;
        assert!(matches!(res, Err(ChatError::Internal(_))));
    }
}
