use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Explicit per-user-id locks.
///
/// A user's own messages, the cart, and the activity monitor sweep all
/// read-modify-write the same record. Each such critical section acquires
/// the user's lock first, so the design stays correct under a multi-threaded
/// runtime instead of leaning on cooperative scheduling. Keys are independent;
/// there is no cross-user locking.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            map.entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
