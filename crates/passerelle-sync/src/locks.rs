//! Per-portal serialization.
//!
//! Every mutation of a portal's metadata record (revision, membership,
//! last-sync) happens under that portal's exclusive lock: catch-up holds
//! it across the whole fetch-then-apply sequence, and live events for
//! the same room wait behind it.  Rooms never share a lock, so a slow
//! room cannot stall another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use passerelle_types::PortalKey;

/// Arena of one async mutex per portal key.
#[derive(Debug, Clone, Default)]
pub struct PortalLocks {
    inner: Arc<Mutex<HashMap<PortalKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PortalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive section for one portal.  The guard is owned
    /// so it can be held across awaits.
    pub async fn lock(&self, key: &PortalKey) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}
