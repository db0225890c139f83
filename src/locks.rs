//! Per-key serialization inside one process
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
pub(crate) struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// The lock shared by every caller working on `key`.
    pub(crate) fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_one_lock() {
        let locks = KeyLocks::default();

        let a = locks.slot("worker_1/2024-05-04/2024-05-10");
        let b = locks.slot("worker_1/2024-05-04/2024-05-10");
        let other = locks.slot("worker_2/2024-05-04/2024-05-10");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
