use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::data::model::ModuleDataset;

/// Per-session results, one entry per module id.
///
/// An entry holds both the tables and their load timestamps, so a module is
/// either fully cached or not at all.
#[derive(Debug, Default)]
pub struct DashboardCache {
    entries: Mutex<BTreeMap<String, Arc<ModuleDataset>>>,
}

impl DashboardCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-written entry, so a
    // poisoned map is still usable.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<ModuleDataset>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, module: &str) -> Option<Arc<ModuleDataset>> {
        self.lock().get(module).cloned()
    }

    pub fn contains(&self, module: &str) -> bool {
        self.lock().contains_key(module)
    }

    pub fn insert(&self, module: &str, dataset: Arc<ModuleDataset>) {
        self.lock().insert(module.to_string(), dataset);
    }

    /// Drop one module so its next access reloads. Returns whether it was cached.
    pub fn invalidate(&self, module: &str) -> bool {
        self.lock().remove(module).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn modules(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
