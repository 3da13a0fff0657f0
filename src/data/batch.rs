use std::collections::{BTreeMap, BTreeSet};

use super::diagnostics::{Diagnostics, Stage};
use super::loader::{is_supported, parse};
use super::model::ModuleDataset;
use crate::store::ObjectStore;

/// Everything one batch produced. Always present, possibly empty.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub dataset: ModuleDataset,
    pub diagnostics: Diagnostics,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Optional per-file progress callback.
pub trait ProgressObserver {
    /// Called before fetching file `done` (1-based) of `total`.
    fn progress(&mut self, _done: usize, _total: usize, _name: &str) {}

    fn finish(&mut self) {}
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Logs each step at `debug`.
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        LogProgress { label: label.into() }
    }
}

impl ProgressObserver for LogProgress {
    fn progress(&mut self, done: usize, total: usize, name: &str) {
        let pct = done as f64 / total.max(1) as f64 * 100.0;
        log::debug!("[{}] {done}/{total} ({pct:.0}%) {name}", self.label);
    }

    fn finish(&mut self) {
        log::debug!("[{}] done", self.label);
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Final `/` component of an object name.
pub fn base_name(object_name: &str) -> &str {
    object_name.rsplit('/').next().unwrap_or(object_name)
}

/// List, filter by suffix, fetch and parse every supported object in `bucket`.
///
/// `required` maps module ids to the base names they need. It does not narrow
/// the fetch; callers restrict the result per module. Required files missing
/// from the listing are logged. Per-file failures become diagnostics; a
/// listing failure yields an empty dataset. Never fails.
pub fn load_batch(
    store: &dyn ObjectStore,
    bucket: &str,
    required: &BTreeMap<String, BTreeSet<String>>,
    progress: &mut dyn ProgressObserver,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    let listing = match store.list_objects(bucket) {
        Ok(names) => names,
        Err(e) => {
            outcome.diagnostics.error(
                Stage::List,
                None,
                format!("error listing bucket {bucket}: {e}"),
            );
            progress.finish();
            return outcome;
        }
    };

    let present: BTreeSet<&str> = listing.iter().map(|name| base_name(name)).collect();
    for (module, files) in required {
        for missing in files.iter().filter(|f| !present.contains(f.as_str())) {
            log::warn!("bucket {bucket}: {missing} (needed by {module}) is not in the listing");
        }
    }

    let selected: Vec<String> = listing
        .iter()
        .filter(|name| is_supported(name))
        .cloned()
        .collect();

    log::info!(
        "bucket {bucket}: {} object(s) selected for loading",
        selected.len()
    );

    let total = selected.len();
    for (index, name) in selected.iter().enumerate() {
        progress.progress(index + 1, total, name);

        let content = match store.get_object(bucket, name) {
            Ok(content) => content,
            Err(e) => {
                outcome.diagnostics.error(
                    Stage::Fetch,
                    Some(name),
                    format!("error fetching {name}: {e}"),
                );
                continue;
            }
        };

        let key = base_name(name);
        if let Some(loaded) = parse(key, content, &mut outcome.diagnostics) {
            log::debug!(
                "{key}: {} rows x {} columns",
                loaded.table.num_rows(),
                loaded.table.num_columns()
            );
            outcome.dataset.insert(key, loaded);
        }
    }

    progress.finish();
    outcome
}
