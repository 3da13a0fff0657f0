use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use thiserror::Error;

use super::cache::DashboardCache;
use super::modules::{ModuleManifest, ModuleSpec};
use super::view::ModuleView;
use crate::data::batch::{load_batch, LogProgress};
use crate::data::diagnostics::{panic_message, Diagnostics, Stage};
use crate::data::model::ModuleDataset;
use crate::store::ObjectStore;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("could not start loader thread for '{module}': {source}")]
    Spawn {
        module: String,
        source: std::io::Error,
    },
}

/// A module's data as handed to its view.
#[derive(Debug)]
pub struct ModuleLoad {
    pub dataset: Arc<ModuleDataset>,
    pub diagnostics: Diagnostics,
    pub from_cache: bool,
}

/// What happened to one tab.
#[derive(Debug)]
pub struct RenderReport {
    pub module: String,
    pub rendered: bool,
    pub from_cache: bool,
    pub diagnostics: Diagnostics,
}

impl RenderReport {
    fn skipped(module: &str, diagnostics: Diagnostics) -> Self {
        RenderReport {
            module: module.to_string(),
            rendered: false,
            from_cache: false,
            diagnostics,
        }
    }
}

// ---------------------------------------------------------------------------
// Dashboard shell
// ---------------------------------------------------------------------------

/// Tabs over one bucket: loads each module at most once, then hands the
/// dataset to that module's view. Callers may share it across threads; a
/// module being loaded blocks other requests for it until the load is done.
pub struct Dashboard {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    manifest: ModuleManifest,
    cache: DashboardCache,
    loading: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
    views: BTreeMap<String, Arc<dyn ModuleView>>,
    default_view: Option<Arc<dyn ModuleView>>,
}

impl Dashboard {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, manifest: ModuleManifest) -> Self {
        Dashboard {
            store,
            bucket: bucket.into(),
            manifest,
            cache: DashboardCache::new(),
            loading: Mutex::new(BTreeMap::new()),
            views: BTreeMap::new(),
            default_view: None,
        }
    }

    /// Register the view for one module id.
    pub fn with_view(mut self, module: &str, view: Arc<dyn ModuleView>) -> Self {
        self.views.insert(module.to_string(), view);
        self
    }

    /// View used by modules without their own.
    pub fn with_default_view(mut self, view: Arc<dyn ModuleView>) -> Self {
        self.default_view = Some(view);
        self
    }

    pub fn cache(&self) -> &DashboardCache {
        &self.cache
    }

    /// Cached dataset for `module`, loading it on a worker thread first if
    /// needed. The caller blocks until that worker is done.
    pub fn dataset(&self, module: &str) -> Result<ModuleLoad, ShellError> {
        let spec = self
            .manifest
            .get(module)
            .ok_or_else(|| ShellError::UnknownModule(module.to_string()))?;

        if let Some(hit) = self.cached(module) {
            return Ok(hit);
        }
        let guard = self.load_guard(module);
        let _loading = guard.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished loading while we waited.
        if let Some(hit) = self.cached(module) {
            return Ok(hit);
        }

        let mut diagnostics = Diagnostics::new();
        let dataset = if spec.files.is_empty() {
            Arc::new(ModuleDataset::new())
        } else {
            match self.load_on_worker(spec)? {
                Ok((dataset, loaded)) => {
                    diagnostics.extend(loaded);
                    Arc::new(dataset)
                }
                Err(message) => {
                    // Not cached: the next access retries.
                    diagnostics.error(Stage::Fetch, None, message);
                    return Ok(ModuleLoad {
                        dataset: Arc::new(ModuleDataset::new()),
                        diagnostics,
                        from_cache: false,
                    });
                }
            }
        };

        self.cache.insert(module, Arc::clone(&dataset));
        Ok(ModuleLoad {
            dataset,
            diagnostics,
            from_cache: false,
        })
    }

    fn cached(&self, module: &str) -> Option<ModuleLoad> {
        let dataset = self.cache.get(module)?;
        log::debug!("{module}: served from cache");
        Some(ModuleLoad {
            dataset,
            diagnostics: Diagnostics::new(),
            from_cache: true,
        })
    }

    fn load_guard(&self, module: &str) -> Arc<Mutex<()>> {
        let mut guards = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guards.entry(module.to_string()).or_default())
    }

    /// Runs one batch for `spec` on a named thread and waits for it. The inner
    /// `Err` carries the message of a worker panic.
    fn load_on_worker(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Result<(ModuleDataset, Diagnostics), String>, ShellError> {
        let store = Arc::clone(&self.store);
        let bucket = self.bucket.clone();
        let id = spec.id.clone();
        let files = spec.files.clone();
        let required = self.manifest.required_for(&spec.id).unwrap_or_default();

        let handle = thread::Builder::new()
            .name(format!("load-{}", spec.id))
            .spawn(move || {
                let mut progress = LogProgress::new(id.as_str());
                let outcome = load_batch(store.as_ref(), &bucket, &required, &mut progress);
                let dataset = outcome.dataset.restricted_to(files.iter().map(String::as_str));
                (dataset, outcome.diagnostics)
            })
            .map_err(|source| ShellError::Spawn {
                module: spec.id.clone(),
                source,
            })?;

        Ok(handle.join().map_err(|panic| {
            format!(
                "loading module {} failed: {}",
                spec.id,
                panic_message(&*panic)
            )
        }))
    }

    /// Forget a module's data; its next access reloads from the store.
    pub fn invalidate(&self, module: &str) -> bool {
        self.cache.invalidate(module)
    }

    /// Load (or reuse) `module` and render it with `view`. Errors and panics
    /// from the view are recorded, never propagated.
    pub fn render_module(
        &self,
        module: &str,
        view: &dyn ModuleView,
        show_details: bool,
    ) -> Result<RenderReport, ShellError> {
        let spec = self
            .manifest
            .get(module)
            .ok_or_else(|| ShellError::UnknownModule(module.to_string()))?;
        let ModuleLoad {
            dataset,
            mut diagnostics,
            from_cache,
        } = self.dataset(module)?;

        let result = catch_unwind(AssertUnwindSafe(|| view.render(spec, &dataset, show_details)));
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(panic) => Some(format!("view panicked: {}", panic_message(&*panic))),
        };
        if let Some(reason) = &failure {
            diagnostics.error(
                Stage::Render,
                None,
                format!("error rendering dashboard {}: {reason}", spec.title),
            );
        }

        Ok(RenderReport {
            module: module.to_string(),
            rendered: failure.is_none(),
            from_cache,
            diagnostics,
        })
    }

    /// Render every module in tab order, or only those in `selection` when it
    /// is non-empty. One tab failing does not affect the others.
    pub fn render_tabs(&self, selection: &[String], show_details: bool) -> Vec<RenderReport> {
        let mut reports = Vec::new();
        for spec in &self.manifest.modules {
            if !selection.is_empty() && !selection.iter().any(|s| s == &spec.id) {
                continue;
            }
            let Some(view) = self.views.get(&spec.id).or(self.default_view.as_ref()) else {
                let mut diagnostics = Diagnostics::new();
                diagnostics.warn(
                    Stage::Render,
                    None,
                    format!("no view registered for module {}", spec.id),
                );
                reports.push(RenderReport::skipped(&spec.id, diagnostics));
                continue;
            };
            match self.render_module(&spec.id, view.as_ref(), show_details) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    let mut diagnostics = Diagnostics::new();
                    diagnostics.error(Stage::Render, None, e.to_string());
                    reports.push(RenderReport::skipped(&spec.id, diagnostics));
                }
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use anyhow::bail;

    use super::*;
    use crate::store::MemoryStore;

    fn manifest() -> ModuleManifest {
        ModuleManifest {
            modules: vec![
                ModuleSpec::new("ventas", "Ventas", &["v.csv"]),
                ModuleSpec::new("stock", "Stock", &["s.csv", "shared.txt"]),
            ],
        }
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_object("r", "v.csv", "n\n1\n")
                .with_object("r", "s.csv", "n\n2\n")
                .with_object("r", "shared.txt", "k;v\na;1\n")
                .with_object("r", "unused.csv", "n\n3\n"),
        )
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ModuleView for Recording {
        fn render(&self, module: &ModuleSpec, dataset: &ModuleDataset, _: bool) -> anyhow::Result<()> {
            let names = dataset.names().map(str::to_string).collect();
            self.seen.lock().unwrap().push((module.id.clone(), names));
            Ok(())
        }
    }

    struct Failing;

    impl ModuleView for Failing {
        fn render(&self, _: &ModuleSpec, _: &ModuleDataset, _: bool) -> anyhow::Result<()> {
            bail!("chart needs a column that is not there")
        }
    }

    struct Panicking;

    impl ModuleView for Panicking {
        fn render(&self, _: &ModuleSpec, _: &ModuleDataset, _: bool) -> anyhow::Result<()> {
            panic!("index out of bounds")
        }
    }

    #[test]
    fn module_sees_only_its_files() {
        let store = store();
        let dashboard = Dashboard::new(store.clone(), "r", manifest());
        let load = dashboard.dataset("stock").unwrap();
        assert!(!load.from_cache);
        assert_eq!(
            load.dataset.names().collect::<Vec<_>>(),
            vec!["s.csv", "shared.txt"]
        );
        assert!(!load.dataset.contains("unused.csv"));
        assert!(!load.dataset.contains("v.csv"));
    }

    #[test]
    fn concurrent_requests_load_a_module_once() {
        let store = store();
        let dashboard = Dashboard::new(store.clone(), "r", manifest());
        let barrier = Barrier::new(4);

        let loads: Vec<ModuleLoad> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        dashboard.dataset("stock").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(loads.iter().filter(|l| !l.from_cache).count(), 1);
        let fetched = store.fetched();
        assert_eq!(fetched.iter().filter(|f| f.as_str() == "s.csv").count(), 1);
        for load in &loads {
            assert_eq!(load.dataset.names().collect::<Vec<_>>(), vec!["s.csv", "shared.txt"]);
        }
    }

    #[test]
    fn second_access_hits_cache_until_invalidated() {
        let store = store();
        let dashboard = Dashboard::new(store.clone(), "r", manifest());

        dashboard.dataset("ventas").unwrap();
        let fetches = store.fetched().len();
        let again = dashboard.dataset("ventas").unwrap();
        assert!(again.from_cache);
        assert_eq!(store.fetched().len(), fetches);

        assert!(dashboard.invalidate("ventas"));
        let reloaded = dashboard.dataset("ventas").unwrap();
        assert!(!reloaded.from_cache);
        assert_eq!(store.fetched().len(), fetches * 2);
    }

    #[test]
    fn unknown_module_is_an_error() {
        let dashboard = Dashboard::new(store(), "r", manifest());
        assert!(matches!(
            dashboard.dataset("nope"),
            Err(ShellError::UnknownModule(_))
        ));
    }

    #[test]
    fn failing_view_does_not_stop_later_tabs() {
        let recording = Arc::new(Recording::default());
        let dashboard = Dashboard::new(store(), "r", manifest())
            .with_view("ventas", Arc::new(Failing))
            .with_view("stock", recording.clone());

        let reports = dashboard.render_tabs(&[], false);
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].rendered);
        let err = reports[0].diagnostics.errors().next().unwrap();
        assert_eq!(err.stage, Stage::Render);
        assert!(err.message.contains("Ventas"));
        assert!(reports[1].rendered);
        assert_eq!(recording.seen.lock().unwrap()[0].0, "stock");
    }

    #[test]
    fn panicking_view_is_contained() {
        let dashboard = Dashboard::new(store(), "r", manifest());
        let report = dashboard.render_module("ventas", &Panicking, false).unwrap();
        assert!(!report.rendered);
        assert!(report.diagnostics.errors().next().unwrap().message.contains("index out of bounds"));
        // Data stays cached even though the view failed.
        assert!(dashboard.cache().contains("ventas"));
    }

    #[test]
    fn modules_without_a_view_are_skipped_with_a_warning() {
        let dashboard = Dashboard::new(store(), "r", manifest());
        let reports = dashboard.render_tabs(&["stock".to_string()], false);
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].rendered);
        assert_eq!(reports[0].diagnostics.warnings().count(), 1);
        assert!(!dashboard.cache().contains("stock"));
    }

    struct ExplodingStore;

    impl ObjectStore for ExplodingStore {
        fn list_objects(&self, _: &str) -> Result<Vec<String>, crate::store::StoreError> {
            panic!("driver bug")
        }

        fn get_object(&self, _: &str, name: &str) -> Result<bytes::Bytes, crate::store::StoreError> {
            Err(crate::store::StoreError::NotFound(name.to_string()))
        }
    }

    #[test]
    fn worker_panic_is_reported_and_not_cached() {
        let dashboard = Dashboard::new(Arc::new(ExplodingStore), "r", manifest());
        let load = dashboard.dataset("ventas").unwrap();
        assert!(load.dataset.is_empty());
        assert!(load.diagnostics.errors().next().unwrap().message.contains("driver bug"));
        assert!(!dashboard.cache().contains("ventas"));
    }

    #[test]
    fn listing_failure_is_cached_as_empty() {
        let store = Arc::new(MemoryStore::new().with_failing_listing("r"));
        let dashboard = Dashboard::new(store, "r", manifest());
        let load = dashboard.dataset("ventas").unwrap();
        assert!(load.dataset.is_empty());
        assert_eq!(load.diagnostics.errors().count(), 1);
        assert!(dashboard.cache().contains("ventas"));
    }
}
