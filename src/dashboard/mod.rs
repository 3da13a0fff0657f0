//! Dashboard shell: which modules exist, what each one needs, when to load
//! it, and how a module's view is called.
//!
//! ```text
//!   render_tabs ──▶ cache hit? ──yes──────────────────────┐
//!                      │ no                               ▼
//!                      └──▶ worker thread: load_batch ──▶ ModuleView::render
//! ```

pub mod cache;
pub mod modules;
pub mod shell;
pub mod view;

pub use cache::DashboardCache;
pub use modules::{ModuleManifest, ModuleSpec};
pub use shell::{Dashboard, ModuleLoad, RenderReport, ShellError};
pub use view::{ModuleSummary, ModuleView, SummaryView};
