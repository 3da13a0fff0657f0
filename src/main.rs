use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use tablero::config::Args;
use tablero::dashboard::{Dashboard, RenderReport, SummaryView};
use tablero::data::diagnostics::Severity;

fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()) {
        Ok(reports) => {
            // Data problems are reported, not fatal; only a broken tab is.
            let failed = reports.iter().filter(|r| !r.rendered).count();
            if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<Vec<RenderReport>> {
    let manifest = args.load_manifest().context("loading module manifest")?;
    let store = args.build_store().context("connecting to object store")?;

    let dashboard = Dashboard::new(store, args.bucket.clone(), manifest)
        .with_default_view(Arc::new(SummaryView::new(args.json)));

    let reports = dashboard.render_tabs(&args.modules, args.details);
    for report in &reports {
        for diagnostic in report.diagnostics.entries() {
            let marker = match diagnostic.severity {
                Severity::Warning => "!",
                Severity::Error => "x",
            };
            eprintln!("[{}] {marker} {diagnostic}", report.module);
        }
    }
    Ok(reports)
}
