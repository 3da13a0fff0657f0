use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;

use super::modules::ModuleSpec;
use crate::data::model::ModuleDataset;

// ---------------------------------------------------------------------------
// Render contract
// ---------------------------------------------------------------------------

/// Renders one module's tab. Implementations live outside the shell; the
/// shell only guarantees a failing view never takes other tabs down.
pub trait ModuleView: Send + Sync {
    fn render(&self, module: &ModuleSpec, dataset: &ModuleDataset, show_details: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Summary view (CLI)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub kind: &'static str,
    pub nulls: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    pub loaded_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<ColumnSummary>,
}

/// What a module has loaded, and which of its required files are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub title: String,
    pub files: Vec<FileSummary>,
    pub missing: Vec<String>,
}

impl ModuleSummary {
    pub fn build(module: &ModuleSpec, dataset: &ModuleDataset, show_details: bool) -> Self {
        let mut files = Vec::new();
        let mut missing = Vec::new();
        for name in &module.files {
            let (Some(table), Some(loaded_at)) = (dataset.get(name), dataset.loaded_at(name)) else {
                missing.push(name.clone());
                continue;
            };
            let schema = if show_details {
                table
                    .columns()
                    .iter()
                    .map(|c| ColumnSummary {
                        name: c.name.clone(),
                        kind: c.kind.as_str(),
                        nulls: c.values.iter().filter(|v| v.is_null()).count(),
                    })
                    .collect()
            } else {
                Vec::new()
            };
            files.push(FileSummary {
                name: name.clone(),
                rows: table.num_rows(),
                columns: table.num_columns(),
                geometry: table.geometry_column().map(str::to_string),
                loaded_at: loaded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                schema,
            });
        }
        ModuleSummary {
            id: module.id.clone(),
            title: module.title.clone(),
            files,
            missing,
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {} ({}) ==", self.title, self.id);
        for file in &self.files {
            let geo = match &file.geometry {
                Some(column) => format!(" [geo: {column}]"),
                None => String::new(),
            };
            let _ = writeln!(
                out,
                "  {}: {} rows x {} cols{geo}, loaded {}",
                file.name, file.rows, file.columns, file.loaded_at
            );
            for col in &file.schema {
                let _ = writeln!(out, "      {:<32} {:<9} nulls={}", col.name, col.kind, col.nulls);
            }
        }
        for name in &self.missing {
            let _ = writeln!(out, "  {name}: not loaded");
        }
        out
    }
}

/// Prints a per-module summary to stdout, as text or one JSON object per module.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryView {
    pub json: bool,
}

impl SummaryView {
    pub fn new(json: bool) -> Self {
        SummaryView { json }
    }
}

impl ModuleView for SummaryView {
    fn render(&self, module: &ModuleSpec, dataset: &ModuleDataset, show_details: bool) -> Result<()> {
        let summary = ModuleSummary::build(module, dataset, show_details);
        if self.json {
            let line = serde_json::to_string(&summary)
                .with_context(|| format!("serializing summary of {}", module.id))?;
            println!("{line}");
        } else {
            print!("{}", summary.to_text());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;
    use crate::data::model::{Column, ColumnKind, LoadedTable, Table, Value};

    fn dataset() -> ModuleDataset {
        let table = Table::from_columns(vec![
            Column::new("n", ColumnKind::Int, vec![Value::Int(1), Value::Null]),
            Column::new("s", ColumnKind::Text, vec![Value::Text("a".into()), Value::Text("b".into())]),
        ])
        .unwrap();
        let mut ds = ModuleDataset::new();
        ds.insert(
            "a.csv",
            LoadedTable {
                table,
                loaded_at: Local::now(),
            },
        );
        ds
    }

    #[test]
    fn summary_lists_loaded_and_missing() {
        let module = ModuleSpec::new("m", "Module", &["a.csv", "b.parquet"]);
        let summary = ModuleSummary::build(&module, &dataset(), false);
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].rows, 2);
        assert!(summary.files[0].schema.is_empty());
        assert_eq!(summary.missing, vec!["b.parquet"]);

        let text = summary.to_text();
        assert!(text.contains("== Module (m) =="));
        assert!(text.contains("b.parquet: not loaded"));
    }

    #[test]
    fn details_add_schema() {
        let module = ModuleSpec::new("m", "Module", &["a.csv"]);
        let summary = ModuleSummary::build(&module, &dataset(), true);
        let schema = &summary.files[0].schema;
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0].kind, "int");
        assert_eq!(schema[0].nulls, 1);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["files"][0]["schema"][1]["name"], "s");
    }
}
