use std::any::Any;
use std::fmt;

use serde::Serialize;

/// How bad a diagnostic is. Nothing here is ever fatal to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// Where in the load/render pipeline the diagnostic was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    List,
    Fetch,
    Decode,
    Render,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    pub file: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.file {
            Some(file) => write!(f, "{level}: {file}: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Structured event log returned next to load results. Every entry is also
/// forwarded to the `log` facade at the matching level.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, stage: Stage, file: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Warning, stage, file, message.into());
    }

    pub fn error(&mut self, stage: Stage, file: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Error, stage, file, message.into());
    }

    fn push(&mut self, severity: Severity, stage: Stage, file: Option<&str>, message: String) {
        let entry = Diagnostic {
            severity,
            stage,
            file: file.map(str::to_string),
            message,
        };
        match severity {
            Severity::Warning => log::warn!("{entry}"),
            Severity::Error => log::error!("{entry}"),
        }
        self.entries.push(entry);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
