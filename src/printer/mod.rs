//! Printers: JSON outcome on stdout, coloured failure summary on stderr.

use std::io::{self, Write};

use anyhow::Result;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::execution::ExecutionOutcome;

pub struct JsonPrinter {
    pub pretty: bool,
}

impl JsonPrinter {
    pub fn render<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(text)
    }

    pub fn print<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = self.render(value)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{text}")?;
        stdout.flush()?;
        Ok(())
    }
}

/// One-line summary of a failed outcome, for humans watching a terminal.
pub struct SummaryPrinter {
    pub color: bool,
}

impl Default for SummaryPrinter {
    fn default() -> Self {
        Self { color: io::stderr().is_terminal() }
    }
}

impl SummaryPrinter {
    pub fn summary(&self, outcome: &ExecutionOutcome) -> Option<String> {
        let err = outcome.error()?;
        let label = format!("[{}]", err.kind());
        Some(if self.color {
            format!("{} {}", label.red().bold(), err.yellow())
        } else {
            format!("{label} {err}")
        })
    }

    /// Only writes when stderr is a terminal, so piped logs stay clean.
    pub fn print(&self, outcome: &ExecutionOutcome) {
        if !self.color {
            return;
        }
        if let Some(line) = self.summary(outcome) {
            eprintln!("{line}");
        }
    }
}
