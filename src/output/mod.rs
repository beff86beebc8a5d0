//! Report rendering and exit-code mapping.

mod exit;
mod json;
mod text;

pub use exit::exit_code;
pub use json::{JsonFormatter, JsonlFormatter};
pub use text::TextFormatter;

use std::io::{self, Write};
use std::str::FromStr;

use crate::types::ReviewResult;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Jsonl,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(format!(
                "unknown format '{}'. Valid values: text, json, jsonl",
                other
            )),
        }
    }
}

/// Renders a review result to a writer.
pub trait ReportFormatter {
    fn format(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()>;
}

/// Build the formatter for the selected output format.
pub fn create_formatter(format: OutputFormat, color: bool) -> Box<dyn ReportFormatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter::new(color)),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Jsonl => Box::new(JsonlFormatter),
    }
}
