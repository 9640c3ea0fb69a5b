//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::{json, Value};

use udt_core::{DatasetEvent, Sample, Summary};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a JSON document as-is, regardless of format
    pub fn print_value(&self, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", value),
        }
    }

    /// Print a single sample
    pub fn print_sample(&self, sample: &Sample) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:         {}", sample.id().unwrap_or("(none)"));
                println!(
                    "Annotated:  {}",
                    if sample.has_annotation() { "yes" } else { "no" }
                );
                for (key, value) in sample.as_map() {
                    if key == "_id" {
                        continue;
                    }
                    println!("{:<11} {}", format!("{}:", key), truncate(&value.to_string(), 60));
                }
            }
            OutputFormat::Json => {
                self.print_value(&sample.clone().into_value());
            }
            OutputFormat::Quiet => {
                println!("{}", sample.id().unwrap_or_default());
            }
        }
    }

    /// Print a summary as a sample list
    pub fn print_summary(&self, summary: &Summary) {
        match self.format {
            OutputFormat::Human => {
                if summary.is_empty() {
                    println!("No samples.");
                    return;
                }
                for (index, entry) in summary.samples.iter().enumerate() {
                    let marker = if entry.has_annotation { "x" } else { " " };
                    println!("{:>5} [{}] {}", index, marker, entry.id);
                }
                println!(
                    "\n{} sample(s), {} annotated",
                    summary.len(),
                    summary.annotated_count()
                );
            }
            OutputFormat::Json => {
                self.print_value(&json!(summary));
            }
            OutputFormat::Quiet => {
                for entry in &summary.samples {
                    println!("{}", entry.id);
                }
            }
        }
    }

    /// Print a dataset event
    pub fn print_event(&self, event: &DatasetEvent, summary: Option<&Summary>) {
        match self.format {
            OutputFormat::Human => match (event, summary) {
                (DatasetEvent::DatasetPropertyChanged { key }, _) => {
                    println!("{}: {}", event.name(), key)
                }
                (_, Some(summary)) => println!(
                    "{}: {} sample(s), {} annotated",
                    event.name(),
                    summary.len(),
                    summary.annotated_count()
                ),
                (_, None) => println!("{}", event.name()),
            },
            OutputFormat::Json => {
                let mut value = json!({"event": event.name()});
                if let DatasetEvent::DatasetPropertyChanged { key } = event {
                    value["key"] = json!(key);
                }
                if let Some(summary) = summary {
                    value["samples"] = json!(summary.len());
                    value["annotated"] = json!(summary.annotated_count());
                }
                println!("{}", value);
            }
            OutputFormat::Quiet => {
                println!("{}", event.name());
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max chars, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
