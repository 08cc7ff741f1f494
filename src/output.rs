//! Console output that happens outside the log stream.
//!
//! The startup banner and fatal startup errors are printed here because they
//! may occur before logging is available.

use colored::*;

/// Styled console output for startup and shutdown messages.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints an error message in red with an X mark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hooman::output::OutputFormatter;
    /// OutputFormatter::error("Cannot create destination directories");
    /// ```
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints an aligned `name: value` line.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hooman::output::OutputFormatter;
    /// OutputFormatter::field("Watching", "/srv/camera");
    /// ```
    pub fn field(name: &str, value: &str) {
        println!("  {:<12} {}", format!("{}:", name).cyan(), value);
    }
}
