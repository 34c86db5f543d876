//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use nightfall_closer::CloseError;
use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    pub fn config_not_found(path: &Path) -> Self {
        Self::new(format!("Configuration file not found: {}", path.display()))
            .with_context("An explicit --config (or NIGHTFALL_CONFIG) must point to an existing file")
            .with_suggestions([
                "TRY: Write the defaults out and edit them: nightfall config > nightfall.toml"
                    .to_string(),
                format!("TRY: Check the path: ls -la {}", path.display()),
            ])
    }

    pub fn invalid_date(value: &str, reason: &str) -> Self {
        Self::new(format!("Invalid night date: {}", value))
            .with_context(reason.to_string())
            .with_suggestion("TRY: Use the YYYY_MM_DD form, e.g. --date 2020_01_17")
    }

    pub fn missing_night_summary(path: &Path) -> Self {
        Self::new(format!("Night summary not found: {}", path.display()))
            .with_context("The closer needs the night summary to know which runs were taken")
            .with_suggestions([
                "TRY: Close a night without data: nightfall close --reason \"bad weather\"",
                "TRY: Wait for the night summary to be produced and close again",
            ])
    }

    pub fn no_data_source() -> Self {
        Self::new("Nothing tells the closer what the night contains")
            .with_context("--no-night-summary was given without --reason")
            .with_suggestion("TRY: nightfall close --no-night-summary --reason \"no observations\"")
    }

    /// Operator-facing rendering of the closer errors that have an obvious fix.
    pub fn from_close_error(err: &CloseError) -> Option<Self> {
        match err {
            CloseError::MissingNightSummary(path) => Some(Self::missing_night_summary(path)),
            CloseError::UnexpectedState(_) => Some(Self::no_data_source()),
            CloseError::Reconcile(concepts) => Some(
                Self::new(format!("Could not promote files of: {}", concepts.join(", ")))
                    .with_context("The night stays open; files already promoted are kept")
                    .with_suggestion(
                        "TRY: Fix the destination permissions and close again; the pass resumes",
                    ),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}
