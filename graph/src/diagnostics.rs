use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Structural problem; deployment cannot proceed.
    Error,
    /// A component or module broke a resolution rule; deployment is refused.
    Failure,
    /// Informational; never blocks deployment.
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Component or module name the diagnostic is about.
    pub target: String,
    /// Stable message key, e.g. `link.unresolved`.
    pub key: String,
    pub detail: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.key, self.target, self.detail)
    }
}

/// Append-only diagnostic buckets for one module or for the application root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContext {
    errors: Vec<Diagnostic>,
    failures: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl ValidationContext {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors.push(diagnostic),
            Severity::Failure => self.failures.push(diagnostic),
            Severity::Warning => self.warnings.push(diagnostic),
        }
    }

    pub fn error(&mut self, target: impl Into<String>, key: &str, detail: impl Into<String>) {
        self.push(diagnostic(Severity::Error, target, key, detail));
    }

    pub fn fail(&mut self, target: impl Into<String>, key: &str, detail: impl Into<String>) {
        self.push(diagnostic(Severity::Failure, target, key, detail));
    }

    pub fn warn(&mut self, target: impl Into<String>, key: &str, detail: impl Into<String>) {
        self.push(diagnostic(Severity::Warning, target, key, detail));
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn failures(&self) -> &[Diagnostic] {
        &self.failures
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// True if anything here refuses deployment.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || !self.failures.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.failures.is_empty() && self.warnings.is_empty()
    }
}

fn diagnostic(
    severity: Severity,
    target: impl Into<String>,
    key: &str,
    detail: impl Into<String>,
) -> Diagnostic {
    Diagnostic {
        severity,
        target: target.into(),
        key: key.to_string(),
        detail: detail.into(),
    }
}

/// All diagnostics of a graph, as three ordered lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub failures: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn extend(&mut self, context: &ValidationContext) {
        self.errors.extend_from_slice(context.errors());
        self.failures.extend_from_slice(context.failures());
        self.warnings.extend_from_slice(context.warnings());
    }

    pub fn is_deployable(&self) -> bool {
        self.errors.is_empty() && self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.errors
            .iter()
            .chain(&self.failures)
            .chain(&self.warnings)
    }

    pub fn with_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.iter().filter(move |d| d.key == key)
    }
}
