//! Validation report aggregation.
//!
//! A [`Report`] accumulates [`Message`]s in the order phases emit them and
//! derives severity counts and the pass/fail verdict. Check ids are stable
//! machine-readable codes (`OCF-003`, `OPF-004`, ...) shared between the
//! validator and the repair engine's fix log.

use core::fmt;

/// Severity of a single finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational only; never affects the verdict.
    Info,
    /// Best-practice or likely-problem finding.
    Warning,
    /// A spec violation.
    Error,
    /// Pipeline-aborting failure (unreadable archive, unparsable package).
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// One reported validation outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Stable check code.
    pub check_id: &'static str,
    /// Finding severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Archive path the finding applies to, when file-scoped.
    pub file: Option<String>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "{}({}): {} [{}]",
                self.severity, self.check_id, self.message, file
            ),
            None => write!(f, "{}({}): {}", self.severity, self.check_id, self.message),
        }
    }
}

/// Ordered collection of findings for one validation run.
#[derive(Clone, Debug, Default)]
pub struct Report {
    messages: Vec<Message>,
}

impl Report {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finding without file context.
    pub fn add(&mut self, severity: Severity, check_id: &'static str, message: impl Into<String>) {
        self.messages.push(Message {
            check_id,
            severity,
            message: message.into(),
            file: None,
        });
    }

    /// Append a finding scoped to an archive path.
    pub fn add_in_file(
        &mut self,
        severity: Severity,
        check_id: &'static str,
        message: impl Into<String>,
        file: impl Into<String>,
    ) {
        self.messages.push(Message {
            check_id,
            severity,
            message: message.into(),
            file: Some(file.into()),
        });
    }

    /// All findings in emission order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether any finding carries the given check id.
    pub fn has(&self, check_id: &str) -> bool {
        self.messages.iter().any(|m| m.check_id == check_id)
    }

    fn count(&self, severity: Severity) -> usize {
        self.messages
            .iter()
            .filter(|m| m.severity == severity)
            .count()
    }

    /// Number of Fatal findings.
    pub fn fatal_count(&self) -> usize {
        self.count(Severity::Fatal)
    }

    /// Number of Error findings.
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of Warning findings.
    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Number of Info findings.
    pub fn info_count(&self) -> usize {
        self.count(Severity::Info)
    }

    /// Verdict: no Fatal and no Error findings.
    pub fn is_valid(&self) -> bool {
        self.fatal_count() == 0 && self.error_count() == 0
    }
}
