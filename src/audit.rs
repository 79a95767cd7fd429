use std::fmt;

use chrono::{DateTime, Local};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Success,
    Info,
    Warning,
    Failure,
}

impl AuditLevel {
    fn tag(self) -> &'static str {
        match self {
            AuditLevel::Success => "OK",
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARN",
            AuditLevel::Failure => "FAIL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub at: DateTime<Local>,
    pub level: AuditLevel,
    pub message: String,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.level.tag(),
            self.message
        )
    }
}

/// Append-only event log owned by one session. Entries are never removed or
/// reordered.
#[derive(Debug, Clone)]
pub struct AuditLog {
    session_id: Uuid,
    entries: Vec<AuditEntry>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            entries: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn record(&mut self, level: AuditLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            AuditLevel::Success | AuditLevel::Info => {
                tracing::info!(session = %self.session_id, "{message}")
            }
            AuditLevel::Warning => tracing::warn!(session = %self.session_id, "{message}"),
            AuditLevel::Failure => tracing::error!(session = %self.session_id, "{message}"),
        }
        self.entries.push(AuditEntry {
            at: Local::now(),
            level,
            message,
        });
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.record(AuditLevel::Success, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(AuditLevel::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.record(AuditLevel::Warning, message);
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        self.record(AuditLevel::Failure, message);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, level: AuditLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// Entries recorded at or after `mark` (a previous `len()`).
    pub fn since(&self, mark: usize) -> &[AuditEntry] {
        &self.entries[mark.min(self.entries.len())..]
    }
}
