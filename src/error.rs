use std::fmt;

use thiserror::Error;

/// Why a single source attempt in the loader chain failed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceUnavailable,
    SchemaMismatch,
    InvalidInput,
    Delivery,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::SourceUnavailable => "source unavailable",
            ErrorKind::SchemaMismatch => "schema mismatch",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Delivery => "delivery failed",
        };
        f.write_str(label)
    }
}

/// Result of a component call. Nothing here is fatal; callers decide how a
/// view degrades on `Empty` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Empty(String),
    Error { kind: ErrorKind, detail: String },
}

impl<T> Outcome<T> {
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Outcome::Error {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Empty(reason) => Outcome::Empty(reason),
            Outcome::Error { kind, detail } => Outcome::Error { kind, detail },
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => f(value),
            Outcome::Empty(reason) => Outcome::Empty(reason),
            Outcome::Error { kind, detail } => Outcome::Error { kind, detail },
        }
    }

    /// Human-readable reason for anything other than `Ok`.
    pub fn reason(&self) -> Option<String> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Empty(reason) => Some(reason.clone()),
            Outcome::Error { kind, detail } => Some(format!("{kind}: {detail}")),
        }
    }
}

impl<T: Default> Outcome<T> {
    pub fn unwrap_or_default(self) -> T {
        match self {
            Outcome::Ok(value) => value,
            _ => T::default(),
        }
    }
}
