use std::fmt;

use serde_json::{Map, Value};

/// Identifier or valve payload failed validation before anything was
/// persisted.
#[derive(Debug)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// A function with the same id already exists.
#[derive(Debug)]
pub struct DuplicateError(pub String);

impl fmt::Display for DuplicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function id already taken: {}", self.0)
    }
}

impl std::error::Error for DuplicateError {}

/// Missing function record, or the module declares no schema for the
/// requested valve tier.
#[derive(Debug)]
pub struct NotFoundError(pub String);

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not found: {}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadErrorKind {
    Syntax,
    Runtime,
    MissingEntryPoint,
}

impl LoadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadErrorKind::Syntax => "syntax",
            LoadErrorKind::Runtime => "runtime",
            LoadErrorKind::MissingEntryPoint => "missing-entry-point",
        }
    }
}

/// Compiling or executing submitted source failed. Frontmatter parsed
/// from the source before execution rides along so catalog listings can
/// still describe a broken function.
#[derive(Debug)]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub detail: String,
    pub frontmatter: Map<String, Value>,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            frontmatter: Map::new(),
        }
    }

    pub fn with_frontmatter(mut self, frontmatter: Map<String, Value>) -> Self {
        self.frontmatter = frontmatter;
        self
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LoadErrorKind::Syntax => write!(f, "syntax error: {}", self.detail),
            LoadErrorKind::Runtime => write!(f, "runtime error: {}", self.detail),
            LoadErrorKind::MissingEntryPoint => {
                write!(f, "no recognized entry point: {}", self.detail)
            }
        }
    }
}

impl std::error::Error for LoadError {}
