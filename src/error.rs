use std::{error, fmt, io};

use crate::source::Loc;

/// Compilation errors, tagged with the phase that produced them.
///
/// Diagnostics are fatal: the first error aborts the translation. The
/// "expected X" style of probing used by the tokenizer and parser is not
/// represented here; those routines return `bool`/`Option` and backtrack.
#[derive(Debug)]
pub enum ErrorKind {
    Lex(String),
    Preprocess(String),
    Syntax(String),
    Semantic(String),
    Capacity(&'static str),
    Io(io::Error),
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub loc: Option<Loc>,
}

impl Error {
    pub fn lex(loc: Loc, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Lex(message.into()),
            loc: Some(loc),
        }
    }

    pub fn preprocess(loc: Loc, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Preprocess(message.into()),
            loc: Some(loc),
        }
    }

    pub fn syntax(loc: Loc, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Syntax(message.into()),
            loc: Some(loc),
        }
    }

    pub fn semantic(loc: Loc, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Semantic(message.into()),
            loc: Some(loc),
        }
    }

    pub fn capacity(what: &'static str) -> Self {
        Self {
            kind: ErrorKind::Capacity(what),
            loc: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.loc {
            write!(f, "{loc}: ")?;
        }
        match &self.kind {
            ErrorKind::Lex(m) => write!(f, "{m}"),
            ErrorKind::Preprocess(m) => write!(f, "{m}"),
            ErrorKind::Syntax(m) => write!(f, "{m}"),
            ErrorKind::Semantic(m) => write!(f, "{m}"),
            ErrorKind::Capacity(what) => write!(f, "capacity exceeded: {what}"),
            ErrorKind::Io(err) => write!(f, "{err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self {
            kind: ErrorKind::Io(err),
            loc: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
