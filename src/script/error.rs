use std::fmt;

use thiserror::Error;

/// A limit that stops a script no matter what it does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Time,
    Output,
    Steps,
    Memory,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Time => "execution time",
            Resource::Output => "output size",
            Resource::Steps => "step count",
            Resource::Memory => "memory",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Value,
    Index,
    Key,
    ZeroDivision,
    Overflow,
    ResourceExceeded(Resource),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Key => "KeyError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Overflow => "OverflowError",
            ErrorKind::ResourceExceeded(_) => "ResourceExceeded",
        };
        f.write_str(name)
    }
}

/// Fault raised while lexing, parsing or running a script.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), line: None }
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message).at(line)
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn resource(resource: Resource) -> Self {
        Self::new(
            ErrorKind::ResourceExceeded(resource),
            format!("{resource} limit exceeded"),
        )
    }

    /// Attach a line unless one is already set.
    pub fn at(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }

    pub fn resource_kind(&self) -> Option<Resource> {
        match self.kind {
            ErrorKind::ResourceExceeded(resource) => Some(resource),
            _ => None,
        }
    }
}
