// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::borrow::Borrow;
use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist,
    CircularDependency,
    CacheLookupFailed,
    MissingIntegralInput,
    UnknownDerivativeRule,
    InvalidValueId,
    BadTable,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            CircularDependency => "circular_dependency",
            CacheLookupFailed => "cache_lookup_failed",
            MissingIntegralInput => "missing_integral_input",
            UnknownDerivativeRule => "unknown_derivative_rule",
            InvalidValueId => "invalid_value_id",
            BadTable => "bad_table",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Model,
    Simulation,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Model => "ModelError",
            ErrorKind::Simulation => "SimulationError",
            ErrorKind::Variable => "VariableError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! eprintln(
    ($($arg:tt)*) => {{
        use std::io::Write;
        let r = writeln!(&mut ::std::io::stderr(), $($arg)*);
        r.expect("failed printing to stderr");
    }}
);

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Model,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

#[macro_export]
macro_rules! sim_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Simulation,
            ErrorCode::$code,
            Some($str),
        ))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Simulation, ErrorCode::$code, None))
    }};
}

/// Key identifying one variable value across the whole system.
///
/// The text format is load-bearing: it is used as the cache/registry key
/// and must round-trip exactly. Grammar:
///
/// ```text
/// ["constant"] scope-digits? ":" unqualified-name
/// ```
///
/// where `scope-digits` is a non-negative integer for locally scoped
/// variables (empty for global scope), and the name contains no
/// whitespace, `:`, `\`, `{` or `}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(String);

impl ValueId {
    /// Validate a candidate valueId against the grammar.
    pub fn is_valid(s: &str) -> bool {
        if s.len() <= 1 || s.ends_with(":_") {
            return false;
        }
        let rest = s.strip_prefix("constant").unwrap_or(s);
        let Some(colon) = rest.find(':') else {
            return false;
        };
        let (scope, name) = (&rest[..colon], &rest[colon + 1..]);
        if name.is_empty() || !scope.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        name.chars()
            .all(|c| !c.is_whitespace() && c != ':' && c != '\\' && c != '{' && c != '}')
    }

    pub fn parse(s: &str) -> Result<Self> {
        if Self::is_valid(s) {
            Ok(ValueId(s.to_owned()))
        } else {
            model_err!(InvalidValueId, s.to_owned())
        }
    }

    /// A variable scoped to group `scope`.
    pub fn scoped(scope: u32, name: &str) -> Result<Self> {
        Self::parse(&format!("{scope}:{name}"))
    }

    /// A globally scoped variable.
    pub fn global(name: &str) -> Result<Self> {
        Self::parse(&format!(":{name}"))
    }

    /// A literal constant, e.g. `constant:zero`.
    pub fn literal(name: &str) -> Result<Self> {
        Self::parse(&format!("constant:{name}"))
    }

    pub fn is_literal(&self) -> bool {
        self.0.starts_with("constant")
    }

    /// The scope qualifier, if locally scoped.
    pub fn scope(&self) -> Option<u32> {
        let rest = self.0.strip_prefix("constant").unwrap_or(&self.0);
        let digits = &rest[..rest.find(':').unwrap_or(0)];
        digits.parse().ok()
    }

    /// The unqualified name after the colon.
    pub fn name(&self) -> &str {
        let colon = self.0.find(':').unwrap_or(0);
        &self.0[colon + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ValueId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ValueId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_id_grammar() {
        assert!(ValueId::is_valid("3:cash"));
        assert!(ValueId::is_valid("constant:zero"));
        assert!(ValueId::is_valid(":gdp"));
        assert!(ValueId::is_valid("12:dx/dt"));
        assert!(ValueId::is_valid("3:_x"));

        assert!(!ValueId::is_valid(""));
        assert!(!ValueId::is_valid(":"));
        assert!(!ValueId::is_valid("3:"));
        assert!(!ValueId::is_valid("3:_"));
        assert!(!ValueId::is_valid("cash"));
        assert!(!ValueId::is_valid("a:cash"));
        assert!(!ValueId::is_valid("3:my money"));
        assert!(!ValueId::is_valid("3:a:b"));
        assert!(!ValueId::is_valid("3:{x}"));
    }

    #[test]
    fn test_value_id_parts() {
        let id = ValueId::scoped(3, "cash").unwrap();
        assert_eq!(id.as_str(), "3:cash");
        assert_eq!(id.scope(), Some(3));
        assert_eq!(id.name(), "cash");
        assert!(!id.is_literal());

        let id = ValueId::global("gdp").unwrap();
        assert_eq!(id.scope(), None);
        assert_eq!(id.name(), "gdp");

        let id = ValueId::literal("zero").unwrap();
        assert_eq!(id.as_str(), "constant:zero");
        assert!(id.is_literal());
        assert_eq!(id.name(), "zero");
    }

    #[test]
    fn test_error_display() {
        let err = Error::new(
            ErrorKind::Model,
            ErrorCode::CircularDependency,
            Some(":gdp".to_owned()),
        );
        assert_eq!(format!("{err}"), "ModelError{circular_dependency: :gdp}");

        let err = Error::new(ErrorKind::Simulation, ErrorCode::BadTable, None);
        assert_eq!(format!("{err}"), "SimulationError{bad_table}");
    }
}
