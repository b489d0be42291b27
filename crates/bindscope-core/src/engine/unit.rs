//! Work units: immutable descriptions of one isolated computation.

use std::fmt;

use uuid::Uuid;

use crate::protocol::ResultKind;

/// Unique identity of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(Uuid);

impl UnitId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit_{}", self.0.simple())
    }
}

/// An entry point plus its positional arguments.
///
/// A work unit never changes after construction. Two units built from the
/// same entry point and arguments are still distinct: identity is the
/// [`UnitId`], so the engine can track each one separately.
#[derive(Debug)]
pub struct WorkUnit {
    id: UnitId,
    entry_point: String,
    arguments: Vec<String>,
    expects: ResultKind,
}

impl WorkUnit {
    pub fn new<I, S>(entry_point: impl Into<String>, arguments: I, expects: ResultKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: UnitId::new(),
            entry_point: entry_point.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            expects,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// The kind of result the owner of this unit can apply.
    pub fn expects(&self) -> ResultKind {
        self.expects
    }

    /// Whether a result of `kind` satisfies this unit. An error set is
    /// always an acceptable answer.
    pub fn accepts(&self, kind: ResultKind) -> bool {
        kind == self.expects || kind == ResultKind::Problems
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entry_point)?;
        for arg in &self.arguments {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_per_instance() {
        let a = WorkUnit::new("snippets.Echo", ["x"], ResultKind::Bindings);
        let b = WorkUnit::new("snippets.Echo", ["x"], ResultKind::Bindings);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.arguments(), b.arguments());
    }

    #[test]
    fn test_accepts() {
        let unit = WorkUnit::new("snippets.Ctx", Vec::<String>::new(), ResultKind::Bindings);
        assert!(unit.accepts(ResultKind::Bindings));
        assert!(unit.accepts(ResultKind::Problems));
        assert!(!unit.accepts(ResultKind::Constructors));
    }

    #[test]
    fn test_display() {
        let unit = WorkUnit::new("snippets.Module", ["com.acme.M", "a"], ResultKind::Constructors);
        assert_eq!(unit.to_string(), "snippets.Module com.acme.M a");
        assert!(unit.id().to_string().starts_with("unit_"));
    }
}
