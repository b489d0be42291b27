//! Result protocol for snippet processes.
//!
//! A snippet process writes diagnostic lines to stderr and then exactly one
//! result object to stdout. The engine only relies on that framing; the
//! encoding itself is owned by a [`ResultDecoder`]. [`JsonDecoder`] is the
//! default and understands objects tagged with a `kind` field:
//!
//! ```text
//! {"kind": "bindings", "bindings": [...], "problems": [...]}
//! {"kind": "constructors", "constructors": [["java.lang.String"]], "has_default_constructor": true}
//! {"kind": "problems", "problems": [...]}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{BindingInfo, ConstructorSignature, Problem};

/// Logical type of a snippet result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Binding table of an injector built from a module context.
    Bindings,
    /// Constructor signatures of a module class.
    Constructors,
    /// Error set reported by the snippet instead of a regular answer.
    Problems,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::Bindings => "bindings",
            ResultKind::Constructors => "constructors",
            ResultKind::Problems => "problems",
        };
        f.write_str(name)
    }
}

/// One result object produced by a snippet process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnippetResult {
    /// Injector was built; its bindings plus any non-fatal problems.
    Bindings {
        #[serde(default)]
        bindings: Vec<BindingInfo>,
        #[serde(default)]
        problems: Vec<Problem>,
    },

    /// Module class was introspected.
    Constructors {
        #[serde(default)]
        constructors: Vec<ConstructorSignature>,
        #[serde(default)]
        has_default_constructor: bool,
    },

    /// The snippet failed in user code (creation, configuration, ...).
    Problems { problems: Vec<Problem> },
}

impl SnippetResult {
    /// Logical kind of this result.
    pub fn kind(&self) -> ResultKind {
        match self {
            SnippetResult::Bindings { .. } => ResultKind::Bindings,
            SnippetResult::Constructors { .. } => ResultKind::Constructors,
            SnippetResult::Problems { .. } => ResultKind::Problems,
        }
    }

    /// Problems carried by this result, if any.
    pub fn problems(&self) -> &[Problem] {
        match self {
            SnippetResult::Bindings { problems, .. } | SnippetResult::Problems { problems } => {
                problems
            }
            SnippetResult::Constructors { .. } => &[],
        }
    }

    /// Encode the result the way [`JsonDecoder`] expects it.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Deserialization(format!("failed to encode result: {}", e)))
    }
}

/// Turns the raw stdout of a snippet process into a result object.
pub trait ResultDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<SnippetResult>;
}

/// JSON result decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl ResultDecoder for JsonDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SnippetResult> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Deserialization(format!("snippet output is not UTF-8: {}", e)))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Deserialization(
                "snippet exited without writing a result".to_string(),
            ));
        }

        serde_json::from_str(text)
            .map_err(|e| Error::Deserialization(format!("malformed snippet result: {}", e)))
    }
}
