//! Binding keys, binding info and source locations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefixes that reflection adds when a type is rendered with `toString()`.
const TYPE_PREFIXES: [&str; 2] = ["interface ", "class "];

/// Strip a reflection prefix (`interface `, `class `) from a type name.
pub(crate) fn strip_type_prefix(bound_type: &str) -> &str {
    let trimmed = bound_type.trim();
    TYPE_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
        .trim()
}

fn strip_annotation_marker(annotation: &str) -> &str {
    let trimmed = annotation.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed)
}

/// Identifier of a binding: the bound type plus an optional annotation.
///
/// Keys are stored exactly as the snippet reported them. Equality for
/// lookups is normalized at comparison time: `interface X`, `class X` and
/// `X` name the same type, and `@A` and `A` name the same annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    #[serde(rename = "type")]
    pub bound_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl BindingKey {
    pub fn new(bound_type: impl Into<String>, annotation: Option<&str>) -> Self {
        Self {
            bound_type: bound_type.into(),
            annotation: annotation.map(str::to_string),
        }
    }

    /// Type name without reflection prefix.
    pub fn normalized_type(&self) -> &str {
        strip_type_prefix(&self.bound_type)
    }

    /// Annotation without the leading `@`; empty annotations count as none.
    pub fn normalized_annotation(&self) -> Option<&str> {
        self.annotation
            .as_deref()
            .map(strip_annotation_marker)
            .filter(|a| !a.is_empty())
    }

    /// Normalized equality.
    pub fn matches(&self, other: &BindingKey) -> bool {
        self.normalized_type() == other.normalized_type()
            && self.normalized_annotation() == other.normalized_annotation()
    }

    /// Textual variants a reflection-based inspector may have produced for
    /// the given query, in lookup order.
    pub fn variants(bound_type: &str, annotation: Option<&str>) -> Vec<BindingKey> {
        let bound_type = strip_type_prefix(bound_type);
        let types = [
            bound_type.to_string(),
            format!("interface {}", bound_type),
            format!("class {}", bound_type),
        ];

        let annotations: Vec<Option<String>> = match annotation
            .map(strip_annotation_marker)
            .filter(|a| !a.is_empty())
        {
            Some(a) => vec![Some(a.to_string()), Some(format!("@{}", a))],
            None => vec![None],
        };

        let mut variants = Vec::with_capacity(types.len() * annotations.len());
        for ty in &types {
            for annotation in &annotations {
                variants.push(BindingKey {
                    bound_type: ty.clone(),
                    annotation: annotation.clone(),
                });
            }
        }
        variants
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalized_annotation() {
            Some(annotation) => write!(f, "@{} {}", annotation, self.normalized_type()),
            None => f.write_str(self.normalized_type()),
        }
    }
}

/// One entry of an injector's binding table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    #[serde(flatten)]
    pub key: BindingKey,
    /// What the key is bound to (implementation class, instance, provider).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Raw source string, e.g. `com.acme.AppModule.configure(AppModule.java:12)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl BindingInfo {
    pub fn new(key: BindingKey) -> Self {
        Self {
            key,
            target: None,
            scope: None,
            source: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Where in source this binding was declared, if the snippet reported it.
    pub fn location(&self) -> Option<SourceLocation> {
        self.source.as_deref().and_then(SourceLocation::parse)
    }
}

/// Declaration site of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub class_name: String,
    pub method: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl SourceLocation {
    /// Parse a stack-frame style source string.
    ///
    /// Accepts `pkg.Class.method(File.java:42)`, `pkg.Class.method(Unknown Source)`
    /// and bare class names (optionally with a reflection prefix).
    pub fn parse(raw: &str) -> Option<SourceLocation> {
        let raw = strip_type_prefix(raw);
        if raw.is_empty() {
            return None;
        }

        let frame = raw
            .find('(')
            .filter(|_| raw.ends_with(')'))
            .map(|open| (&raw[..open], &raw[open + 1..raw.len() - 1]));

        let Some((qualified, inner)) = frame else {
            return Some(SourceLocation {
                class_name: raw.to_string(),
                method: None,
                file: None,
                line: None,
            });
        };

        let (class_name, method) = match qualified.rsplit_once('.') {
            Some((class_name, method)) => (class_name, Some(method.to_string())),
            None => (qualified, None),
        };

        let (file, line) = match inner.rsplit_once(':') {
            Some((file, line)) => match line.trim().parse::<u32>() {
                Ok(line) => (file, Some(line)),
                Err(_) => (inner, None),
            },
            None => (inner, None),
        };

        let file = Some(file.trim())
            .filter(|f| !f.is_empty() && !matches!(*f, "Unknown Source" | "Native Method"))
            .map(str::to_string);

        Some(SourceLocation {
            class_name: class_name.to_string(),
            method,
            file,
            line,
        })
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}", file, line),
            (Some(file), None) => f.write_str(file),
            _ => match &self.method {
                Some(method) => write!(f, "{}.{}", self.class_name, method),
                None => f.write_str(&self.class_name),
            },
        }
    }
}
