//! Namespace and table identifiers.
//!
//! Identifiers are dotted names (`analytics.events`). Each segment becomes a
//! directory below the warehouse root, so segments are restricted to names
//! that are safe as single path components.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{InvalidIdentifierSnafu, TableError, TableResult};
use crate::storage::layout;

fn validate_segment(ident: &str, segment: &str) -> TableResult<()> {
    ensure!(
        !segment.is_empty(),
        InvalidIdentifierSnafu {
            ident,
            reason: "empty name segment",
        }
    );
    ensure!(
        !segment.starts_with('_') && segment != "." && segment != "..",
        InvalidIdentifierSnafu {
            ident,
            reason: format!("segment {segment:?} is reserved"),
        }
    );
    ensure!(
        !segment.contains(['/', '\\']),
        InvalidIdentifierSnafu {
            ident,
            reason: format!("segment {segment:?} contains a path separator"),
        }
    );
    Ok(())
}

/// A possibly nested namespace such as `analytics` or `prod.analytics`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceIdent(Vec<String>);

impl NamespaceIdent {
    /// Build from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> TableResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let text = segments.join(".");
        ensure!(
            !segments.is_empty(),
            InvalidIdentifierSnafu {
                ident: text,
                reason: "namespace is empty",
            }
        );
        for segment in &segments {
            validate_segment(&text, segment)?;
        }
        Ok(Self(segments))
    }

    /// Namespace segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Directory of the namespace relative to the warehouse root.
    pub fn dir(&self) -> String {
        self.0.join("/")
    }

    pub(crate) fn marker_path(&self) -> String {
        layout::namespace_marker_path(&self.dir())
    }
}

impl FromStr for NamespaceIdent {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segments(s.split('.'))
    }
}

impl fmt::Display for NamespaceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A table name inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    namespace: NamespaceIdent,
    name: String,
}

impl TableIdent {
    /// Table `name` in `namespace`.
    pub fn new(namespace: NamespaceIdent, name: impl Into<String>) -> TableResult<Self> {
        let name = name.into();
        validate_segment(&format!("{namespace}.{name}"), &name)?;
        Ok(Self { namespace, name })
    }

    /// Parse `ns.table` or `outer.inner.table`. The last segment is the table
    /// name.
    pub fn parse(s: &str) -> TableResult<Self> {
        let (ns, name) = s.rsplit_once('.').context(InvalidIdentifierSnafu {
            ident: s,
            reason: "expected <namespace>.<table>",
        })?;
        Self::new(ns.parse()?, name)
    }

    /// Owning namespace.
    pub fn namespace(&self) -> &NamespaceIdent {
        &self.namespace
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table directory relative to the warehouse root.
    pub fn dir(&self) -> String {
        layout::join(&[&self.namespace.dir(), &self.name])
    }
}

impl FromStr for TableIdent {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_identifiers() {
        let ident = TableIdent::parse("prod.analytics.events").unwrap();
        assert_eq!(ident.namespace().segments(), ["prod", "analytics"]);
        assert_eq!(ident.name(), "events");
        assert_eq!(ident.dir(), "prod/analytics/events");
        assert_eq!(ident.to_string(), "prod.analytics.events");
        assert_eq!(ident.namespace().marker_path(), "prod/analytics/_namespace.json");
    }

    #[test]
    fn rejects_unsafe_segments() {
        for bad in ["events", "ns..t", "ns._pointer", "ns.a/b", ".t"] {
            let err = TableIdent::parse(bad).unwrap_err();
            assert!(
                matches!(err, TableError::InvalidIdentifier { .. }),
                "{bad}: {err:?}"
            );
        }
    }
}
