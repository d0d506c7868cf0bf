// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed identifiers.
//!
//! Every entity gets a newtype ID with a short type prefix so a bare ID in a
//! log line is self-describing (`run-…`, `tsk-…`). Generated IDs are
//! `{prefix}{nanoid(19)}`.

/// Returns a string slice truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

/// Define a newtype ID wrapper around `String` with a type prefix.
///
/// Generates `fresh()` for random ID generation, `from_string()`, `as_str()`,
/// `short()`, `Display`, `From<&str>/String`, `PartialEq<str>`, and
/// `Borrow<str>` so maps keyed by the ID can be queried with `&str`.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct RunId("run-");
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn fresh() -> Self {
                Self(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19)))
            }

            /// Wrap an existing string (parsing, deserialization, tests).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Truncated form for log lines and display names.
            pub fn short(&self, n: usize) -> &str {
                $crate::id::short(&self.0, n)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a run (one execution attempt of a task).
    pub struct RunId("run-");
}

define_id! {
    /// Unique identifier for a task definition.
    pub struct TaskId("tsk-");
}

define_id! {
    /// Unique identifier for a worker / task runtime.
    pub struct WorkerId("wkr-");
}

define_id! {
    /// Unique identifier for a background work item.
    pub struct WorkId("bgw-");
}

define_id! {
    /// Unique identifier for a finding.
    pub struct FindingId("fnd-");
}

define_id! {
    /// Unique identifier for an automation definition.
    pub struct AutomationId("aut-");
}

define_id! {
    /// Unique identifier for a project.
    pub struct ProjectId("prj-");
}

define_id! {
    /// Unique identifier for a repository.
    pub struct RepoId("rep-");
}

define_id! {
    /// Unique identifier for a workflow execution.
    pub struct WorkflowId("wfx-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
