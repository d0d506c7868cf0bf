// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative macros for reducing boilerplate.
//!
//! - [`simple_display!`] — `Display` impl mapping enum variants to string literals
//! - [`test_builder!`] — test-only builder with per-field defaults

/// Generate a `Display` impl that maps enum variants to string literals.
///
/// Unit variants match directly; data-carrying variants use `(..)` to ignore
/// fields.
///
/// ```ignore
/// crate::simple_display! {
///     MyEnum {
///         Foo => "foo",
///         Bar(..) => "bar",
///     }
/// }
/// ```
#[macro_export]
macro_rules! simple_display {
    ($enum:ty { $( $variant:ident $(( $($ignore:tt)* ))? => $str:expr ),+ $(,)? }) => {
        impl std::fmt::Display for $enum {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $( Self::$variant $(( $($ignore)* ))? => $str, )+
                })
            }
        }
    };
}

/// Generate a test builder for a struct.
///
/// Compiled only for tests or the `test-support` feature. Every listed field
/// gets a chainable setter taking `impl Into<T>`; fields not listed get the
/// given literal expression as their default. `build()` produces the target.
///
/// ```ignore
/// crate::test_builder! {
///     TaskBuilder => Task {
///         id: TaskId = TaskId::from_string("tsk-test"),
///         name: String = "review".to_string(),
///         enabled: bool = true,
///     }
/// }
/// ```
#[macro_export]
macro_rules! test_builder {
    (
        $builder:ident => $target:ident {
            $( $field:ident : $ty:ty = $default:expr ),+ $(,)?
        }
    ) => {
        #[cfg(any(test, feature = "test-support"))]
        pub struct $builder {
            $( $field: $ty, )+
        }

        #[cfg(any(test, feature = "test-support"))]
        impl Default for $builder {
            fn default() -> Self {
                Self { $( $field: $default, )+ }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $builder {
            $(
                pub fn $field(mut self, v: impl Into<$ty>) -> Self {
                    self.$field = v.into();
                    self
                }
            )+

            pub fn build(self) -> $target {
                $target { $( $field: self.$field, )+ }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $target {
            /// Create a builder with test defaults.
            pub fn builder() -> $builder {
                $builder::default()
            }
        }
    };
}
