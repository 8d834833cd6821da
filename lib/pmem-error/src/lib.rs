//! Error plumbing shared by the planner's binaries and configuration layer.
//!
//! The planning library itself reports typed errors. Anything sitting at the edges (reading snapshot files, loading
//! configuration, wiring collaborators together) only needs a catch-all error that carries a chain of context, which
//! is what [`GenericError`] provides.
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// A catch-all error carrying an optional chain of context.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments, or an existing value implementing `Debug` and `Display`.
/// When given a value implementing `std::error::Error`, that value's source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

// Named differently from `anyhow::Context` so it can be imported alongside `snafu::ResultExt` without the methods
// colliding.
/// Extension methods for attaching context to fallible results.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with the given context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with context that is only built if an error actually occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}
