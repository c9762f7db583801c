//! Utilities for isolating application callbacks.
//!
//! Listener and endpoint callbacks are application code. A panic inside one
//! must not abort a listener fan-out or leave a connection half-closed, so the
//! core runs callbacks through [`guard_callback`], which converts both returned
//! errors and panics into a [`CallbackFailure`] suitable for logging.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Error type returned by application callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use duplexwire::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Failure raised by an application callback.
#[derive(Debug)]
pub enum CallbackFailure {
    /// The callback returned an error.
    Returned(CallbackError),
    /// The callback panicked.
    Panicked(PanicMessage),
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned(error) => write!(f, "{error}"),
            Self::Panicked(message) => write!(f, "panicked: {message}"),
        }
    }
}

impl std::error::Error for CallbackFailure {}

impl CallbackFailure {
    /// Convert the failure into a boxed error suitable for `on_error` callbacks.
    #[must_use]
    pub fn into_error(self) -> CallbackError {
        match self {
            Self::Returned(error) => error,
            Self::Panicked(message) => message.to_string().into(),
        }
    }
}

/// Run `callback`, converting returned errors and panics into a
/// [`CallbackFailure`].
///
/// # Errors
///
/// Returns the failure raised by the callback.
pub fn guard_callback<F>(callback: F) -> Result<(), CallbackFailure>
where
    F: FnOnce() -> Result<(), CallbackError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(CallbackFailure::Returned(error)),
        Err(panic) => Err(CallbackFailure::Panicked(format_panic(panic))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_errors_are_preserved() {
        let failure = guard_callback(|| Err("listener refused".into())).expect_err("must fail");
        assert!(matches!(failure, CallbackFailure::Returned(_)));
        assert_eq!(failure.to_string(), "listener refused");
    }

    #[test]
    fn panics_are_captured() {
        let failure = guard_callback(|| panic!("kaboom")).expect_err("must fail");
        assert_eq!(failure.to_string(), "panicked: kaboom");
        assert_eq!(failure.into_error().to_string(), "kaboom");
    }

    #[test]
    fn success_passes_through() { assert!(guard_callback(|| Ok(())).is_ok()); }
}
