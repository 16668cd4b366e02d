//! Attempt - capture failures of work done outside the render path.
//!
//! Store notifications can arrive from deep inside a `dispatch` call. A
//! derivation failure there must not unwind through the store, so the
//! precalculation runs inside [`attempt`] and its failure is handed back as a
//! value for the next render to raise.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::ConnectError;

/// Outcome of one attempted computation.
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    Completed(T),
    Captured(ConnectError),
}

/// Run `f`, capturing both returned errors and panics.
///
/// Panics are converted to [`ConnectError::Panicked`] tagged with `method`
/// and `display_name`.
pub(crate) fn attempt<T>(
    method: &'static str,
    display_name: &str,
    f: impl FnOnce() -> Result<T, ConnectError>,
) -> Attempt<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Attempt::Completed(value),
        Ok(Err(error)) => Attempt::Captured(error),
        Err(payload) => Attempt::Captured(ConnectError::Panicked {
            method,
            display_name: display_name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed() {
        match attempt("map_state_to_props", "Connect(Test)", || Ok(7)) {
            Attempt::Completed(value) => assert_eq!(value, 7),
            Attempt::Captured(err) => panic!("unexpected: {err}"),
        }
    }

    #[test]
    fn test_error_is_captured() {
        let outcome: Attempt<bool> = attempt("map_state_to_props", "Connect(Test)", || {
            Err(ConnectError::MissingStore {
                display_name: "Connect(Test)".into(),
            })
        });
        assert!(matches!(outcome, Attempt::Captured(ConnectError::MissingStore { .. })));
    }

    #[test]
    fn test_panic_is_captured() {
        let outcome: Attempt<bool> =
            attempt("map_state_to_props", "Connect(Test)", || panic!("selector exploded"));
        match outcome {
            Attempt::Captured(ConnectError::Panicked { method, display_name, message }) => {
                assert_eq!(method, "map_state_to_props");
                assert_eq!(display_name, "Connect(Test)");
                assert_eq!(message, "selector exploded");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_each_attempt_is_independent() {
        let first: Attempt<i32> = attempt("m", "n", || panic!("first"));
        let second = attempt("m", "n", || Ok(2));
        assert!(matches!(first, Attempt::Captured(_)));
        assert!(matches!(second, Attempt::Completed(2)));
    }
}
