//! Error types for spark-connect.

use thiserror::Error;

/// Errors surfaced by a connected component.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Neither an explicit store nor an ambient provider was available.
    #[error(
        "Could not find a store in either the context or props of \"{display_name}\". \
         Either wrap the root component in a store provider, \
         or explicitly pass a store to \"{display_name}\"."
    )]
    MissingStore { display_name: String },

    #[error(
        "To access the wrapped instance of \"{display_name}\", you need to enable \
         `with_ref` in the options passed to connect()."
    )]
    WrappedInstanceDisabled { display_name: String },

    /// A user-supplied derivation function returned an error.
    #[error("{method}() in {display_name} failed: {source}")]
    Derive {
        method: &'static str,
        display_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A user-supplied derivation function panicked off the render path.
    #[error("{method}() in {display_name} panicked: {message}")]
    Panicked {
        method: &'static str,
        display_name: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ConnectError>;
