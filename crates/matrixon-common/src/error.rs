//! Error types for Matrixon
//!
//! `MatrixonError` covers failures of the collaborators around the SSO
//! workflow (configuration, datastore, transport). `MappingError` covers the
//! ways turning an SSO assertion into a Matrix ID can fail; its `Display`
//! text is what gets rendered back to the user.

use std::io;

use ruma::IdParseError;
use thiserror::Error;

/// Why an SSO response could not be mapped to a Matrix ID
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The candidate localpart contains characters outside the allowed set
    #[error("localpart is invalid: {0}")]
    InvalidLocalpart(String),

    /// The mapping provider did not produce a localpart at all
    #[error("Error parsing SSO response: SSO mapping provider plugin did not return a localpart value")]
    EmptyLocalpart,

    /// `@localpart:server` would exceed the Matrix user ID length limit
    #[error("User ID may not be longer than 255 characters: {0}")]
    UserIdTooLong(String),

    /// Every candidate within the retry bound is already registered
    #[error("Unable to generate a Matrix ID from the SSO response")]
    Exhausted,

    /// A mandatory attribute is missing from the assertion
    #[error("'{0}' not in SAML2 response")]
    MissingAttribute(String),

    /// The mapping provider failed for a reason of its own
    #[error("Could not extract user attributes from SSO response.")]
    Provider(String),
}

/// Matrixon error types
#[derive(Debug, Error)]
pub enum MatrixonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// SSO mapping error
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for Matrixon operations
pub type Result<T> = std::result::Result<T, MatrixonError>;

impl From<serde_json::Error> for MatrixonError {
    fn from(err: serde_json::Error) -> Self {
        MatrixonError::Serialization(err.to_string())
    }
}

impl From<IdParseError> for MatrixonError {
    fn from(err: IdParseError) -> Self {
        MatrixonError::Validation(err.to_string())
    }
}
