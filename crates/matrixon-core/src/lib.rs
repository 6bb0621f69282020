//! Matrixon Core Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//! Date: 2024-03-21
//!
//! Fundamental pieces of the SSO identity mapping: the assertion and
//! attribute types, configuration, the traits behind which the datastore,
//! login completion and error rendering live, and Matrix ID helpers.
//!
//! # Examples
//! ```rust
//! use matrixon_core::{Config, Result};
//!
//! fn example() -> Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod traits;
pub mod types;
pub mod utils;

pub use config::{Config, SamlConfig, ThreepidConfig, ThreepidConstraint, UserMappingProviderConfig};
pub use matrixon_common::{MappingError, MatrixonError, Result};
pub use traits::{AuthCompletion, ErrorReporter, IdentifierStore, InternalInfoClient};
pub use types::{
    AttributeRequirement, IdentityAssertion, InternalInfo, RegistrationOutcome,
    ResolvedIdentity, SsoRequest, UserAttributes,
};
