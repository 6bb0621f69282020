// =============================================================================
// Matrixon Matrix NextServer - SSO Identity Mapping Library
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Maps SAML2 single sign-on assertions to Matrix accounts: attribute
//   requirements, binding lookup and grandfathering, localpart resolution
//   with numeric suffixes, pluggable mapping providers and the hand-off to
//   login completion.
//
// =============================================================================

pub mod logging;
pub mod service;
pub mod test_utils;
pub mod utils;

// Re-export common types
pub use ruma;
pub use tokio;
pub use tracing;

// Re-export workspace crates
pub use matrixon_common as common;
pub use matrixon_core as core;

pub use logging::init_logging;
pub use matrixon_core::{Config, MappingError, MatrixonError, Result};
pub use service::{
    build_saml_handler,
    saml::{
        mapping::{
            CallbackMappingProvider, DefaultSamlMappingProvider, LegacyProviderRegistry,
            LegacySamlMappingProvider, MappingOutcome, ModuleApi, SamlAttributes,
            SamlMappingCallbacks, SamlMappingProvider,
        },
        SamlHandler,
    },
    sso::{RejectionReason, SsoHandler, SsoOutcome},
    Collaborators,
};
