// =============================================================================
// Matrixon Matrix NextServer - SAML2 User Mapping Providers
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   The pluggable policy deciding which remote user an assertion describes
//   and which local account attributes it maps to. Providers come in three
//   shapes (built-in default, legacy direct-method modules and modules that
//   register callbacks); all are adapted at load time to one trait.
//
// =============================================================================

pub mod callbacks;
pub mod default;
pub mod legacy;

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use matrixon_core::{
    IdentityAssertion, MappingError, MatrixonError, Result, UserAttributes,
    UserMappingProviderConfig,
};
use tracing::{info, warn};

pub use callbacks::{CallbackMappingProvider, ModuleApi, SamlMappingCallbacks};
pub use default::{DefaultMappingConfig, DefaultSamlMappingProvider, MxidMapping};
pub use legacy::{LegacyProviderAdapter, LegacyProviderRegistry, LegacySamlMappingProvider};

/// Result of a mapping step that may divert the client instead
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingOutcome<T> {
    /// Mapping produced a value
    Mapped(T),

    /// Send the client to this URL; the login does not continue here
    Redirect(String),
}

/// Attribute names a provider needs from the identity provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamlAttributes {
    pub required: HashSet<String>,
    pub optional: HashSet<String>,
}

impl SamlAttributes {
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }
}

/// The one mapping policy active on a server
#[async_trait]
pub trait SamlMappingProvider: Send + Sync {
    /// Stable identifier of the remote user
    async fn remote_user_id(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: Option<&str>,
    ) -> Result<MappingOutcome<String>>;

    /// Local account attributes for a user without an account yet.
    /// Called once per assertion; collisions are resolved by suffixing.
    async fn user_attributes(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: &str,
    ) -> Result<MappingOutcome<UserAttributes>>;

    /// Attributes to request from the identity provider
    fn saml_attributes(&self) -> SamlAttributes;
}

/// Errors from provider code that are not mapping errors become
/// `MappingError::Provider`, so they are reported like any mapping failure.
pub(crate) fn into_mapping_error(err: MatrixonError) -> MatrixonError {
    match err {
        MatrixonError::Mapping(_) => err,
        other => {
            warn!("⚠️ SAML2 mapping provider failed: {}", other);
            MappingError::Provider(other.to_string()).into()
        }
    }
}

/// Pick the default provider or the configured legacy module
pub fn load_default_or_legacy_mapping_provider(
    config: &UserMappingProviderConfig,
    legacy: &LegacyProviderRegistry,
) -> Result<Arc<dyn SamlMappingProvider>> {
    match &config.module {
        Some(module) => {
            info!("🔌 Loading legacy SAML2 mapping provider '{}'", module);
            let provider = legacy.load(module, &config.config)?;
            Ok(Arc::new(LegacyProviderAdapter::new(provider)))
        }
        None => {
            info!("🔌 Using default SAML2 mapping provider");
            Ok(Arc::new(DefaultSamlMappingProvider::from_config(&config.config)?))
        }
    }
}

/// Pick the active provider: callbacks registered through the module API
/// win over anything configured under `user_mapping_provider`
pub fn load_mapping_provider(
    config: &UserMappingProviderConfig,
    module_api: &ModuleApi,
    legacy: &LegacyProviderRegistry,
) -> Result<Arc<dyn SamlMappingProvider>> {
    if let Some(callbacks) = module_api.take_saml2_user_mapping_provider_callbacks()? {
        if let Some(module) = &config.module {
            warn!(
                "⚠️ Ignoring user_mapping_provider module '{}': a module registered SAML2 mapping callbacks",
                module
            );
        }
        info!("🔌 Using SAML2 mapping callbacks registered by a module");
        return Ok(Arc::new(CallbackMappingProvider::new(callbacks)));
    }
    load_default_or_legacy_mapping_provider(config, legacy)
}
