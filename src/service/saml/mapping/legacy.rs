// =============================================================================
// Matrixon Matrix NextServer - SAML2 Legacy Mapping Providers
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Mapping providers written against the older direct-method interface.
//   Such providers are synchronous and are looked up by module name in a
//   `LegacyProviderRegistry`. `LegacyProviderAdapter` makes them usable
//   wherever a `SamlMappingProvider` is expected.
//
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use matrixon_core::{IdentityAssertion, MatrixonError, Result, UserAttributes};
use tracing::debug;

use super::{MappingOutcome, SamlAttributes, SamlMappingProvider};

/// Direct-method mapping provider
pub trait LegacySamlMappingProvider: Send + Sync {
    fn get_remote_user_id(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: Option<&str>,
    ) -> Result<MappingOutcome<String>>;

    /// Attributes for the account of a new user. `failures` is always 0:
    /// collisions are retried by the server, not by the provider.
    fn saml_response_to_user_attributes(
        &self,
        assertion: &IdentityAssertion,
        failures: u32,
        client_redirect_url: &str,
    ) -> Result<MappingOutcome<UserAttributes>>;

    fn saml_attributes(&self) -> SamlAttributes;
}

/// Builds a legacy provider from its `user_mapping_provider.config` value
pub type LegacyProviderFactory = fn(&serde_json::Value) -> Result<Box<dyn LegacySamlMappingProvider>>;

/// Known legacy providers by module name
#[derive(Default)]
pub struct LegacyProviderRegistry {
    factories: HashMap<String, LegacyProviderFactory>,
}

impl LegacyProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: impl Into<String>, factory: LegacyProviderFactory) -> &mut Self {
        let module = module.into();
        debug!("🔧 Registering legacy SAML2 mapping provider '{}'", module);
        self.factories.insert(module, factory);
        self
    }

    pub fn contains(&self, module: &str) -> bool {
        self.factories.contains_key(module)
    }

    /// Instantiate `module` with its configuration
    pub fn load(&self, module: &str, config: &serde_json::Value) -> Result<Box<dyn LegacySamlMappingProvider>> {
        let factory = self.factories.get(module).ok_or_else(|| {
            MatrixonError::InvalidConfig(format!("Unknown SAML2 user mapping provider module '{}'", module))
        })?;
        factory(config)
    }
}

/// [`SamlMappingProvider`] view of a legacy provider
pub struct LegacyProviderAdapter {
    inner: Box<dyn LegacySamlMappingProvider>,
}

impl LegacyProviderAdapter {
    pub fn new(inner: Box<dyn LegacySamlMappingProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SamlMappingProvider for LegacyProviderAdapter {
    async fn remote_user_id(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: Option<&str>,
    ) -> Result<MappingOutcome<String>> {
        self.inner.get_remote_user_id(assertion, client_redirect_url)
    }

    async fn user_attributes(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: &str,
    ) -> Result<MappingOutcome<UserAttributes>> {
        self.inner
            .saml_response_to_user_attributes(assertion, 0, client_redirect_url)
    }

    fn saml_attributes(&self) -> SamlAttributes {
        self.inner.saml_attributes()
    }
}
