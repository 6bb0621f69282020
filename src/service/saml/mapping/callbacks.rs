// =============================================================================
// Matrixon Matrix NextServer - SAML2 Callback Mapping Providers
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Mapping providers registered through the module API. A module hands
//   over a set of async callbacks once at startup. The SAML handler takes
//   them out of the `ModuleApi` when it is built.
//
// =============================================================================

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use matrixon_core::{IdentityAssertion, MatrixonError, Result, UserAttributes};
use tracing::info;

use super::{MappingOutcome, SamlAttributes, SamlMappingProvider};

pub type GetRemoteUserIdCallback = Arc<
    dyn Fn(IdentityAssertion, Option<String>) -> BoxFuture<'static, Result<MappingOutcome<String>>>
        + Send
        + Sync,
>;

pub type UserAttributesCallback = Arc<
    dyn Fn(IdentityAssertion, String) -> BoxFuture<'static, Result<MappingOutcome<UserAttributes>>>
        + Send
        + Sync,
>;

/// Callbacks making up one mapping provider
#[derive(Clone)]
pub struct SamlMappingCallbacks {
    pub get_remote_user_id: GetRemoteUserIdCallback,
    pub saml_response_to_user_attributes: UserAttributesCallback,
    pub saml_attributes: SamlAttributes,
}

impl fmt::Debug for SamlMappingCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamlMappingCallbacks")
            .field("saml_attributes", &self.saml_attributes)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Registration {
    callbacks: Option<SamlMappingCallbacks>,
    registered: bool,
}

/// Entry point modules use to plug into the server
#[derive(Clone, Default)]
pub struct ModuleApi {
    saml2_mapping: Arc<Mutex<Registration>>,
}

impl ModuleApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registration>> {
        self.saml2_mapping
            .lock()
            .map_err(|_| MatrixonError::Internal("module API lock poisoned".to_string()))
    }

    /// Register the SAML2 user mapping provider. Only one module may do so.
    pub fn register_saml2_user_mapping_provider_callbacks(&self, callbacks: SamlMappingCallbacks) -> Result<()> {
        let mut registration = self.lock()?;
        if registration.registered {
            return Err(MatrixonError::InvalidConfig(
                "A SAML2 user mapping provider has already been registered".to_string(),
            ));
        }
        info!("🔌 Module registered SAML2 user mapping callbacks");
        registration.callbacks = Some(callbacks);
        registration.registered = true;
        Ok(())
    }

    pub fn module_has_registered(&self) -> bool {
        self.lock().map(|r| r.registered).unwrap_or(false)
    }

    /// Hand the registered callbacks to their consumer
    pub fn take_saml2_user_mapping_provider_callbacks(&self) -> Result<Option<SamlMappingCallbacks>> {
        Ok(self.lock()?.callbacks.take())
    }
}

/// [`SamlMappingProvider`] backed by module callbacks
pub struct CallbackMappingProvider {
    callbacks: SamlMappingCallbacks,
}

impl CallbackMappingProvider {
    pub fn new(callbacks: SamlMappingCallbacks) -> Self {
        Self { callbacks }
    }
}

#[async_trait]
impl SamlMappingProvider for CallbackMappingProvider {
    async fn remote_user_id(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: Option<&str>,
    ) -> Result<MappingOutcome<String>> {
        (self.callbacks.get_remote_user_id)(assertion.clone(), client_redirect_url.map(str::to_string)).await
    }

    async fn user_attributes(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: &str,
    ) -> Result<MappingOutcome<UserAttributes>> {
        (self.callbacks.saml_response_to_user_attributes)(assertion.clone(), client_redirect_url.to_string())
            .await
    }

    fn saml_attributes(&self) -> SamlAttributes {
        self.callbacks.saml_attributes.clone()
    }
}
