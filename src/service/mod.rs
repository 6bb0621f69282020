// =============================================================================
// Matrixon Matrix NextServer - Services
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Service layer of the SSO identity mapping: the protocol-independent SSO
//   handler and the SAML2 handler built on it, plus the wiring that builds
//   both from configuration.
//
// =============================================================================

pub mod saml;
pub mod sso;

use std::sync::Arc;

use matrixon_core::{AuthCompletion, Config, ErrorReporter, IdentifierStore, Result};
use tracing::{info, instrument};

use self::{
    saml::{
        mapping::{load_mapping_provider, LegacyProviderRegistry, ModuleApi},
        SamlHandler,
    },
    sso::SsoHandler,
};

/// Collaborators the SSO services are built around
pub struct Collaborators {
    pub store: Arc<dyn IdentifierStore>,
    pub completion: Arc<dyn AuthCompletion>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Build the SAML2 handler from configuration.
///
/// Mapping callbacks registered on `module_api` take precedence over the
/// provider named in `saml2.user_mapping_provider`.
#[instrument(level = "debug", skip_all)]
pub async fn build_saml_handler(
    config: &Config,
    collaborators: Collaborators,
    module_api: &ModuleApi,
    legacy: &LegacyProviderRegistry,
) -> Result<SamlHandler> {
    let start = std::time::Instant::now();
    config.validate()?;

    let provider = load_mapping_provider(&config.saml2.user_mapping_provider, module_api, legacy)?;
    let sso = Arc::new(SsoHandler::new(
        config.server_name()?,
        config.saml2.max_mapping_retries,
        collaborators.store,
        collaborators.completion,
        collaborators.reporter,
    ));

    let handler = SamlHandler::new(&config.saml2, sso, provider).await?;
    info!("✅ SSO services initialized in {:?}", start.elapsed());
    Ok(handler)
}
