// =============================================================================
// Matrixon Matrix NextServer - SSO Handler
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Protocol-independent half of single sign-on: attribute requirements,
//   Matrix ID resolution for new users, error pages and the hand-off to
//   login completion. Protocol handlers such as SAML build on top of it.
//
// =============================================================================

pub mod lookup;
pub mod outcome;
pub mod requirements;
pub mod resolver;

use std::sync::Arc;

use matrixon_core::{
    AttributeRequirement, AuthCompletion, ErrorReporter, IdentifierStore, IdentityAssertion,
    ResolvedIdentity, Result, SsoRequest,
};
use ruma::OwnedServerName;
use tracing::{debug, info, instrument};

pub use lookup::{BindingLookup, LookupStrategy};
pub use outcome::{RejectionReason, SsoOutcome};
pub use resolver::LocalpartResolver;

/// Error code rendered when an assertion cannot be mapped to an account
pub const MAPPING_ERROR: &str = "mapping_error";

/// Shared SSO machinery
pub struct SsoHandler {
    server_name: OwnedServerName,
    store: Arc<dyn IdentifierStore>,
    completion: Arc<dyn AuthCompletion>,
    reporter: Arc<dyn ErrorReporter>,
    resolver: LocalpartResolver,
}

impl SsoHandler {
    pub fn new(
        server_name: OwnedServerName,
        max_mapping_retries: u32,
        store: Arc<dyn IdentifierStore>,
        completion: Arc<dyn AuthCompletion>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let resolver = LocalpartResolver::new(server_name.clone(), max_mapping_retries, Arc::clone(&store));
        Self {
            server_name,
            store,
            completion,
            reporter,
            resolver,
        }
    }

    pub fn server_name(&self) -> &OwnedServerName {
        &self.server_name
    }

    pub fn store(&self) -> &Arc<dyn IdentifierStore> {
        &self.store
    }

    pub fn resolver(&self) -> &LocalpartResolver {
        &self.resolver
    }

    /// Whether the assertion meets every requirement.
    ///
    /// Failure is only logged; nothing is rendered, so the client learns
    /// nothing about which requirement it missed.
    pub fn check_required_attributes(
        &self,
        request: &SsoRequest,
        assertion: &IdentityAssertion,
        requirements: &[AttributeRequirement],
    ) -> bool {
        match requirements::first_unmet(assertion, requirements) {
            Some(requirement) => {
                info!(
                    "🚫 SSO login {} rejected: attribute requirement on '{}' not met",
                    request.id, requirement.attribute
                );
                false
            }
            None => true,
        }
    }

    /// Render an error page for the request
    pub fn render_error(&self, request: &SsoRequest, error: &str, error_description: &str) {
        debug!("📄 Rendering SSO error {} for {}: {}", error, request.id, error_description);
        self.reporter.render(request, error, error_description);
    }

    /// Hand a resolved account to login completion
    #[instrument(level = "debug", skip(self, identity, request))]
    pub async fn complete_sso_login(
        &self,
        identity: &ResolvedIdentity,
        auth_provider: &str,
        request: &SsoRequest,
        client_redirect_url: &str,
    ) -> Result<()> {
        info!(
            "🔐 Completing SSO login for {} via {} (new user: {})",
            identity.user_id, auth_provider, identity.new_user
        );
        self.completion
            .complete_sso_login(
                &identity.user_id,
                auth_provider,
                request,
                client_redirect_url,
                identity.session_token.as_deref(),
                identity.new_user,
            )
            .await
    }

    /// Mark a user-interactive auth session as done
    #[instrument(level = "debug", skip(self, request))]
    pub async fn complete_sso_ui_auth(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
        ui_auth_session_id: &str,
        request: &SsoRequest,
    ) -> Result<()> {
        info!("🔐 Completing UI auth session {} for {}", ui_auth_session_id, remote_user_id);
        self.completion
            .complete_sso_ui_auth(auth_provider, remote_user_id, ui_auth_session_id, request)
            .await
    }
}
