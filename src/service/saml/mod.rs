// =============================================================================
// Matrixon Matrix NextServer - SAML2 Handler
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Turns a verified SAML2 identity assertion into a Matrix login. The
//   assertion is checked against the attribute requirements, matched to an
//   existing account or mapped to a newly registered one, and handed to
//   login completion. Assertions answering a user-interactive auth request
//   complete that session instead.
//
// Flow:
//   received -> requirements checked -> existing bound | new resolved -> completed
//   Exits: requirements not met, invalid localpart, exhausted, redirected
//
// =============================================================================

pub mod mapping;
pub mod session;

use std::sync::Arc;

use matrixon_core::{
    AttributeRequirement, IdentityAssertion, MappingError, MatrixonError, ResolvedIdentity, Result,
    SamlConfig, SsoRequest,
};
use ruma::OwnedUserId;
use tracing::{debug, info, instrument, warn};

use crate::service::sso::{BindingLookup, RejectionReason, SsoHandler, SsoOutcome, MAPPING_ERROR};

use self::{
    mapping::{into_mapping_error, MappingOutcome, SamlAttributes, SamlMappingProvider},
    session::{OutstandingRequests, SamlSession},
};

/// Either the account to log in as, or where to send the client instead
enum Mapped {
    Identity(OwnedUserId, bool),
    Redirect(String),
}

/// SAML2 side of single sign-on
pub struct SamlHandler {
    idp_id: String,
    attribute_requirements: Vec<AttributeRequirement>,
    sso: Arc<SsoHandler>,
    lookup: BindingLookup,
    provider: Arc<dyn SamlMappingProvider>,
    outstanding: OutstandingRequests,
}

impl SamlHandler {
    /// Build the handler and start expiring outstanding requests
    pub async fn new(
        config: &SamlConfig,
        sso: Arc<SsoHandler>,
        provider: Arc<dyn SamlMappingProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let lookup = BindingLookup::from_config(config, sso.server_name().clone(), Arc::clone(sso.store()));
        let outstanding = OutstandingRequests::new(config.saml_session_lifetime_ms);
        outstanding.start_cleanup().await;

        info!(
            "🔧 SAML2 handler ready for {} ({} attribute requirement(s), {} mapping attempt(s))",
            config.idp_id,
            config.attribute_requirements.len(),
            sso.resolver().max_attempts()
        );

        Ok(Self {
            idp_id: config.idp_id.clone(),
            attribute_requirements: config.attribute_requirements.clone(),
            sso,
            lookup,
            provider,
            outstanding,
        })
    }

    pub fn idp_id(&self) -> &str {
        &self.idp_id
    }

    /// Attributes to ask the identity provider for
    pub fn requested_attributes(&self) -> SamlAttributes {
        self.provider.saml_attributes()
    }

    pub fn outstanding_requests(&self) -> &OutstandingRequests {
        &self.outstanding
    }

    /// Remember an AuthnRequest about to be sent; returns its request id
    pub async fn register_outstanding_request(&self, ui_auth_session_id: Option<String>) -> String {
        let request_id = self.outstanding.insert(ui_auth_session_id).await;
        debug!("📤 Outstanding SAML2 request {}", request_id);
        request_id
    }

    /// Process an identity assertion received at the assertion consumer.
    ///
    /// Mapping failures are outcomes, rendered as `mapping_error`. `Err` is
    /// only returned when a collaborator fails.
    #[instrument(level = "debug", skip(self, request, assertion), fields(request_id = %request.id))]
    pub async fn handle_authn_response(
        &self,
        request: &SsoRequest,
        assertion: &IdentityAssertion,
        client_redirect_url: &str,
    ) -> Result<SsoOutcome> {
        let start = std::time::Instant::now();

        let session = match &assertion.in_response_to {
            Some(request_id) => self.outstanding.take(request_id).await,
            None => None,
        };

        if let Some(ui_auth_session_id) = session.as_ref().and_then(|s| s.ui_auth_session_id.as_deref()) {
            return self
                .handle_ui_auth_response(request, assertion, ui_auth_session_id)
                .await;
        }

        if !self
            .sso
            .check_required_attributes(request, assertion, &self.attribute_requirements)
        {
            return Ok(SsoOutcome::Rejected(RejectionReason::RequirementsNotMet));
        }

        let (user_id, new_user) = match self.map_assertion(assertion, client_redirect_url).await {
            Ok(Mapped::Identity(user_id, new_user)) => (user_id, new_user),
            Ok(Mapped::Redirect(url)) => return Ok(self.redirect(url)),
            Err(MatrixonError::Mapping(e)) => return Ok(self.reject(request, e)),
            Err(e) => return Err(e),
        };

        let identity = ResolvedIdentity {
            user_id,
            new_user,
            session_token: session.map(|SamlSession { request_id, .. }| request_id),
        };
        self.sso
            .complete_sso_login(&identity, &self.idp_id, request, client_redirect_url)
            .await?;

        info!("✅ SAML2 login for {} handled in {:?}", identity.user_id, start.elapsed());
        Ok(SsoOutcome::Completed(identity))
    }

    async fn handle_ui_auth_response(
        &self,
        request: &SsoRequest,
        assertion: &IdentityAssertion,
        ui_auth_session_id: &str,
    ) -> Result<SsoOutcome> {
        let remote_user_id = match self.remote_user_id(assertion, None).await {
            Ok(MappingOutcome::Mapped(remote_user_id)) => remote_user_id,
            Ok(MappingOutcome::Redirect(url)) => return Ok(self.redirect(url)),
            Err(MatrixonError::Mapping(e)) => return Ok(self.reject(request, e)),
            Err(e) => return Err(e),
        };

        self.sso
            .complete_sso_ui_auth(&self.idp_id, &remote_user_id, ui_auth_session_id, request)
            .await?;
        Ok(SsoOutcome::UiAuthCompleted { remote_user_id })
    }

    async fn remote_user_id(
        &self,
        assertion: &IdentityAssertion,
        client_redirect_url: Option<&str>,
    ) -> Result<MappingOutcome<String>> {
        self.provider
            .remote_user_id(assertion, client_redirect_url)
            .await
            .map_err(into_mapping_error)
    }

    async fn map_assertion(&self, assertion: &IdentityAssertion, client_redirect_url: &str) -> Result<Mapped> {
        let remote_user_id = match self.remote_user_id(assertion, Some(client_redirect_url)).await? {
            MappingOutcome::Mapped(remote_user_id) => remote_user_id,
            MappingOutcome::Redirect(url) => return Ok(Mapped::Redirect(url)),
        };

        if let Some(user_id) = self.lookup.find_existing_binding(&remote_user_id, assertion).await? {
            return Ok(Mapped::Identity(user_id, false));
        }

        let attributes = match self
            .provider
            .user_attributes(assertion, client_redirect_url)
            .await
            .map_err(into_mapping_error)?
        {
            MappingOutcome::Mapped(attributes) => attributes,
            MappingOutcome::Redirect(url) => return Ok(Mapped::Redirect(url)),
        };

        let candidate = attributes.localpart.ok_or(MappingError::EmptyLocalpart)?;
        let user_id = self
            .sso
            .resolver()
            .resolve(&candidate, attributes.display_name.as_deref(), &attributes.emails)
            .await?;

        self.sso
            .store()
            .record_binding(&self.idp_id, &remote_user_id, &user_id)
            .await?;
        Ok(Mapped::Identity(user_id, true))
    }

    fn redirect(&self, url: String) -> SsoOutcome {
        info!("↪️ SAML2 mapping redirected the client to {}", url);
        SsoOutcome::Redirected(url)
    }

    fn reject(&self, request: &SsoRequest, err: MappingError) -> SsoOutcome {
        warn!("❌ SAML2 mapping for {} failed: {}", request.id, err);
        self.sso.render_error(request, MAPPING_ERROR, &err.to_string());
        SsoOutcome::Rejected(RejectionReason::from(&err))
    }
}
