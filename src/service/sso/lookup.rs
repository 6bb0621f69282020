// =============================================================================
// Matrixon Matrix NextServer - SSO Binding Lookup
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Finds the account a remote SSO user already owns, either through a
//   stored remote-id binding or by adopting a legacy account named in a
//   "grandfathering" attribute of the assertion.
//
// =============================================================================

use std::sync::Arc;

use matrixon_core::{
    utils::map_username_to_mxid_localpart, IdentifierStore, IdentityAssertion, Result, SamlConfig,
};
use ruma::{OwnedServerName, OwnedUserId, UserId};
use tracing::{debug, info, instrument, warn};

/// One way of finding an existing account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Remote user id previously bound to an account
    StoredBinding,

    /// Matrix ID carried in an attribute of the assertion. A hit is
    /// recorded as a stored binding.
    Grandfathered { attribute: String },
}

/// Ordered list of lookup strategies; the first hit wins
pub struct BindingLookup {
    auth_provider: String,
    server_name: OwnedServerName,
    strategies: Vec<LookupStrategy>,
    store: Arc<dyn IdentifierStore>,
}

impl BindingLookup {
    pub fn new(
        auth_provider: impl Into<String>,
        server_name: OwnedServerName,
        strategies: Vec<LookupStrategy>,
        store: Arc<dyn IdentifierStore>,
    ) -> Self {
        Self {
            auth_provider: auth_provider.into(),
            server_name,
            strategies,
            store,
        }
    }

    /// Stored bindings first, then grandfathering when an attribute is configured
    pub fn from_config(
        config: &SamlConfig,
        server_name: OwnedServerName,
        store: Arc<dyn IdentifierStore>,
    ) -> Self {
        let mut strategies = vec![LookupStrategy::StoredBinding];
        if let Some(attribute) = &config.grandfathered_mxid_source_attribute {
            strategies.push(LookupStrategy::Grandfathered {
                attribute: attribute.clone(),
            });
        }
        Self::new(config.idp_id.clone(), server_name, strategies, store)
    }

    pub fn strategies(&self) -> &[LookupStrategy] {
        &self.strategies
    }

    /// Account already owned by `remote_user_id`, if any
    #[instrument(level = "debug", skip(self, assertion))]
    pub async fn find_existing_binding(
        &self,
        remote_user_id: &str,
        assertion: &IdentityAssertion,
    ) -> Result<Option<OwnedUserId>> {
        for strategy in &self.strategies {
            let found = match strategy {
                LookupStrategy::StoredBinding => {
                    self.store
                        .lookup_binding(&self.auth_provider, remote_user_id)
                        .await?
                }
                LookupStrategy::Grandfathered { attribute } => {
                    self.grandfathered_user(remote_user_id, assertion, attribute)
                        .await?
                }
            };

            if let Some(user_id) = found {
                debug!("🔗 {} is bound to {} via {:?}", remote_user_id, user_id, strategy);
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }

    async fn grandfathered_user(
        &self,
        remote_user_id: &str,
        assertion: &IdentityAssertion,
        attribute: &str,
    ) -> Result<Option<OwnedUserId>> {
        let Some(value) = assertion.first_value(attribute) else {
            return Ok(None);
        };

        let localpart = map_username_to_mxid_localpart(value);
        let candidate = match UserId::parse_with_server_name(localpart.as_str(), &self.server_name) {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!("⚠️ Ignoring unusable grandfathered Matrix ID '{}': {}", value, e);
                return Ok(None);
            }
        };

        // Adopt the account as registered, which may differ in case from the candidate
        let Some(user_id) = self.store.find_registered(&candidate).await? else {
            return Ok(None);
        };

        info!("👴 Adopting existing account {} for SSO user {}", user_id, remote_user_id);
        self.store
            .record_binding(&self.auth_provider, remote_user_id, &user_id)
            .await?;
        Ok(Some(user_id))
    }
}
