// =============================================================================
// Matrixon Matrix NextServer - SSO Localpart Resolver
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Turns a candidate localpart into a freshly registered Matrix ID. On
//   collision the candidate is retried with an increasing numeric suffix
//   (`name`, `name1`, `name2`, ...) up to a configured number of attempts.
//
// =============================================================================

use std::sync::Arc;

use matrixon_core::{
    utils::{contains_invalid_mxid_characters, MAX_USERID_LENGTH},
    IdentifierStore, MappingError, RegistrationOutcome, Result,
};
use ruma::{OwnedServerName, OwnedUserId, UserId};
use tracing::{debug, info, instrument, warn};

/// Registers new accounts for SSO users, retrying on Matrix ID collisions
pub struct LocalpartResolver {
    server_name: OwnedServerName,
    max_attempts: u32,
    store: Arc<dyn IdentifierStore>,
}

impl LocalpartResolver {
    /// `max_attempts` counts the unsuffixed candidate as the first attempt
    pub fn new(server_name: OwnedServerName, max_attempts: u32, store: Arc<dyn IdentifierStore>) -> Self {
        Self {
            server_name,
            max_attempts,
            store,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Candidate localpart for attempt number `attempt`
    pub fn candidate_for_attempt(candidate: &str, attempt: u32) -> String {
        if attempt == 0 {
            candidate.to_string()
        } else {
            format!("{}{}", candidate, attempt)
        }
    }

    /// Check a candidate against the localpart rules without touching the store
    pub fn validate(&self, candidate: &str) -> std::result::Result<OwnedUserId, MappingError> {
        if candidate.is_empty() {
            return Err(MappingError::EmptyLocalpart);
        }
        if contains_invalid_mxid_characters(candidate) {
            return Err(MappingError::InvalidLocalpart(candidate.to_string()));
        }
        self.user_id_for(candidate)
    }

    fn user_id_for(&self, localpart: &str) -> std::result::Result<OwnedUserId, MappingError> {
        // "@" + localpart + ":" + server name
        if localpart.len() + self.server_name.as_str().len() + 2 > MAX_USERID_LENGTH {
            return Err(MappingError::UserIdTooLong(format!("@{}:{}", localpart, self.server_name)));
        }

        UserId::parse_with_server_name(localpart, &self.server_name)
            .map_err(|_| MappingError::InvalidLocalpart(localpart.to_string()))
    }

    /// Register the first free Matrix ID derived from `candidate`.
    ///
    /// An invalid candidate fails before any attempt is made. A registration
    /// that loses a race against a concurrent one counts as a collision.
    #[instrument(level = "debug", skip(self, display_name, emails))]
    pub async fn resolve(
        &self,
        candidate: &str,
        display_name: Option<&str>,
        emails: &[String],
    ) -> Result<OwnedUserId> {
        let start = std::time::Instant::now();
        self.validate(candidate)?;

        for attempt in 0..self.max_attempts {
            let localpart = Self::candidate_for_attempt(candidate, attempt);
            // Suffixes only grow, so once a variant is too long every later one is too
            let Ok(user_id) = self.user_id_for(&localpart) else {
                warn!("⚠️ Suffixed candidate '{}' is not a usable Matrix ID", localpart);
                break;
            };

            if self.store.is_registered(&user_id).await? {
                debug!("🔁 {} is taken (attempt {})", user_id, attempt + 1);
                continue;
            }

            match self.store.register_user(&user_id, display_name, emails).await? {
                RegistrationOutcome::Registered(user_id) => {
                    info!(
                        "✅ Registered {} for SSO user after {} attempt(s) in {:?}",
                        user_id,
                        attempt + 1,
                        start.elapsed()
                    );
                    return Ok(user_id);
                }
                RegistrationOutcome::Taken => {
                    warn!("⚠️ {} was claimed concurrently, trying next candidate", user_id);
                }
            }
        }

        warn!(
            "❌ No free Matrix ID for candidate '{}' within {} attempts",
            candidate, self.max_attempts
        );
        Err(MappingError::Exhausted.into())
    }
}
