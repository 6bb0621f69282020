// =============================================================================
// Matrixon Matrix NextServer - SSO Outcomes
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Terminal outcomes of handling one identity assertion.
//
// =============================================================================

use matrixon_core::{MappingError, ResolvedIdentity};
use serde::Serialize;

/// What became of an assertion. Exactly one per `handle_authn_response` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SsoOutcome {
    /// Login completion was invoked for this account
    Completed(ResolvedIdentity),

    /// A user-interactive auth session was completed for this remote user
    UiAuthCompleted { remote_user_id: String },

    /// The mapping provider asked for the client to be sent elsewhere
    Redirected(String),

    /// No login happened
    Rejected(RejectionReason),
}

/// Why an assertion did not lead to a login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectionReason {
    /// A required attribute/value pair was missing. Not reported to the user.
    RequirementsNotMet,

    /// The candidate localpart was not a valid Matrix localpart
    InvalidLocalpart(String),

    /// Every candidate Matrix ID was taken
    Exhausted,

    /// The mapping provider could not produce usable attributes
    MappingFailed(String),
}

impl From<&MappingError> for RejectionReason {
    fn from(err: &MappingError) -> Self {
        match err {
            MappingError::InvalidLocalpart(localpart) => {
                RejectionReason::InvalidLocalpart(localpart.clone())
            }
            MappingError::UserIdTooLong(user_id) => RejectionReason::InvalidLocalpart(user_id.clone()),
            MappingError::Exhausted => RejectionReason::Exhausted,
            other => RejectionReason::MappingFailed(other.to_string()),
        }
    }
}

impl SsoOutcome {
    /// Whether the flow ended with a login or UI-auth completion
    pub fn is_completed(&self) -> bool {
        matches!(self, SsoOutcome::Completed(_) | SsoOutcome::UiAuthCompleted { .. })
    }
}
