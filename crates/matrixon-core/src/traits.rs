//! Collaborator traits for Matrixon SSO
//!
//! The mapping workflow owns no storage and no transport. Account lookups
//! and registration, login completion, error pages and identity server
//! queries are reached through these traits.

use async_trait::async_trait;
use ruma::{OwnedUserId, UserId};

use crate::{
    types::{InternalInfo, RegistrationOutcome, SsoRequest},
    Result,
};

/// Account datastore as seen by the SSO mapping
#[async_trait]
pub trait IdentifierStore: Send + Sync {
    /// Whether an account with this Matrix ID exists (case-insensitively)
    async fn is_registered(&self, user_id: &UserId) -> Result<bool>;

    /// The registered account matching this Matrix ID case-insensitively,
    /// spelled as it was stored
    async fn find_registered(&self, user_id: &UserId) -> Result<Option<OwnedUserId>>;

    /// Account previously bound to `remote_user_id` at `auth_provider`
    async fn lookup_binding(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
    ) -> Result<Option<OwnedUserId>>;

    /// Bind `remote_user_id` at `auth_provider` to an account
    async fn record_binding(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
        user_id: &UserId,
    ) -> Result<()>;

    /// Register a new account. Returns `Taken` when the ID was claimed
    /// concurrently; the caller treats that as a collision.
    async fn register_user(
        &self,
        user_id: &UserId,
        display_name: Option<&str>,
        emails: &[String],
    ) -> Result<RegistrationOutcome>;
}

/// Finishes an SSO flow once the account is known
#[async_trait]
pub trait AuthCompletion: Send + Sync {
    /// Log `user_id` in and send the client back to `client_redirect_url`
    async fn complete_sso_login(
        &self,
        user_id: &UserId,
        auth_provider: &str,
        request: &SsoRequest,
        client_redirect_url: &str,
        session_token: Option<&str>,
        new_user: bool,
    ) -> Result<()>;

    /// Mark a user-interactive auth session as authenticated by SSO
    async fn complete_sso_ui_auth(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
        ui_auth_session_id: &str,
        request: &SsoRequest,
    ) -> Result<()>;
}

/// Renders an error page for a failed SSO flow
pub trait ErrorReporter: Send + Sync {
    /// `error` is a machine-readable code such as `mapping_error`
    fn render(&self, request: &SsoRequest, error: &str, error_description: &str);
}

/// Identity server lookup used to gate 3PIDs during registration
#[async_trait]
pub trait InternalInfoClient: Send + Sync {
    async fn internal_info(&self, host: &str, medium: &str, address: &str) -> Result<InternalInfo>;
}
