// =============================================================================
// Matrixon Matrix NextServer - Test Utils Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   In-memory collaborators for the SSO mapping: an account store, a login
//   completion recorder and an error page recorder. Used by the test suites
//   and for local experiments without a database.
//
// =============================================================================

#![cfg(any(test, feature = "testing"))]

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use matrixon_core::{
    AuthCompletion, ErrorReporter, IdentifierStore, MatrixonError, RegistrationOutcome, Result,
    SsoRequest,
};
use ruma::{OwnedUserId, UserId};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Account store kept in memory. Matrix IDs are compared case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryIdentifierStore {
    /// Lowercased Matrix ID to the ID as registered
    users: RwLock<HashMap<String, OwnedUserId>>,
    bindings: RwLock<HashMap<(String, String), OwnedUserId>>,
    /// IDs that get claimed by "someone else" the moment we try to register them
    contended: RwLock<HashSet<String>>,
}

impl MemoryIdentifierStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account directly, bypassing SSO
    pub async fn register(&self, user_id: &str) -> Result<()> {
        let user_id = UserId::parse(user_id)?;
        self.users
            .write()
            .await
            .insert(user_id.as_str().to_lowercase(), user_id);
        Ok(())
    }

    /// Make the next registration attempt of `user_id` lose a race
    pub async fn contend(&self, user_id: &str) {
        self.contended.write().await.insert(user_id.to_lowercase());
    }

    /// Number of registered accounts
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Account bound to a remote user, if any
    pub async fn binding(&self, auth_provider: &str, remote_user_id: &str) -> Option<OwnedUserId> {
        self.bindings
            .read()
            .await
            .get(&(auth_provider.to_string(), remote_user_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl IdentifierStore for MemoryIdentifierStore {
    async fn is_registered(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.users.read().await.contains_key(&user_id.as_str().to_lowercase()))
    }

    async fn find_registered(&self, user_id: &UserId) -> Result<Option<OwnedUserId>> {
        Ok(self
            .users
            .read()
            .await
            .get(&user_id.as_str().to_lowercase())
            .cloned())
    }

    async fn lookup_binding(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
    ) -> Result<Option<OwnedUserId>> {
        Ok(self.binding(auth_provider, remote_user_id).await)
    }

    async fn record_binding(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
        user_id: &UserId,
    ) -> Result<()> {
        let key = (auth_provider.to_string(), remote_user_id.to_string());
        let mut bindings = self.bindings.write().await;
        match bindings.get(&key) {
            Some(existing) if existing.as_str() != user_id.as_str() => Err(MatrixonError::Database(
                format!("{} is already bound to {}", remote_user_id, existing),
            )),
            _ => {
                bindings.insert(key, user_id.to_owned());
                Ok(())
            }
        }
    }

    async fn register_user(
        &self,
        user_id: &UserId,
        display_name: Option<&str>,
        _emails: &[String],
    ) -> Result<RegistrationOutcome> {
        let key = user_id.as_str().to_lowercase();
        let mut users = self.users.write().await;

        if self.contended.write().await.remove(&key) {
            users.insert(key, user_id.to_owned());
            return Ok(RegistrationOutcome::Taken);
        }
        if users.contains_key(&key) {
            return Ok(RegistrationOutcome::Taken);
        }
        users.insert(key, user_id.to_owned());

        debug!("👤 Registered {} (display name: {:?})", user_id, display_name);
        Ok(RegistrationOutcome::Registered(user_id.to_owned()))
    }
}

/// One recorded `complete_sso_login` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCall {
    pub user_id: OwnedUserId,
    pub auth_provider: String,
    pub request_id: Uuid,
    pub client_redirect_url: String,
    pub session_token: Option<String>,
    pub new_user: bool,
}

/// One recorded `complete_sso_ui_auth` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiAuthCall {
    pub auth_provider: String,
    pub remote_user_id: String,
    pub ui_auth_session_id: String,
    pub request_id: Uuid,
}

/// Login completion that only records what it was asked to do
#[derive(Debug, Default)]
pub struct RecordingCompletion {
    logins: RwLock<Vec<LoginCall>>,
    ui_auths: RwLock<Vec<UiAuthCall>>,
}

impl RecordingCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn logins(&self) -> Vec<LoginCall> {
        self.logins.read().await.clone()
    }

    pub async fn ui_auths(&self) -> Vec<UiAuthCall> {
        self.ui_auths.read().await.clone()
    }

    pub async fn reset(&self) {
        self.logins.write().await.clear();
        self.ui_auths.write().await.clear();
    }
}

#[async_trait]
impl AuthCompletion for RecordingCompletion {
    async fn complete_sso_login(
        &self,
        user_id: &UserId,
        auth_provider: &str,
        request: &SsoRequest,
        client_redirect_url: &str,
        session_token: Option<&str>,
        new_user: bool,
    ) -> Result<()> {
        self.logins.write().await.push(LoginCall {
            user_id: user_id.to_owned(),
            auth_provider: auth_provider.to_string(),
            request_id: request.id,
            client_redirect_url: client_redirect_url.to_string(),
            session_token: session_token.map(str::to_string),
            new_user,
        });
        Ok(())
    }

    async fn complete_sso_ui_auth(
        &self,
        auth_provider: &str,
        remote_user_id: &str,
        ui_auth_session_id: &str,
        request: &SsoRequest,
    ) -> Result<()> {
        self.ui_auths.write().await.push(UiAuthCall {
            auth_provider: auth_provider.to_string(),
            remote_user_id: remote_user_id.to_string(),
            ui_auth_session_id: ui_auth_session_id.to_string(),
            request_id: request.id,
        });
        Ok(())
    }
}

/// One rendered error page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedError {
    pub request_id: Uuid,
    pub error: String,
    pub error_description: String,
}

/// Error renderer that only records what it was asked to render
#[derive(Debug, Default)]
pub struct RecordingReporter {
    errors: Mutex<Vec<RenderedError>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<RenderedError> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn render(&self, request: &SsoRequest, error: &str, error_description: &str) {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RenderedError {
                request_id: request.id,
                error: error.to_string(),
                error_description: error_description.to_string(),
            });
    }
}
