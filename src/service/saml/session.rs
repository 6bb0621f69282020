// =============================================================================
// Matrixon Matrix NextServer - SAML2 Outstanding Requests
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   AuthnRequests sent to the identity provider and not yet answered. A
//   response names its request in `InResponseTo`; the matching entry is
//   consumed on arrival. Unanswered entries expire after a configured
//   lifetime and are swept by a background task.
//
// =============================================================================

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};
use uuid::Uuid;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// One outstanding AuthnRequest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamlSession {
    /// Id sent as the AuthnRequest `ID`
    pub request_id: String,

    /// User-interactive auth session this request authenticates, if any
    pub ui_auth_session_id: Option<String>,

    pub creation_time: DateTime<Utc>,
}

impl SamlSession {
    fn is_expired(&self, now: DateTime<Utc>, lifetime: chrono::Duration) -> bool {
        now - self.creation_time > lifetime
    }
}

/// Registry of outstanding AuthnRequests
pub struct OutstandingRequests {
    lifetime: chrono::Duration,
    sessions: Arc<RwLock<HashMap<String, SamlSession>>>,
    cleanup_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OutstandingRequests {
    pub fn new(lifetime_ms: u64) -> Self {
        Self {
            lifetime: chrono::Duration::milliseconds(i64::try_from(lifetime_ms).unwrap_or(i64::MAX)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Start the periodic sweep of expired requests
    pub async fn start_cleanup(&self) {
        let sessions = Arc::clone(&self.sessions);
        let lifetime = self.lifetime;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                interval.tick().await;

                let removed = Self::sweep(&sessions, lifetime).await;
                if removed > 0 {
                    debug!("🧹 Cleaned up {} expired SAML requests", removed);
                }
            }
        });

        if let Some(previous) = self.cleanup_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn sweep(sessions: &RwLock<HashMap<String, SamlSession>>, lifetime: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut sessions = sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now, lifetime));
        before - sessions.len()
    }

    /// Remember a new AuthnRequest and return its id
    #[instrument(level = "debug", skip(self))]
    pub async fn insert(&self, ui_auth_session_id: Option<String>) -> String {
        let request_id = format!("saml_req_{}", Uuid::new_v4().simple());
        let session = SamlSession {
            request_id: request_id.clone(),
            ui_auth_session_id,
            creation_time: Utc::now(),
        };

        self.sessions.write().await.insert(request_id.clone(), session);
        request_id
    }

    /// Consume the request a response answers. Expired requests are not returned.
    pub async fn take(&self, request_id: &str) -> Option<SamlSession> {
        let session = self.sessions.write().await.remove(request_id)?;
        if session.is_expired(Utc::now(), self.lifetime) {
            debug!("⌛ SAML request {} answered after expiry", request_id);
            return None;
        }
        Some(session)
    }

    /// Drop every expired request now
    pub async fn expire(&self) -> usize {
        Self::sweep(&self.sessions, self.lifetime).await
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Drop for OutstandingRequests {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.get_mut().take() {
            task.abort();
        }
    }
}
