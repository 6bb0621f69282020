// =============================================================================
// Matrixon Matrix NextServer - Third-Party Identifier Helpers
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Gatekeeping of third-party identifiers (e-mail addresses and phone
//   numbers) used during registration: the optional identity-server invite
//   check, the `allowed_local_3pids` allow-list and e-mail
//   canonicalisation.
//
// =============================================================================

use std::sync::Arc;

use matrixon_core::{InternalInfoClient, MatrixonError, Result, ThreepidConfig};
use regex::Regex;
use ruma::OwnedServerName;
use tracing::{debug, info, instrument};

/// Lowercase plus the full case folds that differ from lowercasing.
///
/// Covers the letters that matter for Latin and Greek addresses (`ß`, `ẞ`,
/// final sigma, long s); it is not the whole Unicode folding table.
fn casefold(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'ß' => folded.push_str("ss"),
            'ς' => folded.push('σ'),
            'ſ' => folded.push('s'),
            c => folded.push(c),
        }
    }
    folded
}

/// Canonical form of an e-mail address: local part case-folded, domain lowercased
pub fn canonicalise_email(address: &str) -> Result<String> {
    let address = address.trim();

    let mut parts = address.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => Ok(format!("{}@{}", casefold(local), domain.to_lowercase())),
        _ => {
            debug!("Couldn't parse email address {}", address);
            Err(MatrixonError::Validation("Unable to parse email address".to_string()))
        }
    }
}

struct Constraint {
    medium: String,
    pattern: Regex,
}

/// Decides whether a 3PID may be used on this server
pub struct ThreepidChecker {
    server_name: OwnedServerName,
    invite_check_host: Option<String>,
    client: Option<Arc<dyn InternalInfoClient>>,
    constraints: Vec<Constraint>,
}

impl ThreepidChecker {
    /// Compile the allow-list. Patterns match at the start of the address.
    pub fn new(
        config: &ThreepidConfig,
        server_name: OwnedServerName,
        client: Option<Arc<dyn InternalInfoClient>>,
    ) -> Result<Self> {
        if config.check_is_for_allowed_local_3pids.is_some() && client.is_none() {
            return Err(MatrixonError::InvalidConfig(
                "check_is_for_allowed_local_3pids is set but no identity server client is available".into(),
            ));
        }

        let constraints = config
            .allowed_local_3pids
            .iter()
            .map(|c| {
                Regex::new(&format!("^(?:{})", c.pattern))
                    .map(|pattern| Constraint {
                        medium: c.medium.clone(),
                        pattern,
                    })
                    .map_err(|e| {
                        MatrixonError::InvalidConfig(format!("Invalid allowed_local_3pids pattern '{}': {}", c.pattern, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            server_name,
            invite_check_host: config.check_is_for_allowed_local_3pids.clone(),
            client,
            constraints,
        })
    }

    /// Whether `address` of `medium` may be added to an account on this server
    #[instrument(level = "debug", skip(self))]
    pub async fn is_allowed(&self, medium: &str, address: &str, during_registration: bool) -> Result<bool> {
        if let (Some(host), Some(client), true) = (&self.invite_check_host, &self.client, during_registration) {
            let data = client.internal_info(host, medium, address).await?;
            info!(
                "Received internal-info data for medium '{}', address '{}': {:?}",
                medium, address, data
            );

            if data.hs.is_none() && data.shadow_hs.is_none() {
                return Ok(false);
            }

            let ours = Some(self.server_name.as_str());
            if data.hs.as_deref() != ours && data.shadow_hs.as_deref() != ours {
                info!(
                    "{:?} did not match {} or {:?} did not match {}",
                    data.hs, self.server_name, data.shadow_hs, self.server_name
                );
                return Ok(false);
            }

            if data.requires_invite && !data.invited {
                info!(
                    "3PID check failed due to 'requires_invite' = '{}' and 'invited' = '{}'",
                    data.requires_invite, data.invited
                );
                return Ok(false);
            }

            return Ok(true);
        }

        if self.constraints.is_empty() {
            return Ok(true);
        }

        Ok(self.constraints.iter().any(|constraint| {
            debug!(
                "Checking 3PID {} ({}) against {} ({})",
                address, medium, constraint.pattern, constraint.medium
            );
            constraint.medium == medium && constraint.pattern.is_match(address)
        }))
    }
}

/// One-shot form of [`ThreepidChecker::is_allowed`]
pub async fn check_3pid_allowed(
    config: &ThreepidConfig,
    server_name: OwnedServerName,
    client: Option<Arc<dyn InternalInfoClient>>,
    medium: &str,
    address: &str,
    during_registration: bool,
) -> Result<bool> {
    ThreepidChecker::new(config, server_name, client)?
        .is_allowed(medium, address, during_registration)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use matrixon_core::{InternalInfo, ThreepidConstraint};
    use mockall::mock;
    use ruma::ServerName;
    use test_log::test;

    mock! {
        InfoClient {}
        #[async_trait]
        impl InternalInfoClient for InfoClient {
            async fn internal_info(&self, host: &str, medium: &str, address: &str) -> Result<InternalInfo>;
        }
    }

    fn server_name() -> OwnedServerName {
        ServerName::parse("test").unwrap()
    }

    fn client_returning(info: InternalInfo) -> Arc<dyn InternalInfoClient> {
        let mut client = MockInfoClient::new();
        client
            .expect_internal_info()
            .withf(|host, medium, _| host == "is.test" && medium == "email")
            .returning(move |_, _, _| Ok(info.clone()));
        Arc::new(client)
    }

    fn invite_config() -> ThreepidConfig {
        ThreepidConfig {
            check_is_for_allowed_local_3pids: Some("is.test".to_string()),
            allowed_local_3pids: Vec::new(),
        }
    }

    #[test]
    fn test_canonicalise_email() {
        assert_eq!(canonicalise_email("  Foo.Bar@Example.COM ").unwrap(), "foo.bar@example.com");
        assert_eq!(canonicalise_email("ÖLAF@test").unwrap(), "ölaf@test");
        assert!(canonicalise_email("no-at-sign").is_err());
        assert!(canonicalise_email("a@b@c").is_err());
    }

    #[test]
    fn test_canonicalise_email_folds_beyond_lowercase() {
        assert_eq!(canonicalise_email("Straße@Example.com").unwrap(), "strasse@example.com");
        assert_eq!(canonicalise_email("STRAẞE@example.com").unwrap(), "strasse@example.com");
        assert_eq!(canonicalise_email("ΟΔΥΣΣΕΥΣ@test").unwrap(), "οδυσσευσ@test");
        assert_eq!(canonicalise_email("οδυσσευς@test").unwrap(), "οδυσσευσ@test");
    }

    #[test(tokio::test)]
    async fn test_everything_allowed_without_config() {
        let allowed = check_3pid_allowed(&ThreepidConfig::default(), server_name(), None, "email", "a@b.c", true)
            .await
            .unwrap();
        assert!(allowed);
    }

    #[test(tokio::test)]
    async fn test_allow_list() {
        let config = ThreepidConfig {
            check_is_for_allowed_local_3pids: None,
            allowed_local_3pids: vec![ThreepidConstraint {
                medium: "email".to_string(),
                pattern: r".*@example\.com".to_string(),
            }],
        };
        let checker = ThreepidChecker::new(&config, server_name(), None).unwrap();

        assert!(checker.is_allowed("email", "alice@example.com", false).await.unwrap());
        assert!(!checker.is_allowed("email", "alice@example.org", false).await.unwrap());
        assert!(!checker.is_allowed("msisdn", "alice@example.com", false).await.unwrap());
    }

    #[test]
    fn test_invalid_pattern() {
        let config = ThreepidConfig {
            check_is_for_allowed_local_3pids: None,
            allowed_local_3pids: vec![ThreepidConstraint {
                medium: "email".to_string(),
                pattern: "(".to_string(),
            }],
        };
        assert!(matches!(
            ThreepidChecker::new(&config, server_name(), None),
            Err(MatrixonError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invite_check_needs_client() {
        assert!(ThreepidChecker::new(&invite_config(), server_name(), None).is_err());
    }

    #[test(tokio::test)]
    async fn test_invite_check() {
        let cases = [
            (InternalInfo::default(), false),
            (
                InternalInfo {
                    hs: Some("elsewhere".to_string()),
                    ..Default::default()
                },
                false,
            ),
            (
                InternalInfo {
                    shadow_hs: Some("test".to_string()),
                    ..Default::default()
                },
                true,
            ),
            (
                InternalInfo {
                    hs: Some("test".to_string()),
                    requires_invite: true,
                    invited: false,
                    ..Default::default()
                },
                false,
            ),
            (
                InternalInfo {
                    hs: Some("test".to_string()),
                    requires_invite: true,
                    invited: true,
                    ..Default::default()
                },
                true,
            ),
        ];

        for (info, expected) in cases {
            let checker =
                ThreepidChecker::new(&invite_config(), server_name(), Some(client_returning(info.clone()))).unwrap();
            assert_eq!(checker.is_allowed("email", "a@b.c", true).await.unwrap(), expected, "{:?}", info);
        }
    }

    #[test(tokio::test)]
    async fn test_invite_check_only_during_registration() {
        let mut client = MockInfoClient::new();
        client.expect_internal_info().never();
        let checker = ThreepidChecker::new(&invite_config(), server_name(), Some(Arc::new(client))).unwrap();

        assert!(checker.is_allowed("email", "a@b.c", false).await.unwrap());
    }
}
