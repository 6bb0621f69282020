//! Core types for Matrixon SSO
//!
//! The assertion handed over by the SAML layer, the attributes a mapping
//! provider derives from it, and the values exchanged with the datastore and
//! login completion collaborators.

use std::{collections::HashMap, net::IpAddr};

use ruma::OwnedUserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One identity assertion received from the identity provider.
///
/// Signature checks and XML parsing happened before this point; what is left
/// is the attribute-value bag (`ava`), the raw supporting assertions and the
/// id of the AuthnRequest this response answers, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityAssertion {
    /// Attribute name to attribute values
    pub ava: HashMap<String, Vec<String>>,

    /// Supporting assertions, opaque to the mapping
    #[serde(default)]
    pub assertions: Vec<serde_json::Value>,

    /// Request id this response correlates with
    #[serde(default)]
    pub in_response_to: Option<String>,
}

impl IdentityAssertion {
    /// Build an assertion from `(attribute, values)` pairs
    pub fn new<I, K, V>(ava: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            ava: ava
                .into_iter()
                .map(|(k, vs)| (k.into(), vs.into_iter().map(Into::into).collect()))
                .collect(),
            assertions: Vec::new(),
            in_response_to: None,
        }
    }

    /// Set the correlated request id
    pub fn with_in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// All values of an attribute
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.ava.get(attribute).map(Vec::as_slice)
    }

    /// First value of an attribute
    pub fn first_value(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// A required attribute/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRequirement {
    /// Attribute name
    pub attribute: String,

    /// Value that must appear among the attribute's values
    pub value: String,
}

impl AttributeRequirement {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// Local account attributes derived by a mapping provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    /// Candidate localpart. Must be set for new accounts.
    pub localpart: Option<String>,

    /// Display name for a newly registered account
    pub display_name: Option<String>,

    /// E-mail addresses to bind to a newly registered account
    #[serde(default)]
    pub emails: Vec<String>,
}

/// Outcome of mapping an assertion to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Account the remote user logs in as
    pub user_id: OwnedUserId,

    /// Whether the account was registered by this mapping
    pub new_user: bool,

    /// Id of the outstanding SAML session this assertion answered
    pub session_token: Option<String>,
}

/// Result of asking the datastore to register a new account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The account now exists
    Registered(OwnedUserId),

    /// Someone else holds this Matrix ID
    Taken,
}

/// Handle on the HTTP request an assertion arrived with.
///
/// Opaque to the mapping; forwarded to login completion and error rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoRequest {
    /// Request id, for log correlation
    pub id: Uuid,

    /// Client address
    pub client_ip: Option<IpAddr>,

    /// Client user agent
    pub user_agent: Option<String>,
}

impl SsoRequest {
    pub fn new(client_ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_ip,
            user_agent,
        }
    }
}

impl Default for SsoRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Answer of an identity server's internal-info endpoint about a 3PID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalInfo {
    /// Homeserver the 3PID is meant to register on
    pub hs: Option<String>,

    /// Shadow homeserver the 3PID is meant to register on
    pub shadow_hs: Option<String>,

    /// Whether registration needs an invite
    #[serde(default)]
    pub requires_invite: bool,

    /// Whether the 3PID was invited
    #[serde(default)]
    pub invited: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_assertion_attribute_access() {
        let assertion = IdentityAssertion::new([
            ("uid", vec!["test_user"]),
            ("userGroup", vec!["staff", "admin"]),
            ("empty", vec![]),
        ])
        .with_in_response_to("req_1");

        assert_eq!(assertion.first_value("uid"), Some("test_user"));
        assert_eq!(assertion.values("userGroup").map(<[String]>::len), Some(2));
        assert_eq!(assertion.first_value("empty"), None);
        assert_eq!(assertion.first_value("missing"), None);
        assert_eq!(assertion.in_response_to.as_deref(), Some("req_1"));
    }

    #[test]
    fn test_assertion_deserialization() {
        let assertion: IdentityAssertion = serde_json::from_value(serde_json::json!({
            "ava": { "uid": ["tester"], "mxid": ["test_user"] }
        }))
        .unwrap();

        assert_eq!(assertion.first_value("mxid"), Some("test_user"));
        assert!(assertion.assertions.is_empty());
        assert!(assertion.in_response_to.is_none());
    }

    #[test]
    fn test_internal_info_defaults() {
        let info: InternalInfo = serde_json::from_value(serde_json::json!({ "hs": "test" })).unwrap();
        assert_eq!(info.hs.as_deref(), Some("test"));
        assert!(info.shadow_hs.is_none());
        assert!(!info.requires_invite);
        assert!(!info.invited);
    }
}
