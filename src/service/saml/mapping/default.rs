// =============================================================================
// Matrixon Matrix NextServer - SAML2 Default Mapping Provider
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Built-in SAML2 mapping provider. The remote user id is the first `uid`
//   value. The localpart comes from `mxid_source_attribute`, mapped with
//   either the hex-escaping or the dot-replacing rule. Display name and
//   e-mails come from `displayName` and `email`.
//
// =============================================================================

use async_trait::async_trait;
use matrixon_core::{
    utils::{dot_replace_for_mxid, map_username_to_mxid_localpart},
    IdentityAssertion, MappingError, MatrixonError, Result, UserAttributes,
};
use serde::{Deserialize, Serialize};

use super::{MappingOutcome, SamlAttributes, SamlMappingProvider};

const REMOTE_USER_ID_ATTRIBUTE: &str = "uid";
const DISPLAY_NAME_ATTRIBUTE: &str = "displayName";
const EMAIL_ATTRIBUTE: &str = "email";

/// How a username is turned into a localpart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MxidMapping {
    /// Escape disallowed bytes as `=xx`
    #[default]
    Hexencode,
    /// Replace disallowed characters with `.`
    Dotreplace,
}

impl MxidMapping {
    pub fn apply(self, username: &str) -> String {
        match self {
            MxidMapping::Hexencode => map_username_to_mxid_localpart(username),
            MxidMapping::Dotreplace => dot_replace_for_mxid(username),
        }
    }
}

/// Configuration of the default provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultMappingConfig {
    /// Attribute the localpart is derived from
    pub mxid_source_attribute: String,

    /// Mapping rule for that attribute
    pub mxid_mapping: MxidMapping,
}

impl Default for DefaultMappingConfig {
    fn default() -> Self {
        Self {
            mxid_source_attribute: "uid".to_string(),
            mxid_mapping: MxidMapping::Hexencode,
        }
    }
}

/// Mapping provider used when nothing else is configured
#[derive(Debug, Clone, Default)]
pub struct DefaultSamlMappingProvider {
    config: DefaultMappingConfig,
}

impl DefaultSamlMappingProvider {
    pub fn new(config: DefaultMappingConfig) -> Self {
        Self { config }
    }

    /// Parse the free-form `user_mapping_provider.config` value
    pub fn from_config(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let config = serde_json::from_value(value.clone()).map_err(|e| {
            MatrixonError::InvalidConfig(format!("Invalid SAML2 user mapping provider config: {}", e))
        })?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &DefaultMappingConfig {
        &self.config
    }
}

fn required_value<'a>(assertion: &'a IdentityAssertion, attribute: &str) -> Result<&'a str> {
    assertion
        .first_value(attribute)
        .ok_or_else(|| MappingError::MissingAttribute(attribute.to_string()).into())
}

#[async_trait]
impl SamlMappingProvider for DefaultSamlMappingProvider {
    async fn remote_user_id(
        &self,
        assertion: &IdentityAssertion,
        _client_redirect_url: Option<&str>,
    ) -> Result<MappingOutcome<String>> {
        let remote_user_id = required_value(assertion, REMOTE_USER_ID_ATTRIBUTE)?;
        Ok(MappingOutcome::Mapped(remote_user_id.to_string()))
    }

    async fn user_attributes(
        &self,
        assertion: &IdentityAssertion,
        _client_redirect_url: &str,
    ) -> Result<MappingOutcome<UserAttributes>> {
        let source = required_value(assertion, &self.config.mxid_source_attribute)?;

        Ok(MappingOutcome::Mapped(UserAttributes {
            localpart: Some(self.config.mxid_mapping.apply(source)),
            display_name: assertion.first_value(DISPLAY_NAME_ATTRIBUTE).map(str::to_string),
            emails: assertion
                .values(EMAIL_ATTRIBUTE)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
        }))
    }

    fn saml_attributes(&self) -> SamlAttributes {
        SamlAttributes::new(
            [REMOTE_USER_ID_ATTRIBUTE, self.config.mxid_source_attribute.as_str()],
            [DISPLAY_NAME_ATTRIBUTE, EMAIL_ATTRIBUTE],
        )
    }
}
