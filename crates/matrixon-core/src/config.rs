//! Configuration module for Matrixon SSO
//!
//! Configuration is read from a TOML file whose keys live under a `[global]`
//! table, then overridden by `MATRIXON_` prefixed environment variables
//! (`__` separates nested keys, e.g. `MATRIXON_SAML2__MAX_MAPPING_RETRIES`).

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use ruma::{OwnedServerName, ServerName};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{types::AttributeRequirement, MatrixonError, Result};

/// Number of candidate Matrix IDs tried before giving up on a mapping
pub const DEFAULT_MAX_MAPPING_RETRIES: u32 = 1000;

/// How long an outstanding SAML AuthnRequest is remembered (15 minutes)
pub const DEFAULT_SAML_SESSION_LIFETIME_MS: u64 = 15 * 60 * 1000;

/// Top level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server name used as the domain part of generated Matrix IDs
    pub server_name: String,

    /// Log filter directive, e.g. `info,matrixon_sso=debug`
    pub log: String,

    /// SAML2 SSO configuration
    pub saml2: SamlConfig,

    /// Third-party identifier restrictions
    pub threepids: ThreepidConfig,
}

/// SAML2 SSO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamlConfig {
    /// Identifier of this identity provider, handed to login completion
    pub idp_id: String,

    /// Maximum number of candidate Matrix IDs tried per assertion
    pub max_mapping_retries: u32,

    /// Attribute/value pairs every assertion must carry to log in
    pub attribute_requirements: Vec<AttributeRequirement>,

    /// Attribute holding the Matrix ID of accounts that predate SSO.
    /// `None` disables grandfathering.
    pub grandfathered_mxid_source_attribute: Option<String>,

    /// Lifetime of outstanding AuthnRequests, in milliseconds
    pub saml_session_lifetime_ms: u64,

    /// Mapping provider selection
    pub user_mapping_provider: UserMappingProviderConfig,
}

/// Which mapping provider to load, and its own configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMappingProviderConfig {
    /// Name of a registered legacy provider. `None` selects the default provider.
    pub module: Option<String>,

    /// Free-form provider configuration, passed to the provider's `parse_config`
    pub config: serde_json::Value,
}

/// Restrictions on third-party identifiers bound to local accounts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreepidConfig {
    /// Identity server host consulted during registration, if any
    pub check_is_for_allowed_local_3pids: Option<String>,

    /// Medium/pattern pairs a 3PID must match; empty allows everything
    pub allowed_local_3pids: Vec<ThreepidConstraint>,
}

/// One allowed 3PID pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreepidConstraint {
    /// Medium, e.g. `email` or `msisdn`
    pub medium: String,

    /// Regular expression matched against the start of the address
    pub pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "matrixon.local".to_string(),
            log: "warn".to_string(),
            saml2: SamlConfig::default(),
            threepids: ThreepidConfig::default(),
        }
    }
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            idp_id: "saml".to_string(),
            max_mapping_retries: DEFAULT_MAX_MAPPING_RETRIES,
            attribute_requirements: Vec::new(),
            grandfathered_mxid_source_attribute: None,
            saml_session_lifetime_ms: DEFAULT_SAML_SESSION_LIFETIME_MS,
            user_mapping_provider: UserMappingProviderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, overridden by the environment
    #[instrument(level = "debug")]
    pub fn from_file(path: &Path) -> Result<Self> {
        let start = std::time::Instant::now();
        debug!("🔧 Loading configuration from {}", path.display());

        let config: Config = Figment::new()
            .merge(Toml::file(path).nested())
            .merge(Env::prefixed("MATRIXON_").split("__").global())
            .extract()
            .map_err(|e| MatrixonError::Config(format!("Failed to load config file: {}", e)))?;

        config.validate()?;

        info!("✅ Configuration loaded in {:?}", start.elapsed());
        Ok(config)
    }

    /// Parsed server name
    pub fn server_name(&self) -> Result<OwnedServerName> {
        ServerName::parse(&self.server_name)
            .map_err(|e| MatrixonError::InvalidConfig(format!("Invalid server name: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() {
            return Err(MatrixonError::InvalidConfig("Server name cannot be empty".into()));
        }
        self.server_name()?;
        self.saml2.validate()
    }
}

impl SamlConfig {
    /// Validate the SAML2 section
    pub fn validate(&self) -> Result<()> {
        if self.idp_id.is_empty() {
            return Err(MatrixonError::InvalidConfig("saml2.idp_id cannot be empty".into()));
        }
        if self.max_mapping_retries == 0 {
            return Err(MatrixonError::InvalidConfig(
                "saml2.max_mapping_retries must be at least 1".into(),
            ));
        }
        if let Some(requirement) = self
            .attribute_requirements
            .iter()
            .find(|r| r.attribute.is_empty())
        {
            return Err(MatrixonError::InvalidConfig(format!(
                "saml2.attribute_requirements entry with value '{}' has no attribute name",
                requirement.value
            )));
        }
        if matches!(&self.grandfathered_mxid_source_attribute, Some(attr) if attr.is_empty()) {
            return Err(MatrixonError::InvalidConfig(
                "saml2.grandfathered_mxid_source_attribute cannot be empty".into(),
            ));
        }
        Ok(())
    }
}
