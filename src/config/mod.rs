// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
mod env;
mod error;

pub use env::*;
pub use error::*;

use crate::{
    agent_identifier::AGENT_IDENTIFIER_FILE,
    registration::{RegistrationProperties, DEFAULT_REGISTRATION_TIMEOUT},
};
use config::{Config, File, FileFormat};
use log::*;
use serde::{Deserialize, Serialize};
use std::{
    env as std_env,
    path::{Path, PathBuf},
};

pub static CONFIG_OVERRIDE_ENV_VAR: &str = "AGENT_TRUST_CONFIG";
pub static DEFAULT_CONFIG: &str = "/etc/agent_trust/agent.conf";
pub static DEFAULT_SERVER_URL: &str = "https://localhost:8154/go";
pub static DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTrustConfig {
    pub server_url: String,
    pub config_dir: String,
    pub host_name: String,
    pub working_dir: String,
    pub server_ca_cert: String,
    pub insecure: bool,
    pub registration_timeout: u64,
    pub auto_register_key: String,
    pub auto_register_resources: String,
    pub auto_register_environments: String,
    pub auto_register_hostname: String,
    pub auto_register_elastic_agent_id: String,
    pub auto_register_elastic_plugin_id: String,
}

// Wrapper matching the `[agent]` table of the configuration file
#[derive(Debug, Default, Deserialize, Serialize)]
pub(crate) struct FileConfig {
    pub(crate) agent: AgentTrustConfig,
}

impl Default for AgentTrustConfig {
    fn default() -> Self {
        AgentTrustConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            config_dir: DEFAULT_CONFIG_DIR.to_string(),
            host_name: "".to_string(),
            working_dir: ".".to_string(),
            server_ca_cert: "".to_string(),
            insecure: false,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            auto_register_key: "".to_string(),
            auto_register_resources: "".to_string(),
            auto_register_environments: "".to_string(),
            auto_register_hostname: "".to_string(),
            auto_register_elastic_agent_id: "".to_string(),
            auto_register_elastic_plugin_id: "".to_string(),
        }
    }
}

fn non_empty(option: &str) -> Option<String> {
    if option.trim().is_empty() {
        None
    } else {
        Some(option.trim().to_string())
    }
}

impl AgentTrustConfig {
    /// Load the configuration from the default location
    ///
    /// If the `AGENT_TRUST_CONFIG` environment variable is set, the file it
    /// names replaces the default location and must exist. Options set
    /// through `AGENT_TRUST_*` environment variables take precedence over
    /// the file.
    pub fn new() -> Result<Self, AgentTrustConfigError> {
        if let Ok(env_cfg) = std_env::var(CONFIG_OVERRIDE_ENV_VAR) {
            if !env_cfg.is_empty() {
                let path = Path::new(&env_cfg);
                if !path.exists() {
                    warn!("Configuration set in {CONFIG_OVERRIDE_ENV_VAR} environment variable not found");
                    return Err(AgentTrustConfigError::MissingEnvConfigFile {
                        file: path.display().to_string(),
                    });
                }
                warn!(
                    "Configuration replaced by {}: {}",
                    CONFIG_OVERRIDE_ENV_VAR,
                    path.display()
                );
                return Self::load(path, true);
            }
        }
        Self::load(Path::new(DEFAULT_CONFIG), false)
    }

    /// Load the configuration from the given file, which must exist
    pub fn from_file(path: &Path) -> Result<Self, AgentTrustConfigError> {
        Self::load(path, true)
    }

    fn load(
        path: &Path,
        required: bool,
    ) -> Result<Self, AgentTrustConfigError> {
        debug!("Loading configuration from FILE: {}", path.display());

        let default = FileConfig::default();
        let f: FileConfig = Config::builder()
            .add_source(Config::try_from(&default)?)
            .add_source(
                File::new(&path.display().to_string(), FileFormat::Toml)
                    .required(required),
            )
            .add_source(EnvConfig::new()?)
            .build()?
            .try_deserialize()?;

        f.agent.validate()?;
        Ok(f.agent)
    }

    /// Check option values that the types alone do not constrain
    pub fn validate(&self) -> Result<(), AgentTrustConfigError> {
        let url = self.server_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://"))
            || url.trim_start_matches("https://").trim_start_matches("http://").is_empty()
        {
            return Err(AgentTrustConfigError::InvalidServerUrl(
                self.server_url.clone(),
            ));
        }
        if self.registration_timeout == 0 {
            return Err(AgentTrustConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Directory holding the identity artifacts and the agent identifier
    pub fn credential_dir(&self) -> PathBuf {
        PathBuf::from(&self.config_dir)
    }

    pub fn agent_identifier_path(&self) -> PathBuf {
        self.credential_dir().join(AGENT_IDENTIFIER_FILE)
    }

    pub fn server_ca_cert(&self) -> Option<String> {
        non_empty(&self.server_ca_cert)
    }

    /// The host name to register with: the configured one, or the machine's
    pub fn resolved_host_name(&self) -> Result<String, AgentTrustConfigError> {
        if let Some(name) = non_empty(&self.host_name) {
            return Ok(name);
        }
        let name = hostname::get().map_err(AgentTrustConfigError::HostName)?;
        Ok(name.to_string_lossy().into_owned())
    }

    /// Auto-registration properties sent with every registration request
    pub fn registration_properties(&self) -> RegistrationProperties {
        RegistrationProperties {
            key: non_empty(&self.auto_register_key),
            resources: non_empty(&self.auto_register_resources),
            environments: non_empty(&self.auto_register_environments),
            hostname: non_empty(&self.auto_register_hostname),
            elastic_agent_id: non_empty(&self.auto_register_elastic_agent_id),
            elastic_plugin_id: non_empty(
                &self.auto_register_elastic_plugin_id,
            ),
        }
    }
}
