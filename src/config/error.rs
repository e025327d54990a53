// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentTrustConfigError {
    // Error from config crate
    #[error("Error from the config crate")]
    Config(#[from] ConfigError),

    // Server URL is not an HTTP(S) URL
    #[error("Invalid server URL '{0}': expected an http:// or https:// URL")]
    InvalidServerUrl(String),

    // Registration timeout set to zero
    #[error("Option 'registration_timeout' must be greater than zero")]
    InvalidTimeout,

    // Missing configuration file set in AGENT_TRUST_CONFIG
    #[error("Missing file {file} set in 'AGENT_TRUST_CONFIG' environment variable")]
    MissingEnvConfigFile { file: String },

    // Host name lookup error
    #[error("Failed to get the host name of the machine")]
    HostName(#[source] std::io::Error),
}
