// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::config::AgentTrustConfigError;
use config::{ConfigError, Environment, Map, Source, Value};
use log::*;
use std::collections::HashMap;

pub static ENV_PREFIX: &str = "AGENT_TRUST";

/// Configuration taken from `AGENT_TRUST_*` environment variables, nested
/// under the `agent` table like the configuration file
#[derive(Clone, Debug)]
pub struct EnvConfig {
    map: HashMap<String, Value>,
}

impl EnvConfig {
    pub fn new() -> Result<Self, AgentTrustConfigError> {
        Self::from_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(".")
                .prefix_separator("_"),
        )
    }

    fn from_source(
        env_source: Environment,
    ) -> Result<Self, AgentTrustConfigError> {
        let collected = env_source.collect()?;

        collected
            .iter()
            .for_each(|(c, v)| debug!("Environment configuration {c}={v}"));

        Ok(EnvConfig {
            map: Map::from([("agent".to_string(), Value::from(collected))]),
        })
    }
}

impl Source for EnvConfig {
    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        Ok(self.map.clone())
    }

    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }
}
