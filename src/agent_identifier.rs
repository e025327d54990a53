// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::file_ops;
use log::*;
use std::{fmt, fs, io, path::Path};
use thiserror::Error;
use uuid::Uuid;

pub const AGENT_IDENTIFIER_FILE: &str = "guid.txt";

#[derive(Error, Debug)]
pub enum AgentIdentifierError {
    /// The identifier file exists but holds no identifier
    #[error("Agent identifier file {file} is empty")]
    Empty { file: String },

    /// Error reading the identifier file
    #[error("Failed to read agent identifier from {file}")]
    Read { file: String, source: io::Error },

    /// Error writing the identifier file
    #[error("Failed to write agent identifier to {file}")]
    Write { file: String, source: io::Error },

    /// Error removing the identifier file
    #[error("Failed to remove agent identifier file {file}")]
    Remove { file: String, source: io::Error },
}

/// Stable identifier correlating every registration of one logical agent
///
/// The identifier survives certificate renewals. It is only regenerated if
/// the file holding it is lost.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentifier(String);

impl AgentIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the identifier stored at `path`, returning None if there is none
    pub fn load(path: &Path) -> Result<Option<Self>, AgentIdentifierError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AgentIdentifierError::Read {
                    file: path.display().to_string(),
                    source,
                })
            }
        };

        let value = contents.trim();
        if value.is_empty() {
            return Err(AgentIdentifierError::Empty {
                file: path.display().to_string(),
            });
        }
        Ok(Some(Self::new(value)))
    }

    /// Read the identifier stored at `path`, generating and storing a new
    /// random UUID if the file does not exist yet
    pub fn load_or_create(path: &Path) -> Result<Self, AgentIdentifierError> {
        if let Some(id) = Self::load(path)? {
            debug!("Using agent identifier {id} from {}", path.display());
            return Ok(id);
        }

        let id = Self::new(Uuid::new_v4().to_string());
        id.store(path)?;
        info!("Generated new agent identifier {id}");
        Ok(id)
    }

    /// Persist the identifier as plain text, replacing any previous one
    pub fn store(&self, path: &Path) -> Result<(), AgentIdentifierError> {
        let write_err = |source| AgentIdentifierError::Write {
            file: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty())
        {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        file_ops::write_atomic(path, self.0.as_bytes(), 0o644)
            .map_err(write_err)
    }

    /// Remove the stored identifier; a missing file is not an error
    pub fn delete(path: &Path) -> Result<(), AgentIdentifierError> {
        _ = file_ops::remove_if_exists(path).map_err(|source| {
            AgentIdentifierError::Remove {
                file: path.display().to_string(),
                source,
            }
        })?;
        Ok(())
    }
}

impl fmt::Display for AgentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join("config").join(AGENT_IDENTIFIER_FILE);

        let first = AgentIdentifier::load_or_create(&path).unwrap(); //#[allow_ci]
        assert!(Uuid::parse_str(first.as_str()).is_ok());

        let second = AgentIdentifier::load_or_create(&path).unwrap(); //#[allow_ci]
        assert_eq!(first, second);
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join(AGENT_IDENTIFIER_FILE);

        assert_eq!(AgentIdentifier::load(&path).unwrap(), None); //#[allow_ci]

        AgentIdentifier::new("uuid-1234").store(&path).unwrap(); //#[allow_ci]
        let loaded = AgentIdentifier::load_or_create(&path).unwrap(); //#[allow_ci]
        assert_eq!(loaded.as_str(), "uuid-1234");
        assert_eq!(loaded.to_string(), "uuid-1234");
    }

    #[test]
    fn test_load_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join(AGENT_IDENTIFIER_FILE);
        fs::write(&path, "uuid-1234\n").unwrap(); //#[allow_ci]

        let loaded = AgentIdentifier::load(&path).unwrap(); //#[allow_ci]
        assert_eq!(loaded, Some(AgentIdentifier::new("uuid-1234")));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join(AGENT_IDENTIFIER_FILE);
        fs::write(&path, "  \n").unwrap(); //#[allow_ci]

        assert!(matches!(
            AgentIdentifier::load_or_create(&path),
            Err(AgentIdentifierError::Empty { .. })
        ));
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join(AGENT_IDENTIFIER_FILE);

        let first = AgentIdentifier::load_or_create(&path).unwrap(); //#[allow_ci]
        AgentIdentifier::delete(&path).unwrap(); //#[allow_ci]
        assert!(!path.exists());
        AgentIdentifier::delete(&path).unwrap(); //#[allow_ci]

        let second = AgentIdentifier::load_or_create(&path).unwrap(); //#[allow_ci]
        assert_ne!(first, second);
    }
}
