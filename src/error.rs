// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent identifier error: {0}")]
    AgentIdentifier(#[from] crate::agent_identifier::AgentIdentifierError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::AgentTrustConfigError),
    #[error("Registration failed: {0}")]
    Registration(#[from] crate::registration::RegistrationError),
    #[error("Failed to persist agent identity: {0}")]
    Persistence(#[source] crate::credential_store::CredentialStoreError),
    #[error("Failed to invalidate agent identity: {0}")]
    Invalidation(#[source] crate::credential_store::CredentialStoreError),
    #[error("HTTPS transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

impl Error {
    /// Whether the error comes from the coordinating server or the network,
    /// as opposed to the local machine
    pub fn is_registration_failure(&self) -> bool {
        use crate::registration::RegistrationError::*;

        matches!(
            self,
            Error::Registration(
                Request(_)
                    | Rejected { .. }
                    | Status { .. }
                    | NoIdentity { .. }
                    | Malformed(_)
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
