// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::crypto::{self, CryptoError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityMaterialError {
    /// The certificate chain is empty
    #[error("Identity material has no certificate")]
    EmptyChain,

    /// The private key is empty
    #[error("Identity material has no private key")]
    EmptyKey,

    /// The private key does not belong to the leaf certificate
    #[error("Private key does not match the leaf certificate '{subject}'")]
    KeyMismatch { subject: String },

    /// The material could not be decoded
    #[error("Failed to decode identity material")]
    Decode(#[from] CryptoError),
}

/// Client identity issued to the agent: a private key and the certificate
/// chain proving it, leaf first.
///
/// Both parts are kept as PEM bytes and are not modified after
/// construction.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityMaterial {
    private_key: Vec<u8>,
    certificate_chain: Vec<Vec<u8>>,
}

// Keep the private key out of logs
impl std::fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMaterial")
            .field("private_key", &"<redacted>")
            .field("certificate_chain_len", &self.certificate_chain.len())
            .finish()
    }
}

impl IdentityMaterial {
    /// Create the identity from an already split PEM key and PEM certificates
    ///
    /// # Arguments:
    ///
    /// * private_key (Vec<u8>): The PEM encoded private key
    /// * certificate_chain (Vec<Vec<u8>>): One PEM certificate per entry, leaf first
    pub fn new(
        private_key: Vec<u8>,
        certificate_chain: Vec<Vec<u8>>,
    ) -> Result<Self, IdentityMaterialError> {
        if private_key.is_empty() {
            return Err(IdentityMaterialError::EmptyKey);
        }
        if certificate_chain.is_empty()
            || certificate_chain.iter().any(|c| c.is_empty())
        {
            return Err(IdentityMaterialError::EmptyChain);
        }
        Ok(Self {
            private_key,
            certificate_chain,
        })
    }

    /// Decode a PEM private key and a concatenated PEM certificate chain
    ///
    /// The key is re-encoded as PKCS#8 and each certificate is re-encoded on
    /// its own, so the result can be handed to the TLS backend unchanged.
    pub fn from_pem(
        key_pem: &[u8],
        chain_pem: &[u8],
    ) -> Result<Self, IdentityMaterialError> {
        if key_pem.is_empty() {
            return Err(IdentityMaterialError::EmptyKey);
        }
        let key = crypto::private_key_from_pem(key_pem)?;
        let chain = crypto::x509_chain_from_pem(chain_pem)?
            .iter()
            .map(crypto::x509_to_pem)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(crypto::private_key_to_pkcs8_pem(&key)?, chain)
    }

    /// The PEM encoded private key
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// The certificate chain, one PEM certificate per entry, leaf first
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.certificate_chain
    }

    pub fn leaf(&self) -> &[u8] {
        // The constructor guarantees a non-empty chain
        &self.certificate_chain[0]
    }

    /// The whole chain as a single PEM buffer
    pub fn chain_pem(&self) -> Vec<u8> {
        self.certificate_chain.concat()
    }

    /// Certificates the agent should trust when talking to the server
    ///
    /// These are the issuers above the leaf. A chain made of a single
    /// self-signed certificate trusts that certificate.
    pub fn trust_anchors(&self) -> &[Vec<u8>] {
        if self.certificate_chain.len() > 1 {
            &self.certificate_chain[1..]
        } else {
            &self.certificate_chain
        }
    }

    /// Subject Common Name of the leaf certificate
    pub fn subject(&self) -> Result<String, IdentityMaterialError> {
        let leaf = crypto::x509_chain_from_pem(self.leaf())?;
        let cert = leaf.first().ok_or(IdentityMaterialError::EmptyChain)?;
        Ok(crypto::x509_common_name(cert)?)
    }

    /// Verify that the private key belongs to the leaf certificate
    pub fn check_key_matches_leaf(&self) -> Result<(), IdentityMaterialError> {
        let key = crypto::private_key_from_pem(&self.private_key)?;
        let leaf = crypto::x509_chain_from_pem(self.leaf())?;
        let cert = leaf.first().ok_or(IdentityMaterialError::EmptyChain)?;

        if crypto::key_matches_cert(&key, cert)? {
            Ok(())
        } else {
            Err(IdentityMaterialError::KeyMismatch {
                subject: crypto::x509_common_name(cert)
                    .unwrap_or_else(|_| "unknown".to_string()),
            })
        }
    }
}
