// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::{
    https_client::{self, MtlsClientArgs},
    identity_material::{IdentityMaterial, IdentityMaterialError},
};
use log::*;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

pub const HTTPS_SCHEME: &str = "https";

#[derive(Error, Debug)]
pub enum TransportError {
    /// The TLS library refused the identity
    #[error("Failed to build client for scheme '{scheme}': {source}")]
    Client {
        scheme: String,
        source: anyhow::Error,
    },

    /// The identity cannot be inspected
    #[error("Invalid client identity")]
    Identity(#[from] IdentityMaterialError),
}

/// Capability to swap the client certificate used for future secure
/// connections
pub trait ClientIdentityTransport: Send + Sync {
    /// Bind `material` as client credential for every new connection
    fn install_client_identity(
        &self,
        material: &IdentityMaterial,
    ) -> Result<(), TransportError>;

    /// Go back to connecting without a client credential
    fn uninstall_client_identity(&self);

    /// Whether a client credential is currently bound
    fn has_client_identity(&self) -> bool;
}

/// Protocol handler currently bound to the transport scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Plain TLS, server verification only
    Default,
    /// Mutual TLS presenting the agent certificate with the given subject
    ClientAuthenticated { subject: String },
}

#[derive(Debug)]
struct InstalledIdentity {
    subject: String,
    client: reqwest::Client,
}

/// Outbound HTTPS client of the agent, holding the active client identity
///
/// One instance is shared by everything that talks to the server, so
/// installing or removing the identity affects every later request made
/// through `client()`.
#[derive(Debug)]
pub struct HttpsTransport {
    scheme: String,
    timeout: u64,
    ca_certificate: Option<String>,
    insecure: bool,
    default_client: reqwest::Client,
    installed: RwLock<Option<InstalledIdentity>>,
}

impl HttpsTransport {
    /// Create a transport for the "https" scheme with no identity installed
    ///
    /// # Arguments:
    ///
    /// * default_client (reqwest::Client): Client used while no identity is installed
    /// * timeout (u64): Request timeout in milliseconds for authenticated clients
    pub fn new(default_client: reqwest::Client, timeout: u64) -> Self {
        Self::with_scheme(HTTPS_SCHEME, default_client, timeout)
    }

    pub fn with_scheme(
        scheme: &str,
        default_client: reqwest::Client,
        timeout: u64,
    ) -> Self {
        Self {
            scheme: scheme.to_string(),
            timeout,
            ca_certificate: None,
            insecure: false,
            default_client,
            installed: RwLock::new(None),
        }
    }

    /// Set how authenticated clients verify the server
    ///
    /// # Arguments:
    ///
    /// * ca_certificate (Option<String>): Path to an extra CA certificate file
    /// * insecure (bool): If true, disable server certificate validation
    pub fn server_verification(
        mut self,
        ca_certificate: Option<String>,
        insecure: bool,
    ) -> Self {
        self.ca_certificate = ca_certificate;
        self.insecure = insecure;
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The client every secure call should use right now
    pub fn client(&self) -> reqwest::Client {
        let installed =
            self.installed.read().unwrap_or_else(PoisonError::into_inner);
        match installed.as_ref() {
            Some(identity) => identity.client.clone(),
            None => self.default_client.clone(),
        }
    }

    /// The protocol handler bound to the scheme
    pub fn protocol(&self) -> Protocol {
        let installed =
            self.installed.read().unwrap_or_else(PoisonError::into_inner);
        match installed.as_ref() {
            Some(identity) => Protocol::ClientAuthenticated {
                subject: identity.subject.clone(),
            },
            None => Protocol::Default,
        }
    }
}

impl ClientIdentityTransport for HttpsTransport {
    fn install_client_identity(
        &self,
        material: &IdentityMaterial,
    ) -> Result<(), TransportError> {
        let subject = material.subject()?;
        let client = https_client::get_mtls_client(&MtlsClientArgs {
            identity: material,
            ca_certificate: self.ca_certificate.clone(),
            insecure: Some(self.insecure),
            timeout: self.timeout,
        })
        .map_err(|source| TransportError::Client {
            scheme: self.scheme.clone(),
            source,
        })?;

        let mut installed =
            self.installed.write().unwrap_or_else(PoisonError::into_inner);
        *installed = Some(InstalledIdentity {
            subject: subject.clone(),
            client,
        });
        info!(
            "Installed client identity '{subject}' for scheme '{}'",
            self.scheme
        );
        Ok(())
    }

    fn uninstall_client_identity(&self) {
        let mut installed =
            self.installed.write().unwrap_or_else(PoisonError::into_inner);
        if installed.take().is_some() {
            info!("Removed client identity for scheme '{}'", self.scheme);
        }
    }

    fn has_client_identity(&self) -> bool {
        self.installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
