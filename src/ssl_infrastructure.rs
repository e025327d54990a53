// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors

//! Lifecycle of the agent client identity.
//!
//! `SslInfrastructure` decides when the agent must register with the
//! coordinating server, stores the identity it receives and binds it to the
//! outbound HTTPS transport.
//!
//! ```text
//!   Unregistered --- ensure_registered / create_infrastructure ---> Registered
//!   Registered   --- invalidate ----------------------------------> Unregistered
//! ```
//!
//! A failed registration leaves the state unchanged. Calling
//! `ensure_registered` while registered does not contact the server.
//!
//! Every operation runs under one async mutex, so at most one registration
//! round trip is in flight and an invalidation never interleaves with a
//! registration writing the same artifacts.

use crate::{
    agent_identifier::AgentIdentifier,
    config::AgentTrustConfig,
    credential_store::CredentialStore,
    error::{Error, Result},
    https_client::{get_tls_client, TlsClientArgs},
    identity_material::IdentityMaterial,
    registration::{
        RegistrationProperties, RegistrationRequester,
        RemoteRegistrationRequester, RemoteRegistrationRequesterBuilder,
    },
    transport::{
        ClientIdentityTransport, HttpsTransport, TransportError, HTTPS_SCHEME,
    },
};
use log::*;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
}

pub struct SslInfrastructure<R, T> {
    requester: R,
    store: CredentialStore,
    transport: Arc<T>,
    host_name: String,
    properties: RegistrationProperties,
    registration_lock: Mutex<()>,
}

impl SslInfrastructure<RemoteRegistrationRequester, HttpsTransport> {
    /// Wire the infrastructure talking to the server named in the configuration
    ///
    /// The agent identifier is read from the configuration directory, and
    /// created there on first use.
    pub fn from_config(config: &AgentTrustConfig) -> Result<Self> {
        config.validate()?;

        let agent_identifier =
            AgentIdentifier::load_or_create(&config.agent_identifier_path())?;
        info!("Agent identifier: {agent_identifier}");

        let default_client = get_tls_client(&TlsClientArgs {
            ca_certificate: config.server_ca_cert(),
            insecure: Some(config.insecure),
            timeout: config.registration_timeout,
        })
        .map_err(|source| TransportError::Client {
            scheme: HTTPS_SCHEME.to_string(),
            source,
        })?;
        let transport = Arc::new(
            HttpsTransport::new(default_client, config.registration_timeout)
                .server_verification(config.server_ca_cert(), config.insecure),
        );

        let mut builder = RemoteRegistrationRequesterBuilder::new()
            .server_url(config.server_url.clone())
            .agent_identifier(agent_identifier)
            .working_dir(config.working_dir.clone())
            .insecure(config.insecure)
            .timeout(config.registration_timeout);
        if let Some(ca) = config.server_ca_cert() {
            builder = builder.ca_certificate(ca);
        }
        let requester = builder.build()?;

        Ok(Self::new(
            requester,
            CredentialStore::new(config.credential_dir()),
            transport,
            config.resolved_host_name()?,
            config.registration_properties(),
        ))
    }
}

impl<R, T> SslInfrastructure<R, T>
where
    R: RegistrationRequester,
    T: ClientIdentityTransport,
{
    /// Create the infrastructure
    ///
    /// # Arguments:
    ///
    /// * requester (R): Performs the registration round trip
    /// * store (CredentialStore): Where the identity is cached
    /// * transport (Arc<T>): Outbound transport receiving the identity
    /// * host_name (String): Host name sent when registering
    /// * properties (RegistrationProperties): Auto-registration properties
    pub fn new(
        requester: R,
        store: CredentialStore,
        transport: Arc<T>,
        host_name: String,
        properties: RegistrationProperties,
    ) -> Self {
        Self {
            requester,
            store,
            transport,
            host_name,
            properties,
            registration_lock: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn requester(&self) -> &R {
        &self.requester
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    /// Current state, derived from the cached artifacts
    pub fn state(&self) -> RegistrationState {
        if self.store.has_valid_registration() {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        }
    }

    /// Make sure the agent owns an identity and that it is installed
    ///
    /// Does nothing when a cached identity is already installed. A cached
    /// identity not installed yet, as after a restart, is installed without
    /// contacting the server. Otherwise the agent registers.
    pub async fn ensure_registered(&self) -> Result<()> {
        let _guard = self.registration_lock.lock().await;

        if self.store.has_valid_registration() {
            if self.transport.has_client_identity() {
                debug!("Agent identity already installed");
                return Ok(());
            }

            match self.store.load() {
                Ok(Some(material)) => {
                    debug!(
                        "Installing cached agent identity from {}",
                        self.store.identity_path().display()
                    );
                    return self.install(&material);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Discarding unusable cached agent identity: {e}");
                    self.store.clear().map_err(Error::Invalidation)?;
                }
            }
        }

        self.register().await
    }

    /// Register and install the resulting identity, whatever is cached
    pub async fn create_infrastructure(&self) -> Result<()> {
        let _guard = self.registration_lock.lock().await;
        self.register().await
    }

    /// Discard the cached identity and stop presenting it
    ///
    /// The transport is reset even when the artifacts cannot be deleted; in
    /// that case the error is returned and the next `ensure_registered`
    /// call reinstalls the stale artifacts.
    pub async fn invalidate(&self) -> Result<()> {
        let _guard = self.registration_lock.lock().await;

        self.transport.uninstall_client_identity();
        match self.store.clear() {
            Ok(()) => {
                info!("Agent identity invalidated");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to remove agent identity artifacts: {e}");
                Err(Error::Invalidation(e))
            }
        }
    }

    // Must be called with the registration lock held
    async fn register(&self) -> Result<()> {
        info!("Registering agent {} with the server", self.host_name);

        let material = match self
            .requester
            .request(&self.host_name, &self.properties)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                error!("Agent registration failed: {e}");
                return Err(e.into());
            }
        };

        // The previous identity may be gone from disk once persist starts
        if let Err(e) = self.store.persist(&material) {
            error!("Failed to store agent identity: {e}");
            self.transport.uninstall_client_identity();
            return Err(Error::Persistence(e));
        }
        self.install(&material)?;

        info!("SUCCESS: Agent {} registered", self.host_name);
        Ok(())
    }

    fn install(&self, material: &IdentityMaterial) -> Result<()> {
        if let Err(e) = self.transport.install_client_identity(material) {
            error!("Failed to install agent identity: {e}");
            // Leave no cached identity the transport refused, and no
            // previous identity bound without its artifacts
            self.transport.uninstall_client_identity();
            if let Err(clear_err) = self.store.clear() {
                warn!("Failed to remove refused agent identity: {clear_err}");
            }
            return Err(e.into());
        }
        Ok(())
    }
}
