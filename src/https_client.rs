// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::identity_material::IdentityMaterial;
use anyhow::{Context, Result};
use std::{fs::File, io::Read, time::Duration};

/// Arguments for creating a TLS client (server verification only).
/// Used to contact the registration endpoint, before the agent owns an identity.
pub struct TlsClientArgs {
    pub ca_certificate: Option<String>,
    pub insecure: Option<bool>,
    pub timeout: u64,
}

/// Creates an HTTP(S) client with server verification only (no client certificate).
///
/// Without a CA certificate the system trust roots are used.
pub fn get_tls_client(args: &TlsClientArgs) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .connection_verbose(true)
        .timeout(Duration::from_millis(args.timeout));

    server_verification(builder, args.ca_certificate.as_deref(), args.insecure)?
        .build()
        .context("Failed to create TLS client")
}

/// Arguments for creating a mutual TLS client.
///
/// The server is verified the same way as with `TlsClientArgs`, and the
/// certificates issued along with the identity are trusted in addition.
pub struct MtlsClientArgs<'a> {
    pub identity: &'a IdentityMaterial,
    pub ca_certificate: Option<String>,
    pub insecure: Option<bool>,
    pub timeout: u64,
}

/// Creates an HTTPS client presenting the agent identity.
pub fn get_mtls_client(args: &MtlsClientArgs) -> Result<reqwest::Client> {
    let identity = reqwest::Identity::from_pkcs8_pem(
        &args.identity.chain_pem(),
        args.identity.private_key(),
    )
    .context("Failed to load client identity from PEM")?;

    let mut builder = reqwest::Client::builder()
        .connection_verbose(true)
        .timeout(Duration::from_millis(args.timeout))
        .identity(identity);

    for anchor in args.identity.trust_anchors() {
        let cert = reqwest::Certificate::from_pem(anchor)
            .context("Failed to parse trusted certificate from PEM")?;
        builder = builder.add_root_certificate(cert);
    }

    server_verification(builder, args.ca_certificate.as_deref(), args.insecure)?
        .build()
        .context("Failed to create mTLS client")
}

fn server_verification(
    mut builder: reqwest::ClientBuilder,
    ca_certificate: Option<&str>,
    insecure: Option<bool>,
) -> Result<reqwest::ClientBuilder> {
    if insecure.unwrap_or(false) {
        builder = builder.danger_accept_invalid_certs(true);
    } else if let Some(ca_certificate) = ca_certificate {
        // Get CA certificate from file
        let mut buf = Vec::new();
        File::open(ca_certificate)
            .context(format!("Failed to open '{ca_certificate}' file"))?
            .read_to_end(&mut buf)
            .context(format!(
                "Failed to read '{ca_certificate}' to the end"
            ))?;
        let ca_cert = reqwest::Certificate::from_pem(&buf).context(
            format!(
                "Failed to parse certificate from PEM file '{ca_certificate}'"
            ),
        )?;
        builder = builder.add_root_certificate(ca_cert);
    }
    Ok(builder)
}
