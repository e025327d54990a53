// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors

use openssl::{
    nid::Nid,
    pkey::{PKey, Private},
    x509::X509,
};
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Certificate has no Common Name entry
    #[error("certificate subject has no Common Name entry")]
    MissingCommonName,

    /// Error encoding PKey structure in PKCS#8 format
    #[error("failed to encode PKey structure in PKCS#8 format")]
    PKeyToPKCS8(#[source] openssl::error::ErrorStack),

    /// Error decoding private key from PEM
    #[error("failed to decode private key from PEM")]
    PrivateKeyFromPEMError(#[source] openssl::error::ErrorStack),

    /// Error comparing public keys
    #[error("failed to compare public keys")]
    PublicKeyCompareError(#[source] openssl::error::ErrorStack),

    /// Error converting bytes to String
    #[error("failed to convert bytes to String")]
    StringFromVec(#[from] FromUtf8Error),

    /// Error decoding X509 certificate chain from PEM
    #[error("failed to decode X509 certificate chain from PEM")]
    X509ChainFromPEMError(#[source] openssl::error::ErrorStack),

    /// Error obtaining certificate public key
    #[error("failed to get certificate public key")]
    X509GetPublicError(#[source] openssl::error::ErrorStack),

    /// Error encoding X509 certificate in PEM format
    #[error("failed to encode X509 certificate in PEM format")]
    X509ToPEMError(#[source] openssl::error::ErrorStack),
}

/// Decode a private key in any PEM encoding openssl understands
pub fn private_key_from_pem(pem: &[u8]) -> Result<PKey<Private>, CryptoError> {
    PKey::private_key_from_pem(pem).map_err(CryptoError::PrivateKeyFromPEMError)
}

/// Encode the private key as unencrypted PKCS#8 PEM
///
/// The TLS backend only accepts client keys in this encoding
pub fn private_key_to_pkcs8_pem(
    key: &PKey<Private>,
) -> Result<Vec<u8>, CryptoError> {
    key.private_key_to_pem_pkcs8()
        .map_err(CryptoError::PKeyToPKCS8)
}

/// Decode every certificate found in a PEM buffer, in order
pub fn x509_chain_from_pem(pem: &[u8]) -> Result<Vec<X509>, CryptoError> {
    X509::stack_from_pem(pem).map_err(CryptoError::X509ChainFromPEMError)
}

/// Encode the X509 certificate in PEM format
pub fn x509_to_pem(cert: &X509) -> Result<Vec<u8>, CryptoError> {
    cert.to_pem().map_err(CryptoError::X509ToPEMError)
}

/// Get the subject Common Name of the certificate
pub fn x509_common_name(cert: &X509) -> Result<String, CryptoError> {
    let entry = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .ok_or(CryptoError::MissingCommonName)?;
    let cn = entry
        .data()
        .as_utf8()
        .map_err(|_| CryptoError::MissingCommonName)?;
    Ok(cn.to_string())
}

/// Check that the private key is the counterpart of the certificate public key
pub fn key_matches_cert(
    key: &PKey<Private>,
    cert: &X509,
) -> Result<bool, CryptoError> {
    let cert_pubkey =
        cert.public_key().map_err(CryptoError::X509GetPublicError)?;
    Ok(key.public_eq(&cert_pubkey))
}

pub mod testing {
    use super::*;
    use openssl::{
        asn1::Asn1Time,
        bn::BigNum,
        ec::{EcGroup, EcKey},
        hash::MessageDigest,
        x509::{
            extension::{BasicConstraints, KeyUsage},
            X509Name, X509NameBuilder,
        },
    };

    #[derive(Error, Debug)]
    pub enum CryptoTestError {
        /// Crypto error
        #[error("CryptoError")]
        CryptoError(#[from] CryptoError),

        /// OpenSSL error
        #[error("OpenSSLError")]
        OpenSSLError(#[from] openssl::error::ErrorStack),
    }

    /// PEM encoded identity as a registration endpoint would issue it
    #[derive(Debug, Clone)]
    pub struct TestIdentity {
        pub key_pem: Vec<u8>,
        /// Leaf first, then the issuing CA
        pub chain_pem: Vec<u8>,
        pub ca_pem: Vec<u8>,
    }

    fn ec_generate() -> Result<PKey<Private>, CryptoTestError> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
    }

    fn name(cn: &str) -> Result<X509Name, CryptoTestError> {
        let mut builder = X509NameBuilder::new()?;
        builder.append_entry_by_nid(Nid::COMMONNAME, cn)?;
        Ok(builder.build())
    }

    fn sign_certificate(
        subject: &X509Name,
        issuer: &X509Name,
        subject_key: &PKey<Private>,
        issuer_key: &PKey<Private>,
        serial: u32,
        is_ca: bool,
    ) -> Result<X509, CryptoTestError> {
        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial = BigNum::from_u32(serial)?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(subject)?;
        builder.set_issuer_name(issuer)?;
        builder.set_pubkey(subject_key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(365)?;
        builder.set_not_after(&not_after)?;
        if is_ca {
            builder.append_extension(
                BasicConstraints::new().critical().ca().build()?,
            )?;
            builder.append_extension(
                KeyUsage::new().critical().key_cert_sign().crl_sign().build()?,
            )?;
        } else {
            builder.append_extension(BasicConstraints::new().build()?)?;
            builder.append_extension(
                KeyUsage::new().critical().digital_signature().build()?,
            )?;
        }
        builder.sign(issuer_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// Issue a client identity for `common_name` signed by a fresh test CA
    pub fn generate_identity(
        common_name: &str,
    ) -> Result<TestIdentity, CryptoTestError> {
        let ca_key = ec_generate()?;
        let ca_name = name("Test Agent CA")?;
        let ca_cert =
            sign_certificate(&ca_name, &ca_name, &ca_key, &ca_key, 1, true)?;

        let leaf_key = ec_generate()?;
        let leaf_cert = sign_certificate(
            &name(common_name)?,
            &ca_name,
            &leaf_key,
            &ca_key,
            2,
            false,
        )?;

        let ca_pem = x509_to_pem(&ca_cert)?;
        let mut chain_pem = x509_to_pem(&leaf_cert)?;
        chain_pem.extend_from_slice(&ca_pem);

        Ok(TestIdentity {
            key_pem: private_key_to_pkcs8_pem(&leaf_key)?,
            chain_pem,
            ca_pem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_is_consistent() {
        let identity = testing::generate_identity("agent-1").unwrap(); //#[allow_ci]
        let key = private_key_from_pem(&identity.key_pem).unwrap(); //#[allow_ci]
        let chain = x509_chain_from_pem(&identity.chain_pem).unwrap(); //#[allow_ci]

        assert_eq!(chain.len(), 2);
        assert!(key_matches_cert(&key, &chain[0]).unwrap()); //#[allow_ci]
        assert!(!key_matches_cert(&key, &chain[1]).unwrap()); //#[allow_ci]
        assert_eq!(x509_common_name(&chain[0]).unwrap(), "agent-1"); //#[allow_ci]
        assert_eq!(x509_common_name(&chain[1]).unwrap(), "Test Agent CA"); //#[allow_ci]
    }

    #[test]
    fn test_private_key_from_pem_invalid() {
        let r = private_key_from_pem(b"not a key");
        assert!(matches!(r, Err(CryptoError::PrivateKeyFromPEMError(_))));
    }

    #[test]
    fn test_x509_chain_from_pem_garbage() {
        let r = x509_chain_from_pem(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n");
        assert!(r.is_err());
    }
}
