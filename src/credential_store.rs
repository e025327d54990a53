// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::{
    file_ops,
    identity_material::{IdentityMaterial, IdentityMaterialError},
};
use log::*;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const IDENTITY_FILE: &str = "agent_identity.pem";
pub const TRUST_FILE: &str = "agent_trust.pem";

const PEM_CERTIFICATE_HEADER: &[u8] = b"-----BEGIN CERTIFICATE-----";

#[derive(Error, Debug)]
pub enum CredentialStoreError {
    /// Error creating the store directory
    #[error("Failed to create credential store directory {path}")]
    CreateDir { path: String, source: io::Error },

    /// Error writing an artifact to its temporary location
    #[error("Failed to stage {file}")]
    Stage { file: String, source: io::Error },

    /// Error moving an artifact to its final location
    #[error("Failed to publish {file}")]
    Publish { file: String, source: io::Error },

    /// Error removing an artifact
    #[error("Failed to remove {file}")]
    Remove { file: String, source: io::Error },

    /// Error reading an artifact
    #[error("Failed to read {file}")]
    Read { file: String, source: io::Error },

    /// The cached identity cannot be decoded
    #[error("Cached identity in {file} is malformed")]
    Malformed {
        file: String,
        source: IdentityMaterialError,
    },
}

/// On-disk cache of the agent identity
///
/// The identity is kept in two artifacts inside one directory: the
/// certificate/key artifact (PKCS#8 key followed by the full chain) and the
/// trust artifact (the certificates the agent trusts). The certificate/key
/// artifact is removed first and published last, so a reader never sees it
/// next to a trust artifact from a different identity.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    identity_path: PathBuf,
    trust_path: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            identity_path: dir.join(IDENTITY_FILE),
            trust_path: dir.join(TRUST_FILE),
            dir,
        }
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    pub fn trust_path(&self) -> &Path {
        &self.trust_path
    }

    /// Whether both artifacts exist and can be read
    ///
    /// No cryptographic check is made; a mismatch is detected by the TLS
    /// layer when the identity is used.
    pub fn has_valid_registration(&self) -> bool {
        file_ops::is_readable_file(&self.identity_path)
            && file_ops::is_readable_file(&self.trust_path)
    }

    /// Replace the cached identity with `material`
    ///
    /// On error the store reports no valid registration, whatever it held
    /// before.
    pub fn persist(
        &self,
        material: &IdentityMaterial,
    ) -> Result<(), CredentialStoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| {
            CredentialStoreError::CreateDir {
                path: self.dir.display().to_string(),
                source,
            }
        })?;

        let mut identity = material.private_key().to_vec();
        identity.extend_from_slice(&material.chain_pem());
        let trust = material.trust_anchors().concat();

        let staged_identity = file_ops::stage(&self.dir, &identity, 0o600)
            .map_err(|source| CredentialStoreError::Stage {
                file: self.identity_path.display().to_string(),
                source,
            })?;
        let staged_trust = file_ops::stage(&self.dir, &trust, 0o644)
            .map_err(|source| CredentialStoreError::Stage {
                file: self.trust_path.display().to_string(),
                source,
            })?;

        self.remove(&self.identity_path)?;

        file_ops::publish(staged_trust, &self.trust_path).map_err(
            |source| CredentialStoreError::Publish {
                file: self.trust_path.display().to_string(),
                source,
            },
        )?;
        file_ops::publish(staged_identity, &self.identity_path).map_err(
            |source| CredentialStoreError::Publish {
                file: self.identity_path.display().to_string(),
                source,
            },
        )?;

        info!("Stored agent identity in {}", self.dir.display());
        Ok(())
    }

    /// Read the cached identity back, or None if there is no valid registration
    pub fn load(&self) -> Result<Option<IdentityMaterial>, CredentialStoreError> {
        if !self.has_valid_registration() {
            return Ok(None);
        }

        let file = self.identity_path.display().to_string();
        let contents = fs::read(&self.identity_path).map_err(|source| {
            CredentialStoreError::Read {
                file: file.clone(),
                source,
            }
        })?;

        let split = contents
            .windows(PEM_CERTIFICATE_HEADER.len())
            .position(|w| w == PEM_CERTIFICATE_HEADER)
            .unwrap_or(contents.len());
        let (key, chain) = contents.split_at(split);

        IdentityMaterial::from_pem(key, chain)
            .map(Some)
            .map_err(|source| CredentialStoreError::Malformed { file, source })
    }

    /// Remove both artifacts; artifacts already gone are not an error
    pub fn clear(&self) -> Result<(), CredentialStoreError> {
        self.remove(&self.identity_path)?;
        self.remove(&self.trust_path)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), CredentialStoreError> {
        if file_ops::remove_if_exists(path).map_err(|source| {
            CredentialStoreError::Remove {
                file: path.display().to_string(),
                source,
            }
        })? {
            debug!("Removed {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::generate_identity;

    fn material(cn: &str) -> IdentityMaterial {
        let id = generate_identity(cn).unwrap(); //#[allow_ci]
        IdentityMaterial::from_pem(&id.key_pem, &id.chain_pem).unwrap() //#[allow_ci]
    }

    #[test]
    fn test_empty_store_is_not_registered() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path().join("config"));

        assert!(!store.has_valid_registration());
        assert!(store.load().unwrap().is_none()); //#[allow_ci]
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path().join("config"));
        let material = material("agent-1");

        store.persist(&material).unwrap(); //#[allow_ci]

        assert!(store.has_valid_registration());
        assert_eq!(store.load().unwrap(), Some(material.clone())); //#[allow_ci]
        assert_eq!(
            fs::read(store.trust_path()).unwrap(), //#[allow_ci]
            material.trust_anchors().concat()
        );
        // Only the two artifacts, no temporary leftovers
        assert_eq!(
            fs::read_dir(dir.path().join("config")).unwrap().count(), //#[allow_ci]
            2
        );
    }

    #[test]
    fn test_persist_overwrites() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path());
        let first = material("agent-1");
        let second = material("agent-2");

        store.persist(&first).unwrap(); //#[allow_ci]
        store.persist(&second).unwrap(); //#[allow_ci]

        assert_eq!(store.load().unwrap(), Some(second)); //#[allow_ci]
    }

    #[test]
    fn test_identity_artifact_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path());
        store.persist(&material("agent-1")).unwrap(); //#[allow_ci]

        let mode = fs::metadata(store.identity_path())
            .unwrap() //#[allow_ci]
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_failed_persist_never_leaves_a_mixed_pair() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path());
        store.persist(&material("agent-1")).unwrap(); //#[allow_ci]
        assert!(store.has_valid_registration());

        // A non-empty directory in place of the trust artifact makes the
        // publication of the new trust artifact fail halfway through
        fs::remove_file(store.trust_path()).unwrap(); //#[allow_ci]
        fs::create_dir(store.trust_path()).unwrap(); //#[allow_ci]
        fs::write(store.trust_path().join("blocker"), "x").unwrap(); //#[allow_ci]

        let r = store.persist(&material("agent-2"));
        assert!(matches!(r, Err(CredentialStoreError::Publish { .. })));
        assert!(!store.has_valid_registration());
        assert!(!store.identity_path().exists());
    }

    #[test]
    fn test_trust_artifact_alone_is_not_a_registration() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path());
        store.persist(&material("agent-1")).unwrap(); //#[allow_ci]

        fs::remove_file(store.identity_path()).unwrap(); //#[allow_ci]
        assert!(!store.has_valid_registration());
        assert!(store.load().unwrap().is_none()); //#[allow_ci]
    }

    #[test]
    fn test_load_malformed() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path());
        fs::write(store.identity_path(), "garbage").unwrap(); //#[allow_ci]
        fs::write(store.trust_path(), "garbage").unwrap(); //#[allow_ci]

        assert!(store.has_valid_registration());
        assert!(matches!(
            store.load(),
            Err(CredentialStoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = CredentialStore::new(dir.path());
        store.persist(&material("agent-1")).unwrap(); //#[allow_ci]

        store.clear().unwrap(); //#[allow_ci]
        assert!(!store.has_valid_registration());
        assert!(!store.identity_path().exists());
        assert!(!store.trust_path().exists());

        store.clear().unwrap(); //#[allow_ci]
    }
}
