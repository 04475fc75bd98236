//! nkey credentials for the secured NATS connection

use crate::{Error, Result};
use nkeys::KeyPair;
use std::path::Path;

/// Connection credential derived from an nkey user seed
#[derive(Clone, PartialEq, Eq)]
pub struct SecureOption {
    seed: String,
    public_key: String,
}

impl SecureOption {
    /// Public user key the broker will see
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub(crate) fn seed(&self) -> &str {
        &self.seed
    }
}

impl std::fmt::Debug for SecureOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureOption")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Reads an nkey user seed from `seed_path`.
///
/// The file may hold just the seed or be a decorated credentials file; the
/// first non-comment line starting with `S` is taken as the seed.
pub fn build_secure_option(seed_path: impl AsRef<Path>) -> Result<SecureOption> {
    let path = seed_path.as_ref();
    let credential_error = |reason: String| Error::Credential {
        path: path.to_path_buf(),
        reason,
    };

    let contents =
        std::fs::read_to_string(path).map_err(|error| credential_error(error.to_string()))?;
    let seed =
        find_seed(&contents).ok_or_else(|| credential_error("no seed found".to_owned()))?;

    let key_pair =
        KeyPair::from_seed(seed).map_err(|error| credential_error(error.to_string()))?;
    let public_key = key_pair.public_key();

    if !public_key.starts_with('U') {
        return Err(credential_error("not a valid nkey user seed".to_owned()));
    }

    Ok(SecureOption {
        seed: seed.to_owned(),
        public_key,
    })
}

fn find_seed(contents: &str) -> Option<&str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .find(|line| line.starts_with('S'))
}
