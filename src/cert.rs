//! TLS certificate helper
//!
//! Reuses the configured certificate and key when both files exist,
//! otherwise generates a self-signed ECDSA P-256 certificate into the
//! configured (or default) locations.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{generate_simple_self_signed, CertifiedKey};
use tracing::info;

use crate::error::{Result, ShuntError};

pub const DEFAULT_CERT_PATH: &str = "certs/selfsigned.crt";
pub const DEFAULT_KEY_PATH: &str = "certs/selfsigned.key";

/// Return usable certificate and key paths, generating a self-signed pair
/// when the configured files are missing.
pub fn ensure_cert(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<(PathBuf, PathBuf)> {
    let cert_path = PathBuf::from(cert_path.unwrap_or(DEFAULT_CERT_PATH));
    let key_path = PathBuf::from(key_path.unwrap_or(DEFAULT_KEY_PATH));

    if file_exists(&cert_path) && file_exists(&key_path) {
        return Ok((cert_path, key_path));
    }

    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "TLS material not found, generating self-signed certificate"
    );

    for parent in [cert_path.parent(), key_path.parent()].into_iter().flatten() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ShuntError::Tls(e.to_string()))?;

    fs::write(&cert_path, cert.pem())?;
    fs::write(&key_path, key_pair.serialize_pem())?;

    Ok((cert_path, key_path))
}

fn file_exists(path: &Path) -> bool {
    path.is_file()
}
