//! Files read while a generation starts: the node certificate and the subscription bootstrap.

use crate::error::{DaemonError, DaemonResult};
use nodesvc_core::{error, info};
use nodesvc_notify::registry::{AddressSubscription, ClientRegistry};
use std::{fs, path::Path};

/// Reads a certificate as raw bytes with the NUL padding at both ends stripped.
///
/// Never fails: an unreadable file or a content of at most one byte yields an
/// empty credential and an error in the log.
pub fn load_certificate(path: &Path) -> Vec<u8> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("get certificate {}: {}", path.display(), err);
            return vec![];
        }
    };
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
    let certificate = &bytes[start..end];
    if certificate.len() > 1 {
        return certificate.to_vec();
    }
    error!("get certificate {}: empty certificate", path.display());
    vec![]
}

pub fn load_bootstrap(path: &Path) -> DaemonResult<Vec<AddressSubscription>> {
    let content = fs::read(path).map_err(|err| DaemonError::Bootstrap { path: path.to_path_buf(), reason: err.to_string() })?;
    serde_json::from_slice(&content).map_err(|err| DaemonError::Bootstrap { path: path.to_path_buf(), reason: err.to_string() })
}

/// Fills an empty registry from the bootstrap file. A registry already holding
/// subscriptions is left untouched.
pub fn populate_registry(registry: &ClientRegistry, path: Option<&Path>) -> DaemonResult<usize> {
    let Some(path) = path else {
        return Ok(0);
    };
    if !registry.is_empty() {
        return Ok(0);
    }
    let subscriptions = load_bootstrap(path)?;
    let added = registry.extend(subscriptions);
    info!("Loaded {} subscriptions from {}", added, path.display());
    Ok(added)
}
