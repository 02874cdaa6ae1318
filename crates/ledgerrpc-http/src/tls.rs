//! TLS settings for the `reqwest` client.

use std::fs;
use std::path::Path;

use ledgerrpc_core::error::RpcError;
use ledgerrpc_core::TlsConfig;

/// Apply CA bundle, client identity and verification settings to `builder`.
pub(crate) fn apply(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder, RpcError> {
    if let Some(ca_file) = &tls.ca_file {
        let pem = read_pem(ca_file)?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            RpcError::Config(format!("invalid CA bundle {}: {e}", ca_file.display()))
        })?;
        if certs.is_empty() {
            return Err(RpcError::Config(format!(
                "CA bundle {} contains no certificates",
                ca_file.display()
            )));
        }
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
        let mut pem = read_pem(cert_file)?;
        pem.push(b'\n');
        pem.extend(read_pem(key_file)?);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
            RpcError::Config(format!(
                "invalid client identity {} / {}: {e}",
                cert_file.display(),
                key_file.display()
            ))
        })?;
        builder = builder.identity(identity);
    }

    if tls.insecure_skip_verify {
        tracing::warn!("TLS certificate verification disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, RpcError> {
    fs::read(path).map_err(|e| RpcError::Config(format!("reading {}: {e}", path.display())))
}
