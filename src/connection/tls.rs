//! TLS for `https://` endpoints
//!
//! One rustls `ClientConfig` is shared by the HTTP channel and the `wss://`
//! socket so both trust the same roots.

use crate::{Error, Result};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Where trusted root certificates come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSource {
    /// Platform store, or the bundled roots when it is empty
    System,
    /// Bundled Mozilla roots only
    Bundled,
    /// PEM file holding a private CA
    CaFile(PathBuf),
    /// PEM text holding a private CA
    CaPem(String),
}

/// TLS settings for a scope server
///
/// # Examples
///
/// ```ignore
/// use scope_client::connection::TlsConfig;
///
/// let tls = TlsConfig::builder().ca_file("/etc/scope/ca.pem").build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    source: RootSource,
    roots: usize,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Builder trusting the system roots
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder {
            source: RootSource::System,
        }
    }

    /// Compiled rustls configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Root source actually in use
    ///
    /// `System` falls back to `Bundled` when the platform store is empty.
    pub fn source(&self) -> &RootSource {
        &self.source
    }

    /// Number of trusted roots
    pub fn root_count(&self) -> usize {
        self.roots
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            RootSource::CaPem(_) => "pem",
            RootSource::CaFile(_) => "file",
            RootSource::Bundled => "bundled",
            RootSource::System => "system",
        };
        f.debug_struct("TlsConfig")
            .field("source", &source)
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TlsConfig`]
#[derive(Debug)]
pub struct TlsConfigBuilder {
    source: RootSource,
}

impl TlsConfigBuilder {
    /// Trust only the CA certificates in a PEM file
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = RootSource::CaFile(path.into());
        self
    }

    /// Trust only the CA certificates in PEM text
    pub fn ca_pem(mut self, pem: impl Into<String>) -> Self {
        self.source = RootSource::CaPem(pem.into());
        self
    }

    /// Trust only the bundled roots
    pub fn bundled_roots(mut self) -> Self {
        self.source = RootSource::Bundled;
        self
    }

    /// Load the roots and compile the rustls configuration
    ///
    /// Fails with `Config` when a CA file cannot be read or holds no
    /// certificate.
    pub fn build(self) -> Result<TlsConfig> {
        let (source, store) = match self.source {
            RootSource::CaFile(path) => {
                let pem = std::fs::read(&path).map_err(|e| {
                    Error::Config(format!("cannot read CA file {}: {}", path.display(), e))
                })?;
                let store = pem_store(&pem, &path.display().to_string())?;
                (RootSource::CaFile(path), store)
            }
            RootSource::CaPem(pem) => {
                let store = pem_store(pem.as_bytes(), "inline PEM")?;
                (RootSource::CaPem(pem), store)
            }
            RootSource::Bundled => (RootSource::Bundled, bundled_store()),
            RootSource::System => system_store(),
        };

        let roots = store.len();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("TLS protocol setup failed: {}", e)))?
            .with_root_certificates(store)
            .with_no_client_auth();

        tracing::debug!(roots, "TLS configured");
        Ok(TlsConfig {
            source,
            roots,
            client_config: Arc::new(client_config),
        })
    }
}

fn pem_store(pem: &[u8], origin: &str) -> Result<RootCertStore> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Config(format!("invalid PEM in {}: {}", origin, e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("no certificate found in {}", origin)));
    }

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Config(format!(
            "no usable certificate in {} ({} rejected)",
            origin, ignored
        )));
    }
    Ok(store)
}

fn system_store() -> (RootSource, RootCertStore) {
    let native = rustls_native_certs::load_native_certs();
    let mut store = RootCertStore::empty();
    store.add_parsable_certificates(native.certs);
    if store.is_empty() {
        tracing::debug!(
            errors = native.errors.len(),
            "platform root store empty, using bundled roots"
        );
        return (RootSource::Bundled, bundled_store());
    }
    (RootSource::System, store)
}

fn bundled_store() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_roots() {
        let tls = TlsConfig::builder().bundled_roots().build().unwrap();
        assert_eq!(tls.source(), &RootSource::Bundled);
        assert!(tls.root_count() > 0);
    }

    #[test]
    fn test_missing_ca_file() {
        let err = TlsConfig::builder()
            .ca_file("/nonexistent/scope-ca.pem")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.starts_with("cannot read CA file")));
    }

    #[test]
    fn test_pem_without_certificates() {
        let err = TlsConfig::builder()
            .ca_pem("not a certificate\n")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("no certificate found")));
    }

    #[test]
    fn test_debug_hides_pem() {
        let tls = TlsConfig::builder().bundled_roots().build().unwrap();
        let debug = format!("{:?}", tls);
        assert!(debug.contains("bundled"));
        assert!(!debug.contains("client_config"));
    }
}
