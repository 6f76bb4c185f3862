// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS client credentials.
//!
//! The [`CredentialProvider`] turns a CA bundle plus a client certificate/key pair into a
//! shareable [`rustls::ClientConfig`]. The process default set is loaded at most once and
//! cached; per-source overrides are merged over the defaults field by field and loaded on
//! every request.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::ReplayError;
use crate::source::{CredentialPaths, SourceRecord};

/// Resolves the TLS configuration a source connects with.
///
/// `Ok(None)` means no TLS configuration is available (verification explicitly skipped).
#[async_trait]
pub trait TlsResolver: Send + Sync {
    async fn resolve_for(
        &self,
        source: &SourceRecord,
    ) -> Result<Option<Arc<ClientConfig>>, ReplayError>;
}

pub struct CredentialProvider {
    defaults: CredentialPaths,
    skip_verify: bool,
    default_config: OnceCell<Arc<ClientConfig>>,
}

impl CredentialProvider {
    pub fn new(defaults: CredentialPaths) -> Self {
        Self {
            defaults,
            skip_verify: false,
            default_config: OnceCell::new(),
        }
    }

    /// A provider that never loads anything and resolves every request to `None`.
    pub fn skip_verify() -> Self {
        Self {
            defaults: CredentialPaths::default(),
            skip_verify: true,
            default_config: OnceCell::new(),
        }
    }

    pub fn defaults(&self) -> &CredentialPaths {
        &self.defaults
    }

    /// Loads `paths` without consulting the cache.
    pub fn resolve(&self, paths: &CredentialPaths) -> Result<Option<Arc<ClientConfig>>, ReplayError> {
        if self.skip_verify {
            return Ok(None);
        }
        load_client_config(paths).map(Some)
    }

    /// Default credentials, loaded on first use and cached for the provider's lifetime.
    pub async fn resolve_default(&self) -> Result<Option<Arc<ClientConfig>>, ReplayError> {
        if self.skip_verify {
            return Ok(None);
        }
        let config = self
            .default_config
            .get_or_try_init(|| async { load_client_config(&self.defaults) })
            .await?;
        Ok(Some(Arc::clone(config)))
    }
}

#[async_trait]
impl TlsResolver for CredentialProvider {
    async fn resolve_for(
        &self,
        source: &SourceRecord,
    ) -> Result<Option<Arc<ClientConfig>>, ReplayError> {
        match source.credential_override() {
            Some(paths) => {
                debug!("Resolving credential override for source {}", source.name());
                self.resolve(&paths.or(&self.defaults))
            }
            None => self.resolve_default().await,
        }
    }
}

/// Restricted provider: forward secret AEAD suites and two curves only.
fn replay_crypto_provider() -> CryptoProvider {
    let base = ring::default_provider();
    CryptoProvider {
        cipher_suites: vec![
            ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        ],
        kx_groups: vec![ring::kx_group::X25519, ring::kx_group::SECP384R1],
        ..base
    }
}

fn load_client_config(paths: &CredentialPaths) -> Result<Arc<ClientConfig>, ReplayError> {
    let ca_path = required(paths.ca.as_deref(), "CA certificate")?;
    let cert_path = required(paths.cert.as_deref(), "client certificate")?;
    let key_path = required(paths.key.as_deref(), "client key")?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(ca_path)?);
    if added == 0 {
        return Err(ReplayError::CredentialLoad {
            path: ca_path.to_path_buf(),
            reason: "failed to add server CA's certificate".to_string(),
        });
    }
    if ignored > 0 {
        debug!("Ignored {ignored} unusable certificates in {}", ca_path.display());
    }

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = Arc::new(replay_crypto_provider());
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| ReplayError::CredentialLoad {
            path: ca_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| ReplayError::Configuration(format!("unsupported TLS versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CaPoolVerifier { inner: verifier }))
        .with_client_auth_cert(certs, key)
        .map_err(|e| ReplayError::CredentialLoad {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    info!(
        ca = %ca_path.display(),
        cert = %cert_path.display(),
        "Loaded TLS client credentials"
    );
    Ok(Arc::new(config))
}

fn required<'a>(path: Option<&'a Path>, what: &str) -> Result<&'a Path, ReplayError> {
    path.ok_or_else(|| {
        ReplayError::Configuration(format!("TLS requested but no {what} path is configured"))
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ReplayError> {
    let mut reader = BufReader::new(open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| load_error(path, format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(load_error(path, "no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ReplayError> {
    let mut reader = BufReader::new(open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| load_error(path, format!("failed to parse private key: {e}")))?
        .ok_or_else(|| load_error(path, "no private key found".to_string()))
}

fn open(path: &Path) -> Result<File, ReplayError> {
    File::open(path).map_err(|e| load_error(path, e.to_string()))
}

fn load_error(path: &Path, reason: String) -> ReplayError {
    ReplayError::CredentialLoad {
        path: PathBuf::from(path),
        reason,
    }
}

/// Verifies the server chain against the configured CA pool but tolerates a host name
/// mismatch: destinations are usually bare IPs that certificates do not name.
#[derive(Debug)]
struct CaPoolVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for CaPoolVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {
                debug!("Accepting certificate not issued for {server_name:?}");
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
