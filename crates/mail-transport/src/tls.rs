//! TLS connector construction and peer verification.
//!
//! Certificate chains are checked during the handshake, hostnames are
//! checked afterwards by [`verify_peer`]. Keeping the two apart lets
//! trust-all mode skip both while still verifying handshake signatures.
//!
//! Hostnames match exactly, by IP address, or by a `*.` wildcard entry
//! covering any host under its suffix: `*.example.com` matches both
//! `foo.example.com` and `foo.bar.example.com`.

use std::net::IpAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{trace, warn};
use webpki::EndEntityCert;

use crate::config::Config;
use crate::status::{DataChannelState, StatusListener};
use crate::{Error, Result};

/// Creates the connector used to upgrade a connected socket.
///
/// With [`Flags::TRUST_ALL`](crate::Flags::TRUST_ALL) any certificate chain
/// is accepted. Otherwise the chain must lead to a bundled web PKI root or
/// to one of [`Config::extra_root_certificates`].
pub fn create_tls_connector(config: &Config) -> Result<TlsConnector> {
    let provider = crypto_provider();
    let roots = if config.trusts_all_certificates() {
        None
    } else {
        let mut root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        for certificate in &config.extra_root_certificates {
            root_store.add(certificate.clone())?;
        }
        Some(Arc::new(root_store))
    };

    let verifier = UpgradeVerifier {
        roots,
        algorithms: provider.signature_verification_algorithms,
    };

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Verifies the peer identity after the handshake.
///
/// `peer_certificates` is the chain of the negotiated session, end entity
/// first. The listener is told about a [`DataChannelState::CommunicationError`]
/// before any error is returned.
pub fn verify_peer(
    peer_certificates: Option<&[CertificateDer<'_>]>,
    host: &str,
    listener: &dyn StatusListener,
) -> Result<()> {
    let Some(end_entity) = peer_certificates.and_then(|chain| chain.first()) else {
        warn!(host, "TLS session carries no peer certificate");
        listener.set_data_channel_state(DataChannelState::CommunicationError);
        return Err(Error::Ssl("cannot verify SSL socket without session".to_string()));
    };

    let server_name = ServerName::try_from(host)?;
    let verified = ParsedCertificate::try_from(end_entity)
        .and_then(|certificate| verify_server_name(&certificate, &server_name));

    if let Err(err) = verified {
        if wildcard_covers(end_entity, host) {
            trace!(host, "hostname matched by wildcard suffix");
            return Ok(());
        }
        warn!(host, error = %err, "certificate hostname mismatch");
        listener.set_data_channel_state(DataChannelState::CommunicationError);
        return Err(Error::PeerUnverified {
            host: host.to_string(),
            principal: err.to_string(),
        });
    }

    Ok(())
}

/// Returns true if a `*.suffix` DNS name of the certificate covers `host`
/// at any depth below `suffix`.
fn wildcard_covers(end_entity: &CertificateDer<'_>, host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return false;
    }
    let Ok(certificate) = EndEntityCert::try_from(end_entity) else {
        return false;
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    certificate
        .valid_dns_names()
        .filter_map(|name| name.strip_prefix("*."))
        .map(|suffix| suffix.trim_end_matches('.').to_ascii_lowercase())
        .any(|suffix| {
            host.strip_suffix(suffix.as_str())
                .and_then(|labels| labels.strip_suffix('.'))
                .is_some_and(|labels| !labels.is_empty())
        })
}

/// Chain verifier that leaves hostname matching to [`verify_peer`].
///
/// `roots: None` accepts any chain.
#[derive(Debug)]
struct UpgradeVerifier {
    roots: Option<Arc<RootCertStore>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for UpgradeVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some(roots) = &self.roots {
            let certificate = ParsedCertificate::try_from(end_entity)?;
            verify_server_cert_signed_by_trust_anchor(
                &certificate,
                roots,
                intermediates,
                now,
                self.algorithms.all,
            )?;
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
