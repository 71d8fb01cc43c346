//! The TLS trust policy described in spec §4.1.
//!
//! Trust-chain verification is delegated to `webpki`; on top of it this
//! module layers the origin's actual practice for matching a connection's
//! target host against the certificate: try the certificate's SAN list
//! first, and when that's absent or doesn't match, walk the subject's CN
//! relative distinguished names by hand via `x509-parser`, tolerating one
//! trailing dot on either side (real certs for bare hostnames and for
//! fully-qualified ones both show up in the wild).
//!
//! `-5`/`-2` (`allow_md5`/`allow_md2`) soften a chain-verification failure
//! to an informational log line rather than a hard error. `webpki` itself
//! never implements MD5 or MD2 signature verification — those algorithms
//! are excluded from [`SIGALGS`] on purpose — so the flags can only
//! downgrade *how we react* to the resulting chain failure, not resurrect
//! the algorithms themselves.

use std::sync::Arc;
use std::time::SystemTime;

use tokio_rustls::rustls::{
    Certificate, ClientConfig, RootCertStore, ServerCertVerified, ServerCertVerifier, TLSError,
};
use tracing::warn;

use crate::util::hostnames_match;

static SIGALGS: &[&webpki::SignatureAlgorithm] = &[
    &webpki::ECDSA_P256_SHA256,
    &webpki::ECDSA_P256_SHA384,
    &webpki::ECDSA_P384_SHA256,
    &webpki::ECDSA_P384_SHA384,
    &webpki::ED25519,
    &webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA384_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA512_LEGACY_KEY,
    &webpki::RSA_PKCS1_2048_8192_SHA256,
    &webpki::RSA_PKCS1_2048_8192_SHA384,
    &webpki::RSA_PKCS1_2048_8192_SHA512,
];

/// The per-connection verifier. One is built per [`crate::url::UrlState`]
/// (spec §9 "TLS verification callback": host/flags travel with the
/// connection rather than through ambient state).
pub struct DomainVerifier {
    pub allow_md5: bool,
    pub allow_md2: bool,
}

impl DomainVerifier {
    pub fn new(allow_md5: bool, allow_md2: bool) -> Arc<dyn ServerCertVerifier> {
        Arc::new(DomainVerifier { allow_md5, allow_md2 })
    }
}

impl ServerCertVerifier for DomainVerifier {
    fn verify_server_cert(
        &self,
        roots: &RootCertStore,
        presented_certs: &[Certificate],
        dns_name: webpki::DNSNameRef<'_>,
        _ocsp_response: &[u8],
    ) -> Result<ServerCertVerified, TLSError> {
        let end_entity_der = presented_certs
            .first()
            .ok_or(TLSError::NoCertificatesPresented)?;
        let intermediates: Vec<&[u8]> = presented_certs[1..].iter().map(|c| c.0.as_ref()).collect();

        let end_entity = webpki::EndEntityCert::from(&end_entity_der.0)
            .map_err(|e| TLSError::General(format!("could not parse certificate: {:?}", e)))?;

        let trust_anchors: Vec<webpki::TrustAnchor> = roots
            .roots
            .iter()
            .map(|anchor| webpki::TrustAnchor {
                subject: &anchor.subject,
                spki: &anchor.spki,
                name_constraints: anchor.name_constraints.as_deref(),
            })
            .collect();

        let chain_result = end_entity.verify_is_valid_tls_server_cert(
            SIGALGS,
            &webpki::TlsServerTrustAnchors(&trust_anchors),
            &intermediates,
            webpki::Time::try_from(SystemTime::now())
                .map_err(|_| TLSError::FailedToGetCurrentTime)?,
        );

        let chain_fatal = match &chain_result {
            Ok(()) => None,
            Err(e) => {
                if self.allow_md5 || self.allow_md2 {
                    warn!("ignoring certificate chain error (allowed by -2/-5): {:?}", e);
                    None
                } else {
                    Some(format!("{:?}", e))
                }
            }
        };

        let host = dns_name.as_ref().to_owned();
        let host_str: &str = host.as_ref().into();

        let matched = end_entity.verify_is_valid_for_dns_name(dns_name).is_ok()
            || subject_cn_matches(&end_entity_der.0, host_str);

        if !matched {
            return Err(TLSError::General(format!(
                "certificate does not match host '{}'",
                host_str
            )));
        }
        if let Some(reason) = chain_fatal {
            return Err(TLSError::General(format!(
                "certificate chain not trusted: {}",
                reason
            )));
        }

        Ok(ServerCertVerified::assertion())
    }
}

/// Everything a connection needs to perform TLS trust evaluation: the
/// verifier callback plus any additional trust anchors supplied via `-a`.
/// Built once at startup and shared by every worker's socket, since the
/// trust policy is process-wide (spec §9 "TLS verification callback").
pub struct TlsContext {
    verifier: Arc<dyn ServerCertVerifier>,
    extra_roots: Vec<Certificate>,
}

impl TlsContext {
    pub fn new(allow_md5: bool, allow_md2: bool, extra_roots: Vec<Certificate>) -> Arc<Self> {
        Arc::new(TlsContext {
            verifier: DomainVerifier::new(allow_md5, allow_md2),
            extra_roots,
        })
    }

    /// A fresh `ClientConfig` trusting the bundled `webpki-roots` set plus
    /// any `-a`-supplied CA certificates, with our own hostname/chain
    /// verifier installed in place of rustls's default.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .root_store
            .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
        for cert in &self.extra_roots {
            if let Err(e) = config.root_store.add(cert) {
                warn!("ignoring unparseable CA certificate from -a file: {:?}", e);
            }
        }
        config
            .dangerous()
            .set_certificate_verifier(Arc::clone(&self.verifier));
        config
    }
}

/// Fallback hostname check: parse the leaf certificate's subject and walk
/// its CN relative distinguished names, matching spec §4.1 step 3.
fn subject_cn_matches(der: &[u8], host: &str) -> bool {
    let (_, cert) = match x509_parser::parse_x509_certificate(der) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    cert.subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| hostnames_match(cn, host))
}
