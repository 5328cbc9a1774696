use std::sync::Arc;

use pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};

use crate::errors::WsError;

/// format of in-memory key and certificate blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// pem armored
    #[default]
    Pem,
    /// raw der
    Asn1,
}

/// peer verification policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// skip certificate verification entirely
    None,
    /// verify the peer certificate when one is presented
    #[default]
    VerifyPeer,
    /// require and verify a peer certificate
    VerifyFailIfNoPeerCert,
}

/// security context options for the tls variants
///
/// All key/cert material is passed as in-memory blobs; nothing is read
/// from disk by this crate.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    /// private key blob, can be left empty
    pub private_key: Vec<u8>,
    /// certificate blob, can be left empty
    pub cert: Vec<u8>,
    /// certificate chain blob, can be left empty
    pub cert_chain: Vec<u8>,
    /// rsa (pkcs#1) private key blob, can be left empty
    pub rsa_private_key: Vec<u8>,
    /// format of the blobs above
    pub file_format: FileFormat,
    /// peer verification policy
    pub verify_mode: VerifyMode,
    /// overrides the host name checked against the server certificate
    pub host_name_verification: String,
}

fn load_error(what: &str, err: impl std::fmt::Display) -> WsError {
    WsError::LoadCertFailed(format!("{what}: {err}"))
}

fn parse_certs(blob: &[u8], format: FileFormat) -> Result<Vec<CertificateDer<'static>>, WsError> {
    match format {
        FileFormat::Pem => rustls_pemfile::certs(&mut &blob[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| load_error("cert", e)),
        FileFormat::Asn1 => Ok(vec![CertificateDer::from(blob.to_vec())]),
    }
}

fn parse_private_key(ctx: &SecurityContext) -> Result<PrivateKeyDer<'static>, WsError> {
    if !ctx.private_key.is_empty() {
        return match ctx.file_format {
            FileFormat::Pem => rustls_pemfile::private_key(&mut &ctx.private_key[..])
                .map_err(|e| load_error("private key", e))?
                .ok_or_else(|| WsError::LoadCertFailed("no private key in blob".to_string())),
            FileFormat::Asn1 => Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                ctx.private_key.clone(),
            ))),
        };
    }
    if !ctx.rsa_private_key.is_empty() {
        return match ctx.file_format {
            FileFormat::Pem => rustls_pemfile::rsa_private_keys(&mut &ctx.rsa_private_key[..])
                .next()
                .transpose()
                .map_err(|e| load_error("rsa private key", e))?
                .map(PrivateKeyDer::Pkcs1)
                .ok_or_else(|| WsError::LoadCertFailed("no rsa key in blob".to_string())),
            FileFormat::Asn1 => Ok(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
                ctx.rsa_private_key.clone(),
            ))),
        };
    }
    Err(WsError::LoadCertFailed("no private key given".to_string()))
}

/// trust anchors for the client: the bundled web roots plus any cert or
/// chain blob from the context
fn client_roots(ctx: &SecurityContext) -> Result<RootCertStore, WsError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for blob in [&ctx.cert, &ctx.cert_chain] {
        if blob.is_empty() {
            continue;
        }
        for cert in parse_certs(blob, ctx.file_format)? {
            roots.add(cert).map_err(|e| load_error("root cert", e))?;
        }
    }
    Ok(roots)
}

/// build the rustls client config described by the context
pub fn client_config(ctx: &SecurityContext) -> Result<ClientConfig, WsError> {
    let builder = match ctx.verify_mode {
        VerifyMode::None => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification)),
        _ => ClientConfig::builder().with_root_certificates(client_roots(ctx)?),
    };
    let config = if !ctx.private_key.is_empty() || !ctx.rsa_private_key.is_empty() {
        let certs = parse_certs(
            if ctx.cert_chain.is_empty() {
                &ctx.cert
            } else {
                &ctx.cert_chain
            },
            ctx.file_format,
        )?;
        builder
            .with_client_auth_cert(certs, parse_private_key(ctx)?)
            .map_err(|e| load_error("client auth", e))?
    } else {
        builder.with_no_client_auth()
    };
    Ok(config)
}

/// build the rustls server config described by the context
pub fn server_config(ctx: &SecurityContext) -> Result<ServerConfig, WsError> {
    let certs = parse_certs(
        if ctx.cert_chain.is_empty() {
            &ctx.cert
        } else {
            &ctx.cert_chain
        },
        ctx.file_format,
    )?;
    if certs.is_empty() {
        return Err(WsError::LoadCertFailed("no certificate given".to_string()));
    }
    let key = parse_private_key(ctx)?;

    let builder = match ctx.verify_mode {
        VerifyMode::None => ServerConfig::builder().with_no_client_auth(),
        mode => {
            let mut roots = RootCertStore::empty();
            for cert in certs.iter() {
                roots
                    .add(cert.clone())
                    .map_err(|e| load_error("client ca", e))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = if mode == VerifyMode::VerifyPeer {
                verifier.allow_unauthenticated()
            } else {
                verifier
            };
            ServerConfig::builder().with_client_cert_verifier(
                verifier
                    .build()
                    .map_err(|e| load_error("client verifier", e))?,
            )
        }
    };
    builder
        .with_single_cert(certs, key)
        .map_err(|e| load_error("server cert", e))
}

/// name presented for sni and certificate verification
///
/// `host_name_verification` overrides the connect address when set.
pub fn server_name(ctx: &SecurityContext, host: &str) -> Result<ServerName<'static>, WsError> {
    let name = if ctx.host_name_verification.is_empty() {
        host
    } else {
        ctx.host_name_verification.as_str()
    };
    ServerName::try_from(name.to_string())
        .map_err(|e| WsError::TlsFailed(format!("invalid server name `{name}`: {e}")))
}

/// verifier that accepts any server certificate, for `VerifyMode::None`
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
