//! The two client-authentication modes for the mTLS credential fetch: plain
//! files, or a PKCS#11 token whose private key never leaves the module.

use crate::error::CredentialError;
use crate::identity::{DeviceIdentity, KeyRef, Pkcs11Config};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::object::{Attribute, AttributeType, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use rustls::client::ResolvesClientCert;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::{CertifiedKey, Signer, SigningKey};
use rustls::{RootCertStore, SignatureAlgorithm, SignatureScheme};
use std::fmt;
use std::io::BufReader;
use std::sync::{Arc, Mutex};

/// The prefix that flags a DER (as opposed to already-PEM) certificate
/// blob, used to decide whether a PKCS#11-sourced certificate needs
/// conversion before it is handed to the TLS stack.
const PEM_CERT_MARKER: &str = "-----BEGIN CERTIFICATE-----";

pub enum KeyMaterial {
    File {
        ca_path: String,
        certificate_path: String,
        private_key_path: String,
    },
    Pkcs11 {
        ca_path: String,
        certificate_ref: KeyRef,
        private_key_ref: KeyRef,
        pkcs11: Pkcs11Config,
    },
}

impl KeyMaterial {
    pub fn from_identity(identity: &DeviceIdentity) -> Result<Self, CredentialError> {
        let uses_pkcs11 = identity.private_key_ref.is_pkcs11() || identity.certificate_ref.is_pkcs11();
        if !uses_pkcs11 {
            let (KeyRef::File(certificate_path) | KeyRef::Pkcs11(certificate_path)) = &identity.certificate_ref;
            let (KeyRef::File(private_key_path) | KeyRef::Pkcs11(private_key_path)) = &identity.private_key_ref;
            return Ok(KeyMaterial::File {
                ca_path: identity.ca_path.clone(),
                certificate_path: certificate_path.clone(),
                private_key_path: private_key_path.clone(),
            });
        }

        let pkcs11 = identity
            .pkcs11
            .clone()
            .ok_or_else(|| CredentialError::TlsSetup("pkcs11 key reference without pkcs11 config".into()))?;

        Ok(KeyMaterial::Pkcs11 {
            ca_path: identity.ca_path.clone(),
            certificate_ref: identity.certificate_ref.clone(),
            private_key_ref: identity.private_key_ref.clone(),
            pkcs11,
        })
    }

    pub fn build_client_tls_config(&self) -> Result<rustls::ClientConfig, CredentialError> {
        let roots = match self {
            KeyMaterial::File { ca_path, .. } | KeyMaterial::Pkcs11 { ca_path, .. } => load_root_store(ca_path)?,
        };

        let builder = rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .with_root_certificates(roots);

        match self {
            KeyMaterial::File {
                certificate_path,
                private_key_path,
                ..
            } => {
                let cert_chain = load_cert_chain(certificate_path)?;
                let key = load_private_key(private_key_path)?;
                builder
                    .with_client_auth_cert(cert_chain, key)
                    .map_err(|err| CredentialError::TlsSetup(err.to_string()))
            }
            KeyMaterial::Pkcs11 {
                certificate_ref,
                private_key_ref,
                pkcs11,
                ..
            } => {
                // One PKCS#11 session, shared by whichever of cert/key actually
                // lives on the token — a second C_Initialize on the same module
                // without an intervening C_Finalize fails with
                // CKR_CRYPTOKI_ALREADY_INITIALIZED.
                let session = Arc::new(Mutex::new(open_session(pkcs11)?));
                let cert_chain = resolve_certificate(certificate_ref, &session)?;
                let signing_key = resolve_signing_key(private_key_ref, &session)?;
                let resolver = Arc::new(StaticClientCertResolver {
                    certified_key: Arc::new(CertifiedKey::new(cert_chain, signing_key)),
                });
                Ok(builder.with_client_cert_resolver(resolver))
            }
        }
    }
}

fn load_root_store(ca_path: &str) -> Result<RootCertStore, CredentialError> {
    let pem = std::fs::read(ca_path).map_err(|err| CredentialError::TlsSetup(format!("reading CA bundle {ca_path}: {err}")))?;
    let mut reader = BufReader::new(pem.as_slice());
    let mut store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|err| CredentialError::TlsSetup(format!("parsing CA bundle {ca_path}: {err}")))?;
        store
            .add(cert)
            .map_err(|err| CredentialError::TlsSetup(format!("adding CA cert from {ca_path}: {err}")))?;
    }
    Ok(store)
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let pem = std::fs::read(path).map_err(|err| CredentialError::TlsSetup(format!("reading certificate {path}: {err}")))?;
    let mut reader = BufReader::new(pem.as_slice());
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CredentialError::TlsSetup(format!("parsing certificate {path}: {err}")))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, CredentialError> {
    let pem = std::fs::read(path).map_err(|err| CredentialError::TlsSetup(format!("reading private key {path}: {err}")))?;
    let mut reader = BufReader::new(pem.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| CredentialError::TlsSetup(format!("parsing private key {path}: {err}")))?
        .ok_or_else(|| CredentialError::TlsSetup(format!("no private key found in {path}")))
}

/// The certificate may be a plain file, or itself addressed by a `pkcs11:`
/// URI (read from the token as ASN.1/DER and converted to PEM) — independent
/// of whether the private key lives on the token too.
fn resolve_certificate(
    certificate_ref: &KeyRef,
    session: &Arc<Mutex<Session>>,
) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    match certificate_ref {
        KeyRef::File(path) => load_cert_chain(path),
        KeyRef::Pkcs11(uri) => {
            let label = crate::identity::pkcs11::parse_pkcs11_uri(uri)
                .map_err(|err| CredentialError::TlsSetup(err.to_string()))?
                .object;
            let der = read_pkcs11_certificate_der(session, &label)?;
            Ok(vec![CertificateDer::from(der)])
        }
    }
}

/// The private key may be a plain file (loaded once, handed to rustls
/// directly) or a `pkcs11:` URI (kept on the token; every TLS handshake
/// signs through the shared session instead).
fn resolve_signing_key(
    private_key_ref: &KeyRef,
    session: &Arc<Mutex<Session>>,
) -> Result<Arc<dyn SigningKey>, CredentialError> {
    match private_key_ref {
        KeyRef::File(path) => {
            let key = load_private_key(path)?;
            rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
                .map_err(|err| CredentialError::TlsSetup(format!("loading private key {path}: {err}")))
        }
        KeyRef::Pkcs11(uri) => {
            let label = crate::identity::pkcs11::parse_pkcs11_uri(uri)
                .map_err(|err| CredentialError::TlsSetup(err.to_string()))?
                .object;
            let key_handle = find_pkcs11_object(session, &label, cryptoki::object::ObjectClass::PRIVATE_KEY)?;
            Ok(Arc::new(Pkcs11SigningKey {
                session: session.clone(),
                key_handle,
                scheme: SignatureScheme::RSA_PKCS1_SHA256,
            }))
        }
    }
}

fn open_session(pkcs11: &Pkcs11Config) -> Result<Session, CredentialError> {
    let ctx = Pkcs11::new(&pkcs11.library)
        .map_err(|err| CredentialError::TlsSetup(format!("loading PKCS#11 module {}: {err}", pkcs11.library)))?;
    ctx.initialize(CInitializeArgs::OsThreads)
        .map_err(|err| CredentialError::TlsSetup(format!("initializing PKCS#11 module: {err}")))?;

    let slots = ctx
        .get_slots_with_token()
        .map_err(|err| CredentialError::TlsSetup(format!("listing PKCS#11 slots: {err}")))?;
    let slot = *slots
        .get(pkcs11.slot as usize)
        .ok_or_else(|| CredentialError::TlsSetup(format!("PKCS#11 slot {} not present", pkcs11.slot)))?;

    let session = ctx
        .open_rw_session(slot)
        .map_err(|err| CredentialError::TlsSetup(format!("opening PKCS#11 session: {err}")))?;
    session
        .login(UserType::User, Some(&AuthPin::new(pkcs11.user_pin.clone())))
        .map_err(|err| CredentialError::TlsSetup(format!("PKCS#11 login failed: {err}")))?;
    Ok(session)
}

fn find_object(session: &Session, label: &str, class_attr: Attribute) -> Result<ObjectHandle, CredentialError> {
    let template = vec![
        class_attr,
        Attribute::Label(label.as_bytes().to_vec()),
    ];
    let handles = session
        .find_objects(&template)
        .map_err(|err| CredentialError::TlsSetup(format!("finding PKCS#11 object {label:?}: {err}")))?;
    handles
        .into_iter()
        .next()
        .ok_or_else(|| CredentialError::TlsSetup(format!("no PKCS#11 object found with label {label:?}")))
}

fn find_pkcs11_object(
    session: &Arc<Mutex<Session>>,
    label: &str,
    class: cryptoki::object::ObjectClass,
) -> Result<ObjectHandle, CredentialError> {
    let guard = session.lock().expect("pkcs11 session mutex poisoned");
    find_object(&guard, label, Attribute::Class(class))
}

fn read_pkcs11_certificate_der(session: &Arc<Mutex<Session>>, label: &str) -> Result<Vec<u8>, CredentialError> {
    let handle = find_pkcs11_object(session, label, cryptoki::object::ObjectClass::CERTIFICATE)?;
    let guard = session.lock().expect("pkcs11 session mutex poisoned");
    let attrs = guard
        .get_attributes(handle, &[AttributeType::Value])
        .map_err(|err| CredentialError::TlsSetup(format!("reading PKCS#11 certificate value: {err}")))?;
    let raw = attrs
        .into_iter()
        .find_map(|attr| match attr {
            Attribute::Value(bytes) => Some(bytes),
            _ => None,
        })
        .ok_or_else(|| CredentialError::TlsSetup("PKCS#11 certificate object has no value".into()))?;

    // Detect format by the PEM marker; DER needs no decoding beyond this —
    // rustls consumes raw DER bytes directly, so "conversion" here is only
    // needed when the object already carries PEM text.
    if raw.starts_with(PEM_CERT_MARKER.as_bytes()) {
        let mut reader = BufReader::new(raw.as_slice());
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CredentialError::TlsSetup(format!("parsing PEM certificate from token: {err}")))?;
        Ok(certs.into_iter().next().map(|c| c.to_vec()).unwrap_or(raw))
    } else {
        Ok(raw)
    }
}

/// Performs `C_Sign` through a PKCS#11 session for each TLS handshake
/// signature, rather than exporting the private key into process memory.
/// The session handle is wrapped in a mutex: PKCS#11 sessions are not
/// guaranteed safe for concurrent use from multiple threads.
struct Pkcs11SigningKey {
    session: Arc<Mutex<Session>>,
    key_handle: ObjectHandle,
    scheme: SignatureScheme,
}

impl fmt::Debug for Pkcs11SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11SigningKey").finish_non_exhaustive()
    }
}

impl SigningKey for Pkcs11SigningKey {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        if offered.contains(&self.scheme) {
            Some(Box::new(Pkcs11Signer {
                session: self.session.clone(),
                key_handle: self.key_handle,
                scheme: self.scheme,
            }))
        } else {
            None
        }
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::RSA
    }
}

struct Pkcs11Signer {
    session: Arc<Mutex<Session>>,
    key_handle: ObjectHandle,
    scheme: SignatureScheme,
}

impl fmt::Debug for Pkcs11Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11Signer").finish_non_exhaustive()
    }
}

impl Signer for Pkcs11Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, rustls::Error> {
        let session = self.session.lock().expect("pkcs11 session mutex poisoned");
        session
            .sign(&cryptoki::mechanism::Mechanism::Sha256RsaPkcs, self.key_handle, message)
            .map_err(|err| rustls::Error::General(format!("PKCS#11 C_Sign failed: {err}")))
    }

    fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

/// A `ResolvesClientCert` that always offers the one certified key built at
/// startup — this server has exactly one identity per process.
struct StaticClientCertResolver {
    certified_key: Arc<CertifiedKey>,
}

impl fmt::Debug for StaticClientCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticClientCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesClientCert for StaticClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        if self.certified_key.key.choose_scheme(sigschemes).is_some() {
            Some(self.certified_key.clone())
        } else {
            None
        }
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceIdentity;

    fn identity(private_key_ref: KeyRef, certificate_ref: KeyRef, pkcs11: Option<Pkcs11Config>) -> DeviceIdentity {
        DeviceIdentity {
            account_id: "123456789012".to_string(),
            ca_path: "/etc/ota/ca.pem".to_string(),
            private_key_ref,
            certificate_ref,
            thing_name: "my-profile-edge-abc123-Core".to_string(),
            profile: "my-profile".to_string(),
            region: "us-east-1".to_string(),
            credential_endpoint: "credentials.example.com".to_string(),
            pkcs11,
        }
    }

    #[test]
    fn both_file_refs_yield_file_variant() {
        let identity = identity(
            KeyRef::File("/etc/ota/key.pem".to_string()),
            KeyRef::File("/etc/ota/cert.pem".to_string()),
            None,
        );
        let material = KeyMaterial::from_identity(&identity).unwrap();
        assert!(matches!(material, KeyMaterial::File { .. }));
    }

    #[test]
    fn file_private_key_with_pkcs11_certificate_is_not_parsed_as_a_uri() {
        // Key-in-file, cert-on-token: `private_key_ref` is a plain path, not
        // a `pkcs11:` URI. `from_identity` must not try to parse it as one.
        let identity = identity(
            KeyRef::File("/etc/ota/key.pem".to_string()),
            KeyRef::Pkcs11("pkcs11:object=my-cert".to_string()),
            Some(Pkcs11Config {
                library: "/usr/lib/softhsm/libsofthsm2.so".to_string(),
                slot: 0,
                user_pin: "1234".to_string(),
            }),
        );
        let material = KeyMaterial::from_identity(&identity).unwrap();
        match material {
            KeyMaterial::Pkcs11 {
                private_key_ref,
                certificate_ref,
                ..
            } => {
                assert_eq!(private_key_ref, KeyRef::File("/etc/ota/key.pem".to_string()));
                assert_eq!(certificate_ref, KeyRef::Pkcs11("pkcs11:object=my-cert".to_string()));
            }
            KeyMaterial::File { .. } => panic!("expected Pkcs11 variant"),
        }
    }
}
