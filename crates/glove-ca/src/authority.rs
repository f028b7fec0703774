use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime, Time};

use crate::{CaError, KeySource};

/// Produces the base certificate parameters shared by the root and every
/// minted leaf; CA and TLS attributes are layered on top per use.
pub type CertTemplate = Arc<dyn Fn() -> CertificateParams + Send + Sync>;

/// 1-year validity starting at today UTC midnight, serial 0, organization
/// "Glove HTTP Proxy".
pub fn default_template() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.serial_number = Some(SerialNumber::from(vec![0_u8]));

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "Glove HTTP Proxy");
    params.distinguished_name = distinguished_name;

    let not_before = OffsetDateTime::now_utc().replace_time(Time::MIDNIGHT);
    params.not_before = not_before;
    params.not_after = not_before + Duration::days(365);
    params
}

/// A freshly minted leaf: certificate chain (leaf first, root last) and the
/// leaf private key, ready for a TLS server configuration.
pub struct IssuedCertificate {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub leaf_pem: String,
}

pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    key_source: KeySource,
    template: CertTemplate,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("issuer", &self.issuer)
            .field("cert_der", &self.cert_der)
            .field("cert_pem", &self.cert_pem)
            .field("key_source", &self.key_source)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Loads the root certificate and PKCS#8 private key from single-block
    /// PEM files.
    pub fn load(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        template: Option<CertTemplate>,
    ) -> Result<Self, CaError> {
        let cert_path = cert_path.as_ref();
        let cert_pem = fs::read_to_string(cert_path)?;
        ensure_single_pem_block(&cert_pem, cert_path)?;
        let cert_der = CertificateDer::from_pem_slice(cert_pem.as_bytes())
            .map_err(|_| pem_decode_error(cert_path))?
            .into_owned();

        let key_path = key_path.as_ref();
        let key_pem = fs::read_to_string(key_path)?;
        ensure_single_pem_block(&key_pem, key_path)?;
        let key = KeyPair::from_pem(&key_pem).map_err(|_| pem_decode_error(key_path))?;
        let key_source = KeySource::from_key_pair(&key)?;

        let issuer = Issuer::from_ca_cert_der(&cert_der, key)?;

        Ok(Self {
            issuer,
            cert_der,
            cert_pem,
            key_source,
            template: template.unwrap_or_else(|| Arc::new(default_template)),
        })
    }

    /// Generates a self-signed, CA-marked root in memory.
    pub fn generate(
        key_source: KeySource,
        template: Option<CertTemplate>,
    ) -> Result<Self, CaError> {
        let template = template.unwrap_or_else(|| Arc::new(default_template) as CertTemplate);
        let key = key_source.generate()?;

        let mut params = template();
        set_ca_attributes(&mut params);
        let cert = params.self_signed(&key)?;
        let cert_der = cert.der().clone();
        let cert_pem = cert.pem();
        let issuer = Issuer::new(params, key);

        Ok(Self {
            issuer,
            cert_der,
            cert_pem,
            key_source,
            template,
        })
    }

    /// Mints a leaf certificate for the given hosts. IP literals become IP
    /// SANs, everything else a DNS SAN.
    pub fn sign_hosts(&self, hosts: &[&str]) -> Result<IssuedCertificate, CaError> {
        let leaf_key = self.key_source.generate()?;

        let mut params = (self.template)();
        set_tls_attributes(&mut params, &leaf_key);
        set_hosts(&mut params, hosts)?;

        let leaf = params.signed_by(&leaf_key, &self.issuer)?;
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));

        Ok(IssuedCertificate {
            chain: vec![leaf.der().clone(), self.cert_der.clone()],
            key,
            leaf_pem: leaf.pem(),
        })
    }

    /// Mints a leaf for `host` and wraps it into a rustls server
    /// configuration, the shape consumed by the proxy's client-side TLS
    /// factory.
    pub fn server_config_for(&self, host: &str) -> Result<Arc<ServerConfig>, CaError> {
        let issued = self.sign_hosts(&[host])?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(issued.chain, issued.key)?;
        Ok(Arc::new(config))
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn key_source(&self) -> KeySource {
        self.key_source
    }
}

fn set_ca_attributes(params: &mut CertificateParams) {
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
}

fn set_tls_attributes(params: &mut CertificateParams, leaf_key: &KeyPair) {
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    // the KeyEncipherment usage only applies to RSA key exchange
    if leaf_key.is_compatible(&rcgen::PKCS_RSA_SHA256) {
        params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
    }
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
}

fn set_hosts(params: &mut CertificateParams, hosts: &[&str]) -> Result<(), CaError> {
    for host in hosts {
        match host.parse::<IpAddr>() {
            Ok(ip) => params.subject_alt_names.push(SanType::IpAddress(ip)),
            Err(_) => {
                let name = (*host)
                    .try_into()
                    .map_err(|_| CaError::InvalidHost(host.to_string()))?;
                params.subject_alt_names.push(SanType::DnsName(name));
            }
        }
    }
    Ok(())
}

fn ensure_single_pem_block(pem: &str, path: &Path) -> Result<(), CaError> {
    if pem.matches("-----BEGIN").count() != 1 {
        return Err(pem_decode_error(path));
    }
    Ok(())
}

fn pem_decode_error(path: &Path) -> CaError {
    CaError::PemDecode {
        path: path.display().to_string(),
    }
}
