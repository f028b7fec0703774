//! On-the-fly certificate authority.
//!
//! A [`CertificateAuthority`] holds a root keypair and mints short-lived leaf
//! certificates for arbitrary hostnames on demand. The root is either loaded
//! from PEM files or generated in memory; minted leaves follow the root's key
//! algorithm family.

mod authority;
mod key_source;

pub use authority::{
    default_template, CertTemplate, CertificateAuthority, IssuedCertificate,
};
pub use key_source::KeySource;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("failed to decode a single PEM block from {path}")]
    PemDecode { path: String },
    #[error("private key is not an RSA or ECDSA signer")]
    UnsupportedKeyType,
    #[error("host name cannot be used as a certificate subject: {0}")]
    InvalidHost(String),
    #[error("certificate operation failed: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("TLS configuration rejected the minted certificate: {0}")]
    Tls(#[from] rustls::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
