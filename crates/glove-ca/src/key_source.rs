use rcgen::KeyPair;

use crate::CaError;

/// Algorithm family used for the root key and every minted leaf key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    EcdsaP256,
    EcdsaP384,
    Rsa,
}

impl KeySource {
    /// Recovers the key source from a loaded private key so freshly minted
    /// leaves match the root's algorithm family.
    pub fn from_key_pair(key: &KeyPair) -> Result<Self, CaError> {
        if key.is_compatible(&rcgen::PKCS_ECDSA_P256_SHA256) {
            return Ok(Self::EcdsaP256);
        }
        if key.is_compatible(&rcgen::PKCS_ECDSA_P384_SHA384) {
            return Ok(Self::EcdsaP384);
        }
        if key.is_compatible(&rcgen::PKCS_RSA_SHA256) {
            return Ok(Self::Rsa);
        }
        Err(CaError::UnsupportedKeyType)
    }

    pub fn generate(&self) -> Result<KeyPair, rcgen::Error> {
        match self {
            Self::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
            Self::EcdsaP384 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384),
            // the default crypto backend cannot mint fresh RSA keys
            Self::Rsa => KeyPair::generate_for(&rcgen::PKCS_RSA_SHA256)
                .or_else(|_| KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KeySource;
    use crate::CaError;
    use rcgen::KeyPair;

    #[test]
    fn recovers_source_from_ecdsa_key() {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("generate key");
        let source = KeySource::from_key_pair(&key).expect("recover source");
        assert_eq!(source, KeySource::EcdsaP256);
    }

    #[test]
    fn rejects_ed25519_key() {
        let key = KeyPair::generate_for(&rcgen::PKCS_ED25519).expect("generate key");
        let error = KeySource::from_key_pair(&key).expect_err("ed25519 must be rejected");
        assert!(matches!(error, CaError::UnsupportedKeyType));
    }

    #[test]
    fn generated_key_matches_source_family() {
        let key = KeySource::EcdsaP384.generate().expect("generate key");
        assert!(key.is_compatible(&rcgen::PKCS_ECDSA_P384_SHA384));
    }
}
