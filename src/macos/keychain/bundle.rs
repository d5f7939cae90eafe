//! Single-identity PKCS#12 bundles cut from a full keychain export
//!
//! `security export -t identities` writes every identity in the keychain into
//! one PKCS#12. The certificate is picked by serial and its private key by
//! public key, then both are packaged again with an empty password.

use crate::error::{CollectorError, Result};
use crate::identity::{Identity, KeyBundle, Serial};
use p256::ecdsa::SigningKey;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::DecodePrivateKey;
use x509_certificate::X509Certificate;
use zeroize::Zeroizing;

pub(super) fn single_identity(pfx_der: &[u8], password: &str, identity: &Identity) -> Result<KeyBundle> {
    let pfx = p12::PFX::parse(pfx_der)
        .map_err(|e| CollectorError::Certificate(format!("Failed to parse exported PKCS#12: {e:?}")))?;

    let certificates = pfx.cert_x509_bags(password).map_err(|e| {
        CollectorError::Certificate(format!("Failed to extract certificates from PKCS#12: {e:?}"))
    })?;
    let keys: Vec<Zeroizing<Vec<u8>>> = pfx
        .key_bags(password)
        .map_err(|e| CollectorError::Certificate(format!("Failed to extract keys from PKCS#12: {e:?}")))?
        .into_iter()
        .map(Zeroizing::new)
        .collect();

    let (cert_der, cert) = certificates
        .iter()
        .find_map(|der| {
            let cert = X509Certificate::from_der(der).ok()?;
            (Serial::of(&cert) == *identity.serial()).then_some((der, cert))
        })
        .ok_or_else(|| CollectorError::export(identity, "certificate"))?;

    let public_key = cert.public_key_data();
    let key_der = keys
        .iter()
        .find(|key| public_key_of(key).is_some_and(|pk| pk.as_slice() == &public_key[..]))
        .ok_or_else(|| CollectorError::export(identity, "private key"))?;

    let bundle = p12::PFX::new(cert_der, key_der, None, "", &identity.subject().common_name)
        .ok_or_else(|| CollectorError::Certificate(format!("Failed to package '{identity}' as PKCS#12")))?;

    Ok(KeyBundle::new(bundle.to_der()))
}

/// Public key in the encoding certificates carry: PKCS#1 for RSA, SEC1 point for P-256
fn public_key_of(pkcs8_der: &[u8]) -> Option<Vec<u8>> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_der(pkcs8_der) {
        return key
            .to_public_key()
            .to_pkcs1_der()
            .ok()
            .map(|doc| doc.as_bytes().to_vec());
    }

    if let Ok(key) = SigningKey::from_pkcs8_der(pkcs8_der) {
        return Some(key.verifying_key().to_encoded_point(false).as_bytes().to_vec());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestCertificate, handle};

    #[test]
    fn test_repack_matching_identity() {
        let cert = TestCertificate::builder(0xA1).build();
        let exported = p12::PFX::new(&cert.der, &cert.key_der, None, "export-pass", "Jane")
            .unwrap()
            .to_der();
        let identity = Identity::from_certificate_der(handle("A1"), &cert.der).unwrap();

        let bundle = single_identity(&exported, "export-pass", &identity).unwrap();

        let repacked = p12::PFX::parse(bundle.as_bytes()).unwrap();
        assert_eq!(repacked.cert_x509_bags("").unwrap(), vec![cert.der.clone()]);
        assert_eq!(repacked.key_bags("").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_identity_is_export_error() {
        let cert = TestCertificate::builder(0xA1).build();
        let other = TestCertificate::builder(0xA2).build();
        let exported = p12::PFX::new(&cert.der, &cert.key_der, None, "pw", "Jane")
            .unwrap()
            .to_der();
        let identity = Identity::from_certificate_der(handle("A2"), &other.der).unwrap();

        assert!(matches!(
            single_identity(&exported, "pw", &identity),
            Err(CollectorError::Export { field: "certificate", .. })
        ));
    }

    #[test]
    fn test_key_of_another_certificate_is_rejected() {
        let cert = TestCertificate::builder(0xA1).build();
        let stranger = TestCertificate::builder(0xB1).build();
        let exported = p12::PFX::new(&cert.der, &stranger.key_der, None, "pw", "Jane")
            .unwrap()
            .to_der();
        let identity = Identity::from_certificate_der(handle("A1"), &cert.der).unwrap();

        assert!(matches!(
            single_identity(&exported, "pw", &identity),
            Err(CollectorError::Export { field: "private key", .. })
        ));
    }

    #[test]
    fn test_wrong_password_fails() {
        let cert = TestCertificate::builder(0xA1).build();
        let exported = p12::PFX::new(&cert.der, &cert.key_der, None, "pw", "Jane")
            .unwrap()
            .to_der();
        let identity = Identity::from_certificate_der(handle("A1"), &cert.der).unwrap();

        assert!(single_identity(&exported, "not-pw", &identity).is_err());
    }
}
