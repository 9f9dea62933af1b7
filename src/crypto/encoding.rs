//! Wire encodings for DH parameters and public keys.
//!
//! Parameters travel as PKCS#3 `DHParameter` ("DH PARAMETERS" PEM) and public
//! keys as X.509 SubjectPublicKeyInfo ("PUBLIC KEY" PEM) with the
//! `dhKeyAgreement` algorithm identifier. Both are then base64-wrapped for
//! JSON transport.

use base64::{engine::general_purpose::STANDARD, Engine};
use der::asn1::{BitString, ObjectIdentifier, Uint};
use der::pem::{LineEnding, PemLabel};
use der::{Decode, DecodePem, Encode, EncodePem, Sequence};
use num_bigint_dig::BigUint;

use crate::crypto::DhParameters;
use crate::error::{Error, Result};

/// PKCS#3 `dhKeyAgreement` (1.2.840.113549.1.3.1).
pub const DH_KEY_AGREEMENT_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.3.1");

/// PKCS#3 `DHParameter ::= SEQUENCE { prime, base, privateValueLength OPTIONAL }`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DhParameter {
    pub prime: Uint,
    pub base: Uint,
    #[asn1(optional = "true")]
    pub private_value_length: Option<u32>,
}

impl PemLabel for DhParameter {
    const PEM_LABEL: &'static str = "DH PARAMETERS";
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DhAlgorithmIdentifier {
    algorithm: ObjectIdentifier,
    parameters: DhParameter,
}

/// SubjectPublicKeyInfo specialised to DH keys.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DhPublicKeyInfo {
    algorithm: DhAlgorithmIdentifier,
    subject_public_key: BitString,
}

impl PemLabel for DhPublicKeyInfo {
    const PEM_LABEL: &'static str = "PUBLIC KEY";
}

/// A decoded peer public key together with the parameters it claims.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerPublicKey {
    pub parameters: DhParameters,
    pub value: BigUint,
}

fn to_uint(value: &BigUint) -> Result<Uint> {
    Ok(Uint::new(&value.to_bytes_be())?)
}

fn from_uint(value: &Uint) -> BigUint {
    BigUint::from_bytes_be(value.as_bytes())
}

fn dh_parameter(params: &DhParameters) -> Result<DhParameter> {
    Ok(DhParameter {
        prime: to_uint(params.modulus())?,
        base: to_uint(params.generator())?,
        private_value_length: None,
    })
}

fn parameters_from(param: &DhParameter) -> Result<DhParameters> {
    DhParameters::new(from_uint(&param.prime), from_uint(&param.base))
}

/// Encode parameters as a PKCS#3 PEM document.
pub fn parameters_to_pem(params: &DhParameters) -> Result<String> {
    Ok(dh_parameter(params)?.to_pem(LineEnding::LF)?)
}

/// Decode a PKCS#3 PEM document.
pub fn parameters_from_pem(pem: &[u8]) -> Result<DhParameters> {
    let param = DhParameter::from_pem(pem)?;
    parameters_from(&param)
}

/// Encode a public value as SubjectPublicKeyInfo PEM.
pub fn public_key_to_pem(params: &DhParameters, public: &BigUint) -> Result<String> {
    let key_der = to_uint(public)?.to_der()?;
    let info = DhPublicKeyInfo {
        algorithm: DhAlgorithmIdentifier {
            algorithm: DH_KEY_AGREEMENT_OID,
            parameters: dh_parameter(params)?,
        },
        subject_public_key: BitString::from_bytes(&key_der)?,
    };
    Ok(info.to_pem(LineEnding::LF)?)
}

/// Decode a SubjectPublicKeyInfo PEM carrying a DH public key.
pub fn public_key_from_pem(pem: &[u8]) -> Result<PeerPublicKey> {
    let info = DhPublicKeyInfo::from_pem(pem)?;
    if info.algorithm.algorithm != DH_KEY_AGREEMENT_OID {
        return Err(Error::encoding(format!(
            "unexpected key algorithm {}",
            info.algorithm.algorithm
        )));
    }

    let key_der = info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::encoding("public key bit string has unused bits"))?;
    let value = Uint::from_der(key_der)?;

    Ok(PeerPublicKey {
        parameters: parameters_from(&info.algorithm.parameters)?,
        value: from_uint(&value),
    })
}

/// Base64-wrap a PEM document for JSON transport.
pub fn wrap_base64(pem: &str) -> String {
    STANDARD.encode(pem.as_bytes())
}

/// Strip the transport base64 layer.
pub fn unwrap_base64(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DhGenerator, KeyPair};

    #[test]
    fn test_parameters_pem_layout() {
        let (params, _) = DhGenerator::insecure_for_tests(256).generate().unwrap();
        let pem = parameters_to_pem(&params).unwrap();

        assert!(pem.starts_with("-----BEGIN DH PARAMETERS-----"));
        assert!(pem.trim_end().ends_with("-----END DH PARAMETERS-----"));
        assert_eq!(parameters_from_pem(pem.as_bytes()).unwrap(), params);
    }

    #[test]
    fn test_public_key_carries_parameters() {
        let (params, keypair) = DhGenerator::insecure_for_tests(256).generate().unwrap();
        let pem = public_key_to_pem(&params, keypair.public()).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let decoded = public_key_from_pem(pem.as_bytes()).unwrap();
        assert_eq!(&decoded.value, keypair.public());
        assert_eq!(decoded.parameters, params);
    }

    #[test]
    fn test_peer_key_from_transport() {
        let (params, _) = DhGenerator::insecure_for_tests(256).generate().unwrap();
        let peer = KeyPair::generate(&params).unwrap();
        let wrapped = wrap_base64(&public_key_to_pem(&params, peer.public()).unwrap());

        let pem = unwrap_base64(&wrapped).unwrap();
        let decoded = public_key_from_pem(&pem).unwrap();
        assert_eq!(&decoded.value, peer.public());
    }

    #[test]
    fn test_rejects_wrong_label() {
        let (params, _) = DhGenerator::insecure_for_tests(128).generate().unwrap();
        let pem = parameters_to_pem(&params).unwrap();

        let err = public_key_from_pem(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            public_key_from_pem(b"not a pem document"),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(unwrap_base64("%%%"), Err(Error::Encoding(_))));
    }
}
