//! Provenance files and signature verification
//!
//! A provenance file accompanies a chart archive as `<archive>.prov`. It holds
//! a YAML body naming the chart and the SHA-256 digest of each archive it
//! vouches for, followed by an ed25519 signature over the exact body bytes:
//!
//! ```text
//! -----BEGIN CHARTLOCK PROVENANCE-----
//! name: alpine
//! version: 0.2.0
//! files:
//!   alpine-0.2.0.tgz: sha256:<hex>
//! -----BEGIN SIGNATURE-----
//! <hex signature>
//! -----END SIGNATURE-----
//! ```
//!
//! Keyrings are files of concatenated PEM `PUBLIC KEY` blocks.

use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const BODY_HEADER: &str = "-----BEGIN CHARTLOCK PROVENANCE-----\n";
const SIGNATURE_HEADER: &str = "-----BEGIN SIGNATURE-----\n";
const SIGNATURE_FOOTER: &str = "-----END SIGNATURE-----";
const PEM_BEGIN: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_END: &str = "-----END PUBLIC KEY-----";

/// Errors that can occur while verifying an artifact
#[derive(Debug, Error)]
pub enum VerificationError {
    /// Verification was required but no provenance file exists
    #[error("failed to fetch provenance \"{url}\"")]
    MissingProvenance { url: String },

    /// Keyring could not be read or holds no usable key
    #[error("failed to load keyring {path}: {message}")]
    Keyring { path: String, message: String },

    /// Provenance file is malformed
    #[error("malformed provenance file: {0}")]
    Malformed(String),

    /// No key in the keyring produced this signature
    #[error("signature verification failed: no key in the keyring signed this provenance")]
    BadSignature,

    /// Provenance does not mention the archive
    #[error("provenance does not list {0}")]
    FileNotListed(String),

    /// Archive digest differs from the signed one
    #[error("digest mismatch for {file}: provenance says {expected}, archive is {actual}")]
    DigestMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

/// When to verify downloaded archives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyPolicy {
    /// Never fetch provenance files
    #[default]
    Never,
    /// Verify when a provenance file exists, otherwise continue unverified
    IfPossible,
    /// Fail unless a valid provenance file exists
    Always,
}

impl FromStr for VerifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(VerifyPolicy::Never),
            "if-possible" | "ifpossible" => Ok(VerifyPolicy::IfPossible),
            "always" => Ok(VerifyPolicy::Always),
            other => Err(format!(
                "unknown verify policy '{}' (expected never, if-possible or always)",
                other
            )),
        }
    }
}

impl fmt::Display for VerifyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerifyPolicy::Never => "never",
            VerifyPolicy::IfPossible => "if-possible",
            VerifyPolicy::Always => "always",
        })
    }
}

/// `sha256:<hex>` digest of some bytes
pub fn digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Set of trusted public keys
#[derive(Debug, Clone)]
pub struct Keyring {
    keys: Vec<VerifyingKey>,
}

impl Keyring {
    /// Load a keyring file
    pub fn load(path: &Path) -> Result<Self, VerificationError> {
        let content = std::fs::read_to_string(path).map_err(|e| VerificationError::Keyring {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_pem(&content).map_err(|message| VerificationError::Keyring {
            path: path.display().to_string(),
            message,
        })
    }

    /// Parse concatenated PEM public keys
    pub fn from_pem(content: &str) -> Result<Self, String> {
        let mut keys = Vec::new();
        let mut rest = content;
        while let Some(start) = rest.find(PEM_BEGIN) {
            let end = rest[start..]
                .find(PEM_END)
                .map(|i| start + i + PEM_END.len())
                .ok_or_else(|| "unterminated PUBLIC KEY block".to_string())?;
            let block = &rest[start..end];
            let key = VerifyingKey::from_public_key_pem(block).map_err(|e| e.to_string())?;
            keys.push(key);
            rest = &rest[end..];
        }

        if keys.is_empty() {
            return Err("no public keys found".to_string());
        }
        Ok(Self { keys })
    }

    /// Keyring holding the given keys
    pub fn from_keys(keys: Vec<VerifyingKey>) -> Self {
        Self { keys }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the keyring has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Signed statement about one chart version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceBody {
    pub name: String,
    #[serde(deserialize_with = "crate::yaml::string_or_number")]
    pub version: String,
    /// Archive file name -> `sha256:<hex>`
    pub files: BTreeMap<String, String>,
}

/// A parsed provenance file
#[derive(Debug, Clone)]
pub struct Provenance {
    raw_body: String,
    body: ProvenanceBody,
    signature: Signature,
}

impl Provenance {
    /// Parse the text of a `.prov` file
    pub fn parse(text: &str) -> Result<Self, VerificationError> {
        let text = text.replace("\r\n", "\n");
        let after_header = text
            .trim_start()
            .strip_prefix(BODY_HEADER)
            .ok_or_else(|| VerificationError::Malformed("missing provenance header".to_string()))?;
        let (raw_body, signature_part) = after_header
            .split_once(SIGNATURE_HEADER)
            .ok_or_else(|| VerificationError::Malformed("missing signature block".to_string()))?;
        let signature_hex = signature_part
            .split_once(SIGNATURE_FOOTER)
            .map(|(sig, _)| sig.trim())
            .ok_or_else(|| VerificationError::Malformed("unterminated signature block".to_string()))?;

        let signature_bytes = hex::decode(signature_hex)
            .map_err(|e| VerificationError::Malformed(format!("signature is not hex: {}", e)))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|e| VerificationError::Malformed(format!("bad signature length: {}", e)))?;

        let body: ProvenanceBody = serde_yaml::from_str(raw_body)
            .map_err(|e| VerificationError::Malformed(format!("bad body: {}", e)))?;

        Ok(Self {
            raw_body: raw_body.to_string(),
            body,
            signature,
        })
    }

    /// Produce the text of a signed provenance file for one archive
    pub fn sign(
        name: &str,
        version: &str,
        file_name: &str,
        archive: &[u8],
        key: &SigningKey,
    ) -> Result<String, VerificationError> {
        let body = ProvenanceBody {
            name: name.to_string(),
            version: version.to_string(),
            files: BTreeMap::from([(file_name.to_string(), digest(archive))]),
        };
        let raw_body = serde_yaml::to_string(&body)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let signature = key.sign(raw_body.as_bytes());

        Ok(format!(
            "{}{}{}{}\n{}\n",
            BODY_HEADER,
            raw_body,
            SIGNATURE_HEADER,
            hex::encode(signature.to_bytes()),
            SIGNATURE_FOOTER
        ))
    }

    /// Signed body
    pub fn body(&self) -> &ProvenanceBody {
        &self.body
    }

    /// Check the signature and the archive digest; returns the verified digest
    pub fn verify(
        &self,
        keyring: &Keyring,
        file_name: &str,
        archive: &[u8],
    ) -> Result<String, VerificationError> {
        let signed = keyring
            .keys
            .iter()
            .any(|key| key.verify(self.raw_body.as_bytes(), &self.signature).is_ok());
        if !signed {
            return Err(VerificationError::BadSignature);
        }

        let expected = self
            .body
            .files
            .get(file_name)
            .ok_or_else(|| VerificationError::FileNotListed(file_name.to_string()))?;
        let actual = digest(archive);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(VerificationError::DigestMismatch {
                file: file_name.to_string(),
                expected: expected.clone(),
                actual,
            });
        }

        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::{spki::der::pem::LineEnding, EncodePublicKey};

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn pem(key: &SigningKey) -> String {
        key.verifying_key().to_public_key_pem(LineEnding::LF).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let archive = b"chart archive bytes";
        let text = Provenance::sign("alpine", "0.2.0", "alpine-0.2.0.tgz", archive, &key(1)).unwrap();
        let prov = Provenance::parse(&text).unwrap();
        assert_eq!(prov.body().name, "alpine");
        assert_eq!(prov.body().version, "0.2.0");

        let keyring = Keyring::from_pem(&pem(&key(1))).unwrap();
        let verified = prov.verify(&keyring, "alpine-0.2.0.tgz", archive).unwrap();
        assert_eq!(verified, digest(archive));
    }

    #[test]
    fn test_keyring_with_several_keys() {
        let pems = format!("{}\n{}", pem(&key(2)), pem(&key(3)));
        let keyring = Keyring::from_pem(&pems).unwrap();
        assert_eq!(keyring.len(), 2);

        let archive = b"x";
        let text = Provenance::sign("a", "1.0.0", "a-1.0.0.tgz", archive, &key(3)).unwrap();
        assert!(Provenance::parse(&text)
            .unwrap()
            .verify(&keyring, "a-1.0.0.tgz", archive)
            .is_ok());
    }

    #[test]
    fn test_untrusted_key() {
        let archive = b"x";
        let text = Provenance::sign("a", "1.0.0", "a-1.0.0.tgz", archive, &key(4)).unwrap();
        let keyring = Keyring::from_pem(&pem(&key(5))).unwrap();
        assert!(matches!(
            Provenance::parse(&text).unwrap().verify(&keyring, "a-1.0.0.tgz", archive),
            Err(VerificationError::BadSignature)
        ));
    }

    #[test]
    fn test_tampered_body() {
        let archive = b"x";
        let text = Provenance::sign("a", "1.0.0", "a-1.0.0.tgz", archive, &key(6)).unwrap();
        let tampered = text.replace("version: 1.0.0", "version: 1.0.1");
        let keyring = Keyring::from_pem(&pem(&key(6))).unwrap();
        assert!(matches!(
            Provenance::parse(&tampered).unwrap().verify(&keyring, "a-1.0.0.tgz", archive),
            Err(VerificationError::BadSignature)
        ));
    }

    #[test]
    fn test_archive_digest_mismatch() {
        let text = Provenance::sign("a", "1.0.0", "a-1.0.0.tgz", b"original", &key(7)).unwrap();
        let keyring = Keyring::from_pem(&pem(&key(7))).unwrap();
        let prov = Provenance::parse(&text).unwrap();
        assert!(matches!(
            prov.verify(&keyring, "a-1.0.0.tgz", b"swapped"),
            Err(VerificationError::DigestMismatch { .. })
        ));
        assert!(matches!(
            prov.verify(&keyring, "other-1.0.0.tgz", b"original"),
            Err(VerificationError::FileNotListed(_))
        ));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            Provenance::parse("hello"),
            Err(VerificationError::Malformed(_))
        ));
        let text = format!("{}name: a\n{}zz\n{}\n", BODY_HEADER, SIGNATURE_HEADER, SIGNATURE_FOOTER);
        assert!(matches!(
            Provenance::parse(&text),
            Err(VerificationError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_keyring() {
        assert!(Keyring::from_pem("").is_err());
        assert!(Keyring::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA").is_err());
    }

    #[test]
    fn test_verify_policy_parse() {
        assert_eq!("never".parse::<VerifyPolicy>().unwrap(), VerifyPolicy::Never);
        assert_eq!("if-possible".parse::<VerifyPolicy>().unwrap(), VerifyPolicy::IfPossible);
        assert_eq!("ALWAYS".parse::<VerifyPolicy>().unwrap(), VerifyPolicy::Always);
        assert!("sometimes".parse::<VerifyPolicy>().is_err());
        assert_eq!(VerifyPolicy::IfPossible.to_string(), "if-possible");
    }
}
