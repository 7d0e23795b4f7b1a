use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use base58::{FromBase58, ToBase58};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_stringify_deterministic::stringify_deterministic;

#[derive(Clone)]
pub enum KeypairOrPublicKey {
    Keypair(SigningKey),
    PublicKey(VerifyingKey),
}

/// Validator identity. Addresses are the base58 encoding of the ed25519 public key.
#[derive(Clone)]
pub struct Keypair {
    pub inner: KeypairOrPublicKey,
}

#[derive(Serialize, Deserialize)]
pub struct KeypairJSON {
    pub id: String,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl Keypair {
    pub fn new(key: KeypairOrPublicKey) -> Self {
        Self { inner: key }
    }

    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(KeypairOrPublicKey::Keypair(SigningKey::from_bytes(&seed)))
    }

    pub fn from_private_key_hex(private_key: &str) -> Result<Self> {
        let bytes = hex::decode(private_key.trim()).context("private key is not hex")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("private key must be 32 bytes"))?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_public_address(address: &str) -> Result<Self> {
        let bytes = address
            .from_base58()
            .map_err(|e| anyhow!("invalid base58 address {}: {:?}", address, e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("address {} does not encode a 32 byte key", address))?;
        let key = VerifyingKey::from_bytes(&bytes)?;
        Ok(Self::new(KeypairOrPublicKey::PublicKey(key)))
    }

    pub fn public_key(&self) -> VerifyingKey {
        match &self.inner {
            KeypairOrPublicKey::Keypair(signing) => signing.verifying_key(),
            KeypairOrPublicKey::PublicKey(public) => *public,
        }
    }

    pub fn as_public_address(&self) -> String {
        self.public_key().to_bytes().to_base58()
    }

    pub fn private_key_hex(&self) -> Option<String> {
        match &self.inner {
            KeypairOrPublicKey::Keypair(signing) => Some(hex::encode(signing.to_bytes())),
            KeypairOrPublicKey::PublicKey(_) => None,
        }
    }

    pub fn as_public_only(&self) -> Self {
        Self::new(KeypairOrPublicKey::PublicKey(self.public_key()))
    }

    pub fn sign_bytes(&self, message: &[u8]) -> Result<String> {
        match &self.inner {
            KeypairOrPublicKey::Keypair(signing) => Ok(hex::encode(signing.sign(message).to_bytes())),
            KeypairOrPublicKey::PublicKey(_) => Err(anyhow!("cannot sign with a public key")),
        }
    }

    pub fn verify_bytes(&self, signature: &str, message: &[u8]) -> Result<bool> {
        let bytes = hex::decode(signature).context("signature is not hex")?;
        let signature = Signature::from_slice(&bytes)?;
        Ok(self.public_key().verify(message, &signature).is_ok())
    }

    pub fn sign_json(&self, value: &Value) -> Result<String> {
        self.sign_bytes(stringify_deterministic(value).as_bytes())
    }

    pub fn verify_json(&self, signature: &str, value: &Value) -> Result<bool> {
        self.verify_bytes(signature, stringify_deterministic(value).as_bytes())
    }

    pub fn as_json(&self) -> KeypairJSON {
        KeypairJSON {
            id: self.as_public_address(),
            public_key: hex::encode(self.public_key().to_bytes()),
            private_key: self.private_key_hex(),
        }
    }

    pub fn from_json(json: &KeypairJSON) -> Result<Self> {
        let keypair = match &json.private_key {
            Some(private_key) => Self::from_private_key_hex(private_key)?,
            None => Self::from_public_address(&json.id)?,
        };
        if keypair.as_public_address() != json.id {
            return Err(anyhow!("keypair id {} does not match its key", json.id));
        }
        Ok(keypair)
    }

    pub fn from_json_string(json: &str) -> Result<Self> {
        let parsed: KeypairJSON = serde_json::from_str(json)?;
        Self::from_json(&parsed)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read keypair file {}", path.display()))?;
        Self::from_json_string(&contents)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.as_json())?;
        fs::write(path, json)
            .with_context(|| format!("failed to write keypair file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_and_verify_json() -> Result<()> {
        let keypair = Keypair::from_seed([7u8; 32]);
        let facts = json!({"subject": "acct", "score": 0.25});
        let sig = keypair.sign_json(&facts)?;

        let public = Keypair::from_public_address(&keypair.as_public_address())?;
        assert!(public.verify_json(&sig, &facts)?);
        assert!(!public.verify_json(&sig, &json!({"subject": "acct", "score": 0.5}))?);
        Ok(())
    }

    #[test]
    fn test_public_only_cannot_sign() {
        let keypair = Keypair::from_seed([1u8; 32]).as_public_only();
        assert!(keypair.sign_bytes(b"data").is_err());
        assert!(keypair.private_key_hex().is_none());
    }

    #[test]
    fn test_json_file_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("validator.json");
        let keypair = Keypair::generate();
        keypair.write_json_file(&path)?;

        let loaded = Keypair::from_json_file(&path)?;
        assert_eq!(loaded.as_public_address(), keypair.as_public_address());
        assert_eq!(loaded.private_key_hex(), keypair.private_key_hex());
        Ok(())
    }

    #[test]
    fn test_mismatched_id_is_rejected() {
        let mut json = Keypair::from_seed([2u8; 32]).as_json();
        json.id = Keypair::from_seed([3u8; 32]).as_public_address();
        assert!(Keypair::from_json(&json).is_err());
    }
}
