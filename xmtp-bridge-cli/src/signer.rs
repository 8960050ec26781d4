//! Local ECDSA key that answers `sign` events without a wallet round trip.

use std::fmt;

use k256::ecdsa::signature::hazmat::PrehashSigner as _;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use sha3::{Digest as _, Keccak256};
use xmtp_bridge::{Error, Result};

/// A secp256k1 key producing EIP-191 personal-message signatures.
pub struct LocalSigner {
    key: SigningKey,
    address: String,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Parse a hex-encoded 32-byte private key (`0x` prefix optional).
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let hex_key = hex_key.trim();
        let bytes = hex::decode(hex_key.strip_prefix("0x").unwrap_or(hex_key))
            .map_err(|e| Error::InvalidArgument(format!("signing key: {e}")))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidArgument(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| Error::InvalidArgument(format!("signing key: {e}")))?;
        let address = eth_address(&key);
        Ok(Self { key, address })
    }

    /// Lower-case `0x` address of the key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign `text` as an Ethereum personal message: 65 bytes `r || s || v`.
    pub fn sign(&self, text: &str) -> Result<Vec<u8>> {
        let prefixed = format!("\x19Ethereum Signed Message:\n{}{}", text.len(), text);
        let hash = Keccak256::digest(prefixed.as_bytes());
        let (sig, recid): (Signature, RecoveryId) = self
            .key
            .sign_prehash(&hash)
            .map_err(|e| Error::Library(format!("ecdsa: {e}")))?;
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte());
        Ok(bytes)
    }
}

fn eth_address(key: &SigningKey) -> String {
    let pubkey = key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&pubkey.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn address_matches_known_vector() {
        let signer = LocalSigner::from_hex(KEY).unwrap();
        assert_eq!(signer.address(), "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
    }

    #[test]
    fn signatures_are_deterministic_and_recoverable_form() {
        let signer = LocalSigner::from_hex(KEY).unwrap();
        let a = signer.sign("XMTP : Authenticate to inbox").unwrap();
        let b = signer.sign("XMTP : Authenticate to inbox").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 65);
        assert!(a[64] <= 1);
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(matches!(
            LocalSigner::from_hex("abcd"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
