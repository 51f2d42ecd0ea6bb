//! QR transfer credentials.
//!
//! A credential is a point-in-time claim "property P was held by H when this
//! was printed". It is never stored; the QR code carries everything needed
//! to check it again:
//!
//! ```text
//! nonce = issued_at_ms (u64 BE) || 8 random bytes
//! tag   = BLAKE3-keyed(key, property_id BE || holder_id BE || nonce)
//! text  = base64url(JSON { propertyId, serialNumber, holderId, nonce, tag })
//! ```

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CustodyError, Result};
use crate::property::{PropertyId, UserId};
use crate::store::StoreRead;

/// BLAKE3 key-derivation context for the tag key.
const KEY_CONTEXT: &str = "handreceipt 2024-06-01 qr credential tag v1";

/// Issuance timestamp plus random bytes.
pub const NONCE_LEN: usize = 16;

/// Tolerated clock difference between issuing and verifying hosts.
const MAX_CLOCK_SKEW_MS: i64 = 30_000;

/// Secret key shared by issuer and verifier.
#[derive(Clone)]
pub struct CredentialKey([u8; 32]);

impl CredentialKey {
    pub fn derive(secret: &[u8]) -> Self {
        Self(blake3::derive_key(KEY_CONTEXT, secret))
    }

    fn tag(&self, property: PropertyId, holder: UserId, nonce: &[u8; NONCE_LEN]) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.0);
        hasher.update(&property.get().to_be_bytes());
        hasher.update(&holder.get().to_be_bytes());
        hasher.update(nonce);
        hasher.finalize()
    }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialKey(..)")
    }
}

/// Decoded QR payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QrCredential {
    pub property_id: PropertyId,
    pub serial_number: String,
    pub holder_id: UserId,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; 32],
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    property_id: PropertyId,
    serial_number: String,
    holder_id: UserId,
    nonce: String,
    tag: String,
}

impl QrCredential {
    /// Issuance time in unix milliseconds, read from the nonce.
    pub fn issued_at(&self) -> i64 {
        let mut millis = [0u8; 8];
        millis.copy_from_slice(&self.nonce[..8]);
        u64::from_be_bytes(millis) as i64
    }

    /// Text to render into the QR code.
    pub fn encode(&self) -> Result<String> {
        let wire = WirePayload {
            property_id: self.property_id,
            serial_number: self.serial_number.clone(),
            holder_id: self.holder_id,
            nonce: hex::encode(self.nonce),
            tag: hex::encode(self.tag),
        };
        let json = serde_json::to_vec(&wire)
            .map_err(|e| CustodyError::invalid_credential(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parses scanned QR text. Anything malformed fails the integrity check.
    pub fn decode(text: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|_| CustodyError::Integrity)?;
        let wire: WirePayload = serde_json::from_slice(&json).map_err(|_| CustodyError::Integrity)?;

        let mut nonce = [0u8; NONCE_LEN];
        hex::decode_to_slice(&wire.nonce, &mut nonce).map_err(|_| CustodyError::Integrity)?;
        let mut tag = [0u8; 32];
        hex::decode_to_slice(&wire.tag, &mut tag).map_err(|_| CustodyError::Integrity)?;

        Ok(Self {
            property_id: wire.property_id,
            serial_number: wire.serial_number,
            holder_id: wire.holder_id,
            nonce,
            tag,
        })
    }
}

/// A credential that passed every check against live state.
///
/// Only [`QrCredentialVerifier::verify`] constructs one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCredential {
    property_id: PropertyId,
    serial_number: String,
    holder_id: UserId,
    issued_at: i64,
    signature: String,
}

impl VerifiedCredential {
    pub fn property_id(&self) -> PropertyId {
        self.property_id
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn holder_id(&self) -> UserId {
        self.holder_id
    }

    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    /// Hex tag, kept on the transfer request as its signature payload.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

#[derive(Clone, Debug)]
pub struct QrCredentialVerifier {
    key: CredentialKey,
    validity_ms: i64,
}

impl QrCredentialVerifier {
    pub fn new(key: CredentialKey, validity_ms: i64) -> Self {
        Self { key, validity_ms }
    }

    pub fn validity_ms(&self) -> i64 {
        self.validity_ms
    }

    /// Issues a credential for `property`. Only its live holder may.
    pub fn issue<R>(&self, tx: &R, property: PropertyId, actor: UserId, now: i64) -> Result<QrCredential>
    where
        R: StoreRead + ?Sized,
    {
        let item = tx.require_property(property)?;
        item.ensure_held_by(actor)?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..8].copy_from_slice(&(now.max(0) as u64).to_be_bytes());
        nonce[8..].copy_from_slice(&rand::random::<[u8; 8]>());
        let tag = self.key.tag(item.id, item.holder, &nonce);

        Ok(QrCredential {
            property_id: item.id,
            serial_number: item.serial_number,
            holder_id: item.holder,
            nonce,
            tag: *tag.as_bytes(),
        })
    }

    /// Checks integrity, then freshness, then that the holder has not changed.
    pub fn verify<R>(&self, tx: &R, credential: &QrCredential, now: i64) -> Result<VerifiedCredential>
    where
        R: StoreRead + ?Sized,
    {
        let expected = self
            .key
            .tag(credential.property_id, credential.holder_id, &credential.nonce);
        // blake3::Hash equality is constant-time.
        if expected != blake3::Hash::from_bytes(credential.tag) {
            return Err(CustodyError::Integrity);
        }

        let issued_at = credential.issued_at();
        if issued_at > now + MAX_CLOCK_SKEW_MS {
            return Err(CustodyError::Integrity);
        }
        let expired_at = issued_at.saturating_add(self.validity_ms);
        if now > expired_at {
            return Err(CustodyError::ExpiredCredential {
                issued_at,
                expired_at,
            });
        }

        let item = tx.require_property(credential.property_id)?;
        if item.serial_number != credential.serial_number {
            return Err(CustodyError::Integrity);
        }
        if item.holder != credential.holder_id {
            return Err(CustodyError::StaleCredential {
                property: item.id,
                issued_to: credential.holder_id,
                holder: item.holder,
            });
        }

        debug!(property = %item.id, holder = %item.holder, issued_at, "credential verified");
        Ok(VerifiedCredential {
            property_id: item.id,
            serial_number: item.serial_number,
            holder_id: item.holder,
            issued_at,
            signature: hex::encode(credential.tag),
        })
    }

    pub fn verify_text<R>(&self, tx: &R, text: &str, now: i64) -> Result<VerifiedCredential>
    where
        R: StoreRead + ?Sized,
    {
        self.verify(tx, &QrCredential::decode(text)?, now)
    }
}
