//! Inbound gateway webhooks.
//!
//! Verification runs over the raw, unparsed request bytes; the transport
//! layer hands the body to [`SignatureVerifier::verify`] before any JSON
//! parsing happens, so parsing can never discard the bytes the signature
//! covers.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Shared-secret HMAC verifier for webhook payloads.
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Checks `signature_hex` against the raw body, byte for byte.
    ///
    /// Rejections carry no detail beyond invalidity.
    pub fn verify(&self, raw_body: &[u8], signature_hex: &str) -> Result<(), ServiceError> {
        let signature = hex::decode(signature_hex.trim())
            .map_err(|_| ServiceError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(raw_body);
        mac.verify_slice(&signature)
            .map_err(|_| ServiceError::InvalidSignature)
    }

    /// Hex HMAC over `raw_body`. The counterpart of [`Self::verify`];
    /// exercised by tests standing in for the gateway.
    pub fn sign(&self, raw_body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Charge payload common to all gateway event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeEventData {
    /// Gateway charge id (`chr_...`)
    pub id: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Events the gateway delivers asynchronously. The gateway adds event types
/// over time; anything unrecognized deserializes to `Unknown` and is
/// accepted without action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    #[serde(rename = "charge.succeeded")]
    ChargeSucceeded { data: ChargeEventData },
    #[serde(rename = "charge.failed")]
    ChargeFailed { data: ChargeEventData },
    #[serde(rename = "charge.refunded")]
    ChargeRefunded { data: ChargeEventData },
    #[serde(other)]
    Unknown,
}
