use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub const EXOTEL_SIGNATURE_HEADER: &str = "x-exotel-signature";
pub const PLIVO_SIGNATURE_HEADER: &str = "x-plivo-signature";
pub const PLIVO_NONCE_HEADER: &str = "x-plivo-signature-nonce";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    #[error("webhook signature verification failed")]
    Invalid,
}

/// Exotel signs the JSON body with HMAC-SHA1 keyed by the deployment webhook
/// secret, base64-encoded in a single header. The header is required before
/// any computation happens; comparison goes through `Mac::verify_slice`,
/// which is constant-time.
pub fn verify_exotel(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
    let provided = header_value(headers, EXOTEL_SIGNATURE_HEADER)?;
    let expected = STANDARD
        .decode(provided)
        .map_err(|_| SignatureError::Invalid)?;

    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Invalid)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Invalid)
}

/// Plivo's V2 scheme: HMAC-SHA256 over `nonce + body`, base64-encoded, with
/// the nonce delivered alongside the signature in a second header.
pub fn verify_plivo(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
    let provided = header_value(headers, PLIVO_SIGNATURE_HEADER)?;
    let nonce = header_value(headers, PLIVO_NONCE_HEADER)?;
    let expected = STANDARD
        .decode(provided)
        .map_err(|_| SignatureError::Invalid)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Invalid)?;
    mac.update(nonce.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Invalid)
}

fn header_value<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(SignatureError::MissingHeader(name))
}
