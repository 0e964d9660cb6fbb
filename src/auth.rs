use crate::schemas::UserId;
use actix_web::{http::header::HeaderValue, HttpRequest};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::num::ParseIntError;

type HmacSha256 = Hmac<Sha256>;

pub const GATEWAY_SIGNATURE_HEADER: &str = "Gateway-Signature";

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|n| u8::from_str_radix(&String::from_iter(n), 16))
        .collect::<Result<Vec<u8>, ParseIntError>>()
        .ok()
}

fn mac_for(secret: &[u8], content: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(content);
    Some(mac)
}

fn verify(secret: &[u8], content: &[u8], hex_signature: &str) -> bool {
    let Some(signature) = decode_hex(hex_signature) else {
        return false;
    };
    mac_for(secret, content)
        .map(|mac| mac.verify_slice(&signature).is_ok())
        .unwrap_or(false)
}

/// Hex HMAC-SHA256 of `content`; what callers and the gateway send.
pub fn sign(secret: &[u8], content: &[u8]) -> String {
    mac_for(secret, content)
        .map(|mac| {
            mac.finalize()
                .into_bytes()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect()
        })
        .unwrap_or_default()
}

/// Reads the `Authorization: <userId>:<signature>` header and returns the
/// caller it vouches for.
pub fn identify_caller(request: &HttpRequest, secret: &[u8]) -> Option<UserId> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?;
    let (user_id, signature) = authorization.rsplit_once(':')?;
    if user_id.is_empty() {
        return None;
    }
    verify(secret, user_id.as_bytes(), signature).then(|| UserId::from(user_id))
}

pub fn verify_gateway_signature(request: &HttpRequest, body: &[u8], secret: &[u8]) -> bool {
    request
        .headers()
        .get(GATEWAY_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|signature| verify(secret, body, signature))
        .unwrap_or(false)
}
