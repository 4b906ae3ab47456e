//! Pairing offer codec.
//!
//! A `ConnectionOfferV2` is carried as base64url JSON in the *fragment* of a
//! pairing URL (`https://<host>/#offer=<b64url>`), never in the query string,
//! so offers are never sent to web servers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use paseo_domain::{Error, Result};

/// Relay coordinates inside an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub endpoint: String,
}

/// The pairing offer emitted once per daemon boot. Field names are the
/// wire contract (`{"v":2,"serverId":...,"daemonPublicKeyB64":...,
/// "relay":{"endpoint":...}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOfferV2 {
    pub v: u8,
    pub server_id: String,
    pub daemon_public_key_b64: String,
    pub relay: RelayDescriptor,
}

impl ConnectionOfferV2 {
    pub fn new(server_id: String, daemon_public_key_b64: String, relay_endpoint: String) -> Self {
        Self {
            v: 2,
            server_id,
            daemon_public_key_b64,
            relay: RelayDescriptor {
                endpoint: relay_endpoint,
            },
        }
    }
}

/// Encode an offer as the base64url payload of the `#offer=` fragment.
pub fn encode_offer(offer: &ConnectionOfferV2) -> Result<String> {
    let json = serde_json::to_vec(offer)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Build the full pairing URL for an offer.
pub fn pairing_url(base: &str, offer: &ConnectionOfferV2) -> Result<String> {
    let payload = encode_offer(offer)?;
    let base = base.trim_end_matches('/');
    Ok(format!("{base}/#offer={payload}"))
}

/// Decode an offer from a pairing URL, a bare `offer=...` fragment, or the
/// raw base64url payload.
///
/// Offers found in the query string (`?offer=`) are rejected: the fragment is
/// mandatory.
pub fn decode_offer(input: &str) -> Result<ConnectionOfferV2> {
    let payload = extract_payload(input)?;
    let json = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|e| Error::InvalidOffer(format!("base64url: {e}")))?;

    // Decode loosely first so a v=1 offer reports a version error rather
    // than a shape error.
    let value: serde_json::Value =
        serde_json::from_slice(&json).map_err(|e| Error::InvalidOffer(format!("json: {e}")))?;
    match value.get("v").and_then(|v| v.as_u64()) {
        Some(2) => {}
        Some(other) => {
            return Err(Error::InvalidOffer(format!(
                "unsupported offer version {other}"
            )))
        }
        None => return Err(Error::InvalidOffer("missing version field".into())),
    }

    let offer: ConnectionOfferV2 = serde_json::from_value(value)
        .map_err(|e| Error::InvalidOffer(format!("malformed offer: {e}")))?;

    if offer.server_id.is_empty() {
        return Err(Error::InvalidOffer("empty server_id".into()));
    }
    if offer.daemon_public_key_b64.is_empty() {
        return Err(Error::InvalidOffer("empty daemon_public_key_b64".into()));
    }
    if offer.relay.endpoint.is_empty() {
        return Err(Error::InvalidOffer("empty relay.endpoint".into()));
    }
    Ok(offer)
}

fn extract_payload(input: &str) -> Result<&str> {
    let input = input.trim();

    if let Some((before_fragment, fragment)) = input.split_once('#') {
        if before_fragment.contains("offer=") {
            return Err(Error::InvalidOffer(
                "offer must be carried in the URL fragment, not the query".into(),
            ));
        }
        return fragment
            .strip_prefix("offer=")
            .ok_or_else(|| Error::InvalidOffer("fragment does not start with offer=".into()));
    }

    if input.contains('?') && input.contains("offer=") {
        return Err(Error::InvalidOffer(
            "offer must be carried in the URL fragment, not the query".into(),
        ));
    }

    if let Some(payload) = input.strip_prefix("offer=") {
        return Ok(payload);
    }

    if input.is_empty() {
        return Err(Error::InvalidOffer("empty offer".into()));
    }
    Ok(input)
}
