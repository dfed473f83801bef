//!
//! Unverified JWT claim extraction.
//!
//! The gateway never validates signatures; it only reads claims the identity
//! provider put there for the client (expiry, account id, plan, organization).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/* --- constants ------------------------------------------------------------------------------- */

/** namespace holding ChatGPT-specific claims */
pub const AUTH_CLAIMS_NAMESPACE: &str = "https://api.openai.com/auth";

/* --- start of code -------------------------------------------------------------------------- */

/// Decode the payload segment of a three-part JWT. Padding is tolerated.
pub fn parse_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// Token expiry from the `exp` claim
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = parse_claims(token)?.get("exp")?.as_f64()?;
    if !exp.is_finite() {
        return None;
    }
    Utc.timestamp_opt(exp as i64, 0).single()
}

/// ChatGPT account id carried by the id token
pub fn account_id(id_token: &str) -> Option<String> {
    auth_claim(id_token, "chatgpt_account_id")
}

/// Subscription plan carried by the access token
pub fn plan_type(access_token: &str) -> Option<String> {
    auth_claim(access_token, "chatgpt_plan_type")
}

/// Login email from the id token
pub fn email(id_token: &str) -> Option<String> {
    parse_claims(id_token)?.get("email")?.as_str().map(str::to_string)
}

/// Read a string claim from the namespaced auth object or, failing that, the top level
pub fn auth_claim(token: &str, name: &str) -> Option<String> {
    let claims = parse_claims(token)?;
    claims
        .get(AUTH_CLAIMS_NAMESPACE)
        .and_then(|ns| ns.get(name))
        .or_else(|| claims.get(name))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/* --- tests ----------------------------------------------------------------------------------- */
