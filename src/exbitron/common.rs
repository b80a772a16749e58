//! Exbitron authentication, request signing, and response classification
//!
//! Exbitron runs a Peatio backend under `/api/v2/peatio`. Private calls use
//! header-based HMAC-SHA256 signing:
//! - Sign string: nonce + apiKey, keyed by the API secret, hex encoded
//! - Headers: `X-Auth-ApiKey`, `X-Auth-Nonce`, `X-Auth-Signature`
//!
//! Withdrawals additionally require a TOTP code (SHA-1, 6 digits, 30 s
//! period) derived from a pre-shared base32 secret.

use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::errors::{ExchangeError, Result};
use crate::traits::{HttpRequest, UnixMillis};

// =============================================================================
// Endpoints & configuration
// =============================================================================

pub const DEFAULT_HOSTNAME: &str = "exbitron.com";

/// Depth requested from the venue when the caller passes no limit.
pub const DEFAULT_ORDER_BOOK_LIMIT: u32 = 100;

/// Listing page size used by catalog refreshes.
pub const DEFAULT_CATALOG_LIMIT: u32 = 500;

/// Immutable adapter configuration, passed to the constructor. Replaces the
/// implicit global exchange description of the upstream venue client.
#[derive(Clone)]
pub struct ExbitronConfig {
    pub hostname: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Base32 TOTP secret; required by [`withdraw`](crate::exbitron::ExbitronAdapter::withdraw).
    pub totp_secret: Option<String>,
    /// Venue-wide trading fee schedule.
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub order_book_limit: u32,
}

impl Default for ExbitronConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            api_key: None,
            api_secret: None,
            totp_secret: None,
            // 0.4% maker/taker, the venue's published schedule
            maker_fee: Decimal::new(4, 3),
            taker_fee: Decimal::new(4, 3),
            order_book_limit: DEFAULT_ORDER_BOOK_LIMIT,
        }
    }
}

// =============================================================================
// Authentication
// =============================================================================

/// Exbitron API credentials
#[derive(Clone)]
pub struct ExbitronAuth {
    pub api_key: String,
    pub api_secret: String,
}

impl ExbitronAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Current nonce: milliseconds since epoch. Not monotonic, but
    /// non-repeating within the venue's replay window.
    pub fn nonce() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Signs `nonce + apiKey` with HMAC-SHA256, hex encoded. Deterministic
    /// for a fixed nonce; the envelope builder feeds it a fresh one.
    pub fn sign(&self, nonce: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|_| ExchangeError::Authentication("invalid API secret".to_string()))?;
        mac.update(nonce.as_bytes());
        mac.update(self.api_key.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Generates the 6-digit TOTP code the withdrawal endpoint expects
/// (SHA-1, 30 second period) for the given epoch-seconds instant.
pub fn totp_code(secret: &str, time_secs: u64) -> Result<String> {
    let normalized = secret.trim().replace(' ', "").to_uppercase();
    let secret_bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| ExchangeError::Authentication(format!("invalid TOTP secret: {e:?}")))?;
    let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes)
        .map_err(|e| ExchangeError::Authentication(format!("invalid TOTP secret: {e:?}")))?;
    Ok(totp.generate(time_secs))
}

// =============================================================================
// Request signing
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Api {
    Public,
    Private,
}

/// Builds outbound request envelopes: URL with interpolated path
/// placeholders, query string or JSON body for the leftover parameters, and
/// the auth headers for private endpoints. No network I/O happens here.
#[derive(Clone)]
pub struct RequestSigner {
    hostname: String,
    auth: Option<ExbitronAuth>,
}

impl RequestSigner {
    pub fn new(hostname: String, auth: Option<ExbitronAuth>) -> Self {
        Self { hostname, auth }
    }

    fn base_url(&self, api: Api) -> String {
        match api {
            Api::Public => format!("https://{}/api/v2/peatio/public", self.hostname),
            Api::Private => format!("https://{}/api/v2/peatio", self.hostname),
        }
    }

    /// Produces the `{url, method, headers, body}` envelope for one call.
    ///
    /// `{name}` placeholders in `path` are substituted from `params` and the
    /// consumed keys dropped; remaining parameters become a query string for
    /// GET and a JSON body for mutating methods.
    pub fn build(
        &self,
        api: Api,
        method: Method,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> Result<HttpRequest> {
        let (path, query) = interpolate_path(path, params);
        let mut url = format!("{}/{}", self.base_url(api), path);
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        let mut body = None;

        if method == Method::GET {
            if !query.is_empty() {
                let encoded = serde_urlencoded::to_string(&query)
                    .map_err(|e| ExchangeError::Argument(e.to_string()))?;
                url.push('?');
                url.push_str(&encoded);
            }
        } else {
            headers.push((
                "Content-type".to_string(),
                "application/json".to_string(),
            ));
            body = Some(
                serde_json::to_string(&query)
                    .map_err(|e| ExchangeError::Argument(e.to_string()))?,
            );
        }

        if api == Api::Private {
            let auth = self.auth.as_ref().ok_or_else(|| {
                ExchangeError::Authentication("API key and secret required".to_string())
            })?;
            let nonce = ExbitronAuth::nonce().to_string();
            let signature = auth.sign(&nonce)?;
            headers.push(("X-Auth-ApiKey".to_string(), auth.api_key.clone()));
            headers.push(("X-Auth-Nonce".to_string(), nonce));
            headers.push(("X-Auth-Signature".to_string(), signature));
        }

        Ok(HttpRequest {
            url,
            method,
            headers,
            body,
        })
    }
}

/// Substitutes `{name}` placeholders from the parameter map; consumed keys
/// are removed from the returned leftover map.
fn interpolate_path(
    template: &str,
    mut params: BTreeMap<String, String>,
) -> (String, BTreeMap<String, String>) {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(offset) => {
                let name = &rest[start + 1..start + offset];
                match params.remove(name) {
                    Some(value) => path.push_str(&value),
                    // unfilled placeholder stays literal
                    None => path.push_str(&rest[start..start + offset + 1]),
                }
                rest = &rest[start + offset + 1..];
            }
            None => {
                path.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    path.push_str(rest);
    (path, params)
}

// =============================================================================
// Response classification
// =============================================================================

/// Maps a transport status and parsed body to a canonical fault. `None`
/// means "no additional classification": success, or a non-success response
/// whose body carries nothing recognizable (the caller then falls back to a
/// generic fault from the status alone).
pub fn classify_response(status: u16, body: Option<&Value>) -> Option<ExchangeError> {
    if status == 418 || status == 429 {
        let detail = body.map(|b| b.to_string()).unwrap_or_default();
        return Some(ExchangeError::RateLimited(format!("HTTP {status} {detail}")));
    }
    if (200..300).contains(&status) {
        return None;
    }
    let body = body?;
    let token = body
        .get("errors")
        .and_then(|errors| errors.get(0))
        .and_then(Value::as_str)?;
    Some(match token {
        "market.account.insufficient_balance" => {
            ExchangeError::InsufficientFunds(token.to_string())
        }
        "market.order.invalid_side"
        | "market.order.invalid_type"
        | "market.order.non_positive_volume"
        | "market.order.not_positive_price" => ExchangeError::InvalidOrder(token.to_string()),
        // sic: the venue misspells this token
        "market.order.invaild_id_or_uuid" => ExchangeError::OrderNotFound(token.to_string()),
        _ => ExchangeError::Exchange(body.to_string()),
    })
}

// =============================================================================
// Type converters
// =============================================================================

pub mod converters {
    use crate::traits::{
        OrderStatus, Side, Timeframe, TransactionStatus, TransactionType,
    };

    pub fn parse_side(side: &str) -> Option<Side> {
        match side {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    /// Venue order states map onto the canonical enum; anything else passes
    /// through unchanged (forward compatible).
    pub fn parse_order_status(state: &str) -> OrderStatus {
        match state {
            "wait" | "pending" => OrderStatus::Open,
            "done" => OrderStatus::Closed,
            "cancel" => OrderStatus::Canceled,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    pub fn parse_transaction_status(state: &str) -> TransactionStatus {
        match state {
            "dispatched" | "succeed" => TransactionStatus::Ok,
            "accepted" | "confirming" | "invoiced" | "prepared" | "processing" | "skipped"
            | "submitted" | "transfering" => TransactionStatus::Pending,
            "errored" | "failed" | "rejected" => TransactionStatus::Failed,
            "canceled" => TransactionStatus::Canceled,
            other => TransactionStatus::Other(other.to_string()),
        }
    }

    pub fn parse_transaction_type(raw: &str) -> Option<TransactionType> {
        match raw {
            "Deposit" => Some(TransactionType::Deposit),
            "Withdraw" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }

    /// Canonical timeframe tokens to the venue's integer-minute period codes.
    pub fn timeframe_code(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1",
            Timeframe::M5 => "5",
            Timeframe::M15 => "15",
            Timeframe::M30 => "30",
            Timeframe::H1 => "60",
            Timeframe::H2 => "120",
            Timeframe::H4 => "240",
            Timeframe::H6 => "360",
            Timeframe::H12 => "720",
            Timeframe::D1 => "1440",
            Timeframe::D3 => "4320",
            Timeframe::W1 => "10080",
        }
    }
}

// =============================================================================
// Value & timestamp helpers
// =============================================================================

/// Lenient decimal read: the venue flips between string and number encodings
/// per endpoint, so both are accepted.
pub(crate) fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str_exact(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        Value::Number(n) => Decimal::from_str_exact(&n.to_string()).ok(),
        _ => None,
    }
}

/// String-or-number read, preserving the decimal literal for the
/// precision engine.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Epoch-seconds value (number or numeric string) to canonical milliseconds.
pub(crate) fn value_to_seconds_ms(value: &Value) -> Option<UnixMillis> {
    let seconds = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    Some(seconds * 1000)
}

/// ISO-8601 string to canonical milliseconds.
pub(crate) fn parse_8601(raw: &str) -> Option<UnixMillis> {
    chrono::DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Canonical milliseconds back to an ISO-8601 string.
pub(crate) fn iso_8601(millis: UnixMillis) -> Option<String> {
    use chrono::{SecondsFormat, TimeZone, Utc};
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub(crate) fn now_millis() -> UnixMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Serde adapters for lenient fields
// =============================================================================

pub(crate) fn de_opt_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_decimal))
}

pub(crate) fn de_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_string))
}

pub(crate) fn de_opt_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| match v {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{OrderStatus, TransactionStatus};

    #[test]
    fn test_signature_deterministic() {
        let auth = ExbitronAuth::new("key".to_string(), "secret".to_string());
        let first = auth.sign("1660000000000").unwrap();
        let second = auth.sign("1660000000000").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(first, first.to_lowercase());
    }

    #[test]
    fn test_signature_changes_with_any_input() {
        let auth = ExbitronAuth::new("key".to_string(), "secret".to_string());
        let base = auth.sign("1660000000000").unwrap();

        assert_ne!(auth.sign("1660000000001").unwrap(), base);

        let other_key = ExbitronAuth::new("key2".to_string(), "secret".to_string());
        assert_ne!(other_key.sign("1660000000000").unwrap(), base);

        let other_secret = ExbitronAuth::new("key".to_string(), "secret2".to_string());
        assert_ne!(other_secret.sign("1660000000000").unwrap(), base);
    }

    #[test]
    fn test_interpolate_path_consumes_keys() {
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), "ltcusdt".to_string());
        params.insert("limit".to_string(), "10".to_string());
        let (path, rest) = interpolate_path("markets/{market}/trades", params);
        assert_eq!(path, "markets/ltcusdt/trades");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest.get("limit").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_build_get_query() {
        let signer = RequestSigner::new(DEFAULT_HOSTNAME.to_string(), None);
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), "ltcusdt".to_string());
        params.insert("period".to_string(), "60".to_string());
        let request = signer
            .build(Api::Public, Method::GET, "markets/{market}/k-line", params)
            .unwrap();
        assert_eq!(
            request.url,
            "https://exbitron.com/api/v2/peatio/public/markets/ltcusdt/k-line?period=60"
        );
        assert!(request.body.is_none());
    }

    #[test]
    fn test_build_post_json_body() {
        let auth = ExbitronAuth::new("key".to_string(), "secret".to_string());
        let signer = RequestSigner::new(DEFAULT_HOSTNAME.to_string(), Some(auth));
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), "ltcusdt".to_string());
        params.insert("side".to_string(), "sell".to_string());
        let request = signer
            .build(Api::Private, Method::POST, "market/orders", params)
            .unwrap();
        assert_eq!(request.url, "https://exbitron.com/api/v2/peatio/market/orders");
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["market"], "ltcusdt");
        assert_eq!(body["side"], "sell");
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "Content-type" && v == "application/json"));
        assert!(request.headers.iter().any(|(k, _)| k == "X-Auth-Signature"));
        assert!(request.headers.iter().any(|(k, _)| k == "X-Auth-Nonce"));
        assert!(request.headers.iter().any(|(k, v)| k == "X-Auth-ApiKey" && v == "key"));
    }

    #[test]
    fn test_private_without_credentials() {
        let signer = RequestSigner::new(DEFAULT_HOSTNAME.to_string(), None);
        let result = signer.build(Api::Private, Method::GET, "account/balances", BTreeMap::new());
        assert!(matches!(result, Err(ExchangeError::Authentication(_))));
    }

    #[test]
    fn test_totp_code_shape() {
        // RFC 6238 test secret, base32
        let secret = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
        let code = totp_code(secret, 59).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        // same 30s window, same code
        assert_eq!(code, totp_code(secret, 31).unwrap());
    }

    #[test]
    fn test_classify_rate_limit_regardless_of_body() {
        assert!(matches!(
            classify_response(429, None),
            Some(ExchangeError::RateLimited(_))
        ));
        let body = serde_json::json!({"errors": ["market.order.invalid_side"]});
        assert!(matches!(
            classify_response(418, Some(&body)),
            Some(ExchangeError::RateLimited(_))
        ));
    }

    #[test]
    fn test_classify_vendor_tokens() {
        let not_found = serde_json::json!({"errors": ["market.order.invaild_id_or_uuid"]});
        assert!(matches!(
            classify_response(422, Some(&not_found)),
            Some(ExchangeError::OrderNotFound(_))
        ));

        let poor = serde_json::json!({"errors": ["market.account.insufficient_balance"]});
        assert!(matches!(
            classify_response(422, Some(&poor)),
            Some(ExchangeError::InsufficientFunds(_))
        ));

        let bad_side = serde_json::json!({"errors": ["market.order.invalid_side"]});
        assert!(matches!(
            classify_response(422, Some(&bad_side)),
            Some(ExchangeError::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_classify_unmatched_token_carries_body() {
        let body = serde_json::json!({"errors": ["market.order.something_new"]});
        match classify_response(422, Some(&body)) {
            Some(ExchangeError::Exchange(raw)) => {
                assert!(raw.contains("market.order.something_new"))
            }
            other => panic!("expected Exchange fault, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_success_and_bodyless() {
        assert!(classify_response(200, None).is_none());
        let body = serde_json::json!({"errors": ["market.order.invalid_side"]});
        assert!(classify_response(201, Some(&body)).is_none());
        assert!(classify_response(500, None).is_none());
    }

    #[test]
    fn test_order_status_table() {
        assert_eq!(converters::parse_order_status("wait"), OrderStatus::Open);
        assert_eq!(converters::parse_order_status("pending"), OrderStatus::Open);
        assert_eq!(converters::parse_order_status("done"), OrderStatus::Closed);
        assert_eq!(converters::parse_order_status("cancel"), OrderStatus::Canceled);
        assert_eq!(
            converters::parse_order_status("reject"),
            OrderStatus::Other("reject".to_string())
        );
    }

    #[test]
    fn test_transaction_status_table() {
        assert_eq!(
            converters::parse_transaction_status("dispatched"),
            TransactionStatus::Ok
        );
        assert_eq!(
            converters::parse_transaction_status("succeed"),
            TransactionStatus::Ok
        );
        assert_eq!(
            converters::parse_transaction_status("accepted"),
            TransactionStatus::Pending
        );
        assert_eq!(
            converters::parse_transaction_status("rejected"),
            TransactionStatus::Failed
        );
        assert_eq!(
            converters::parse_transaction_status("canceled"),
            TransactionStatus::Canceled
        );
        assert_eq!(
            converters::parse_transaction_status("frozen"),
            TransactionStatus::Other("frozen".to_string())
        );
    }

    #[test]
    fn test_timestamp_helpers() {
        assert_eq!(parse_8601("2021-10-09T08:08:46+03:00"), Some(1633756126000));
        let iso = iso_8601(1633756126000).unwrap();
        assert_eq!(parse_8601(&iso), Some(1633756126000));
        assert_eq!(
            value_to_seconds_ms(&Value::Number(1633392000.into())),
            Some(1633392000000)
        );
    }
}
