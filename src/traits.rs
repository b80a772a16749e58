//! Canonical trading-data model and the transport seam
//!
//! Venue-independent record shapes every response normalizes into, plus the
//! [`HttpTransport`] trait the adapter hands its request envelopes to. The
//! adapter never opens sockets itself.

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::errors::Result;

pub type UnixMillis = i64;

// ============================================================================
// Enums
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type accepted by the venue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

/// Canonical order lifecycle state. Venue states outside the mapping table
/// pass through unchanged in [`OrderStatus::Other`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Other(String),
}

impl OrderStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Canceled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurrencyType {
    Fiat,
    Crypto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

/// Canonical transaction state. Unrecognized venue tokens pass through in
/// [`TransactionStatus::Other`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Ok,
    Pending,
    Failed,
    Canceled,
    Other(String),
}

/// Canonical candle timeframe tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    D3,
    W1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformStatus {
    Ok,
    Maintenance,
}

// ============================================================================
// Catalog records
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct CurrencyLimits {
    /// Minimum deposit amount.
    pub deposit_min: Option<Decimal>,
    /// Minimum withdrawal amount.
    pub withdraw_min: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Currency {
    /// Venue-native identifier, e.g. `usdt-trc20`.
    pub id: String,
    /// Canonical code after alias folding, e.g. `USDT`.
    pub code: String,
    pub name: Option<String>,
    pub currency_type: CurrencyType,
    /// Deposits and withdrawals both enabled.
    pub active: bool,
    pub withdraw_fee: Option<Decimal>,
    pub precision: Option<u32>,
    pub limits: CurrencyLimits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketPrecision {
    pub amount: Option<u32>,
    pub price: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MinMax {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MarketLimits {
    pub amount: MinMax,
    pub price: MinMax,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Market {
    /// Venue-native identifier, e.g. `ltcusdt`.
    pub id: String,
    /// Canonical symbol, always `base + "/" + quote`.
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub base_id: String,
    pub quote_id: String,
    pub active: bool,
    pub spot: bool,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub precision: MarketPrecision,
    pub limits: MarketLimits,
}

// ============================================================================
// Market data records
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    /// Remaining (unfilled) volume resting at this price.
    pub amount: Decimal,
}

/// Complete snapshot of one side pair; rebuilt in full on every fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderBook {
    pub symbol: Option<String>,
    /// Sorted descending by price.
    pub bids: Vec<BookLevel>,
    /// Sorted ascending by price.
    pub asks: Vec<BookLevel>,
    pub timestamp: Option<UnixMillis>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ticker {
    pub symbol: Option<String>,
    pub timestamp: Option<UnixMillis>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    /// Venue-reported volume-weighted average price.
    pub vwap: Option<Decimal>,
    pub open: Option<Decimal>,
    /// Close and last are the same value on this venue.
    pub last: Option<Decimal>,
    /// last − open, decimal-string arithmetic.
    pub change: Option<Decimal>,
    /// change / open × 100; zero when open is zero.
    pub percentage: Option<Decimal>,
    /// (last + open) / 2.
    pub average: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Trade {
    pub id: Option<String>,
    pub order_id: Option<String>,
    pub timestamp: Option<UnixMillis>,
    pub symbol: Option<String>,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub cost: Option<Decimal>,
}

/// One OHLCV candle; timestamp in milliseconds, remaining columns exactly as
/// the venue reported them.
#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    pub timestamp: Option<UnixMillis>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: Option<String>,
    pub timestamp: Option<UnixMillis>,
    pub last_trade_timestamp: Option<UnixMillis>,
    pub symbol: Option<String>,
    /// Venue `ord_type` passthrough (`limit`, `market`).
    pub order_type: Option<String>,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub filled: Option<Decimal>,
    pub remaining: Option<Decimal>,
    pub average: Option<Decimal>,
    pub status: Option<OrderStatus>,
    pub trades: Vec<Trade>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fee {
    pub currency: Option<String>,
    pub cost: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub id: Option<String>,
    pub txid: Option<String>,
    pub timestamp: Option<UnixMillis>,
    pub updated: Option<UnixMillis>,
    pub transaction_type: Option<TransactionType>,
    pub address: Option<String>,
    pub tag: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub status: Option<TransactionStatus>,
    pub fee: Fee,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Balance {
    /// Available balance.
    pub free: Decimal,
    /// Locked balance.
    pub used: Decimal,
}

impl Balance {
    /// Derived, never stored independently.
    pub fn total(&self) -> Decimal {
        self.free + self.used
    }
}

/// Per-currency balances keyed by canonical code. A currency absent from the
/// venue response is absent here; callers must not assume explicit zeros.
pub type Balances = HashMap<String, Balance>;

#[derive(Clone, Debug, PartialEq)]
pub struct DepositAddress {
    pub currency: String,
    pub address: String,
    pub tag: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExchangeStatus {
    pub status: PlatformStatus,
    pub updated: UnixMillis,
}

// ============================================================================
// Transport boundary
// ============================================================================

/// Outbound request envelope produced by the signer. No network I/O happens
/// before this is handed to the transport.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: String,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Raw transport outcome: status plus the parsed JSON body, if the body
/// parsed as JSON at all.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

/// The external collaborator that actually executes requests. Implementations
/// surface connection-level failures as `ExchangeError::Transport`; HTTP
/// error statuses come back as ordinary responses for the classifier.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}
