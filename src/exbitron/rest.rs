//! Exbitron REST adapter
//!
//! One method per venue operation. Every call follows the same path: build
//! the signed envelope, hand it to the transport, classify the outcome, then
//! normalize the raw body into canonical records. Normalization is
//! synchronous; the only suspension point is the transport round-trip.

use parking_lot::RwLock;
use reqwest::Method;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::catalog::{currency_code, MarketCatalog, RawCurrency, RawMarket};
use super::common::{
    self, classify_response, converters, de_opt_decimal, de_opt_string, Api, ExbitronAuth,
    ExbitronConfig, RequestSigner, DEFAULT_CATALOG_LIMIT,
};
use crate::errors::{ExchangeError, Result};
use crate::precision;
use crate::traits::{
    Balance, Balances, BookLevel, Candle, Currency, DepositAddress, ExchangeStatus, HttpTransport,
    Market, Order, OrderBook, OrderStatus, OrderType, PlatformStatus, Side, Ticker, Timeframe,
    Trade, Transaction, TransactionType, UnixMillis,
};

pub struct ExbitronAdapter {
    transport: Arc<dyn HttpTransport>,
    signer: RequestSigner,
    config: ExbitronConfig,
    catalog: RwLock<MarketCatalog>,
}

// =============================================================================
// Raw response shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawTrade {
    #[serde(default, deserialize_with = "de_opt_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    total: Option<Decimal>,
    #[serde(default)]
    market: Option<String>,
    /// ISO-8601 string on private endpoints, epoch seconds on the public
    /// trade feed; the list fetcher reformats the latter before parsing.
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    taker_type: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(default, deserialize_with = "de_opt_string")]
    id: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    ord_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    avg_price: Option<Decimal>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    market: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    origin_volume: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    remaining_volume: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    executed_volume: Option<Decimal>,
    #[serde(default)]
    trades: Vec<RawTrade>,
}

#[derive(Debug, Deserialize)]
struct RawOrderBook {
    #[serde(default)]
    asks: Vec<RawOrder>,
    #[serde(default)]
    bids: Vec<RawOrder>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    #[serde(default, deserialize_with = "de_opt_string")]
    currency: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    balance: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    locked: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTransaction {
    #[serde(default, deserialize_with = "de_opt_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    tid: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    fee: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_string")]
    txid: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default, rename = "type")]
    transaction_type: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    rid: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    blockchain_txid: Option<String>,
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| ExchangeError::Exchange(format!("unexpected response shape: {e}")))
}

// =============================================================================
// Adapter
// =============================================================================

impl ExbitronAdapter {
    pub fn new(config: ExbitronConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let auth = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => Some(ExbitronAuth::new(key.clone(), secret.clone())),
            _ => None,
        };
        let signer = RequestSigner::new(config.hostname.clone(), auth);
        Self {
            transport,
            signer,
            config,
            catalog: RwLock::new(MarketCatalog::default()),
        }
    }

    /// Snapshot of the currently loaded catalog.
    pub fn catalog(&self) -> MarketCatalog {
        self.catalog.read().clone()
    }

    /// One transport round-trip: sign, execute, classify. Classification
    /// happens exactly once, before any normalization.
    async fn request(
        &self,
        api: Api,
        method: Method,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> Result<Value> {
        let request = self.signer.build(api, method, path, params)?;
        debug!(url = %request.url, method = %request.method, "executing request");
        let response = self.transport.execute(request).await?;
        if let Some(fault) = classify_response(response.status, response.body.as_ref()) {
            return Err(fault);
        }
        if !(200..300).contains(&response.status) {
            let detail = response.body.map(|b| b.to_string()).unwrap_or_default();
            return Err(ExchangeError::Exchange(format!(
                "HTTP {} {detail}",
                response.status
            )));
        }
        response
            .body
            .ok_or_else(|| ExchangeError::Exchange("empty response body".to_string()))
    }

    fn market_for_symbol(&self, symbol: &str) -> Result<Arc<Market>> {
        self.catalog.read().market_by_symbol(symbol).ok_or_else(|| {
            ExchangeError::Argument(format!("unknown symbol {symbol}; call load_markets first"))
        })
    }

    fn currency_for_code(&self, code: &str) -> Result<Arc<Currency>> {
        self.catalog.read().currency_by_code(code).ok_or_else(|| {
            ExchangeError::Argument(format!("unknown currency {code}; call load_markets first"))
        })
    }

    fn symbol_for_market_id(&self, id: Option<&str>) -> Option<String> {
        id.and_then(|id| self.catalog.read().symbol_for_id(id))
    }

    // -------------------------------------------------------------------------
    // Public endpoints
    // -------------------------------------------------------------------------

    /// Venue clock, canonical milliseconds.
    pub async fn fetch_time(&self) -> Result<UnixMillis> {
        let response = self
            .request(Api::Public, Method::GET, "timestamp", BTreeMap::new())
            .await?;
        response
            .as_str()
            .and_then(common::parse_8601)
            .ok_or_else(|| ExchangeError::Exchange(format!("unexpected timestamp body: {response}")))
    }

    pub async fn fetch_status(&self) -> Result<ExchangeStatus> {
        let response = self
            .request(Api::Public, Method::GET, "health/ready", BTreeMap::new())
            .await?;
        let status = if response.as_i64() == Some(200) {
            PlatformStatus::Ok
        } else {
            PlatformStatus::Maintenance
        };
        Ok(ExchangeStatus {
            status,
            updated: common::now_millis(),
        })
    }

    async fn fetch_raw_markets(&self) -> Result<Vec<RawMarket>> {
        let mut params = BTreeMap::new();
        params.insert("type".to_string(), "spot".to_string());
        params.insert("limit".to_string(), DEFAULT_CATALOG_LIMIT.to_string());
        let response = self
            .request(Api::Public, Method::GET, "markets", params)
            .await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        decode(response)
    }

    async fn fetch_raw_currencies(&self) -> Result<Vec<RawCurrency>> {
        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), DEFAULT_CATALOG_LIMIT.to_string());
        let response = self
            .request(Api::Public, Method::GET, "currencies", params)
            .await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        decode(response)
    }

    pub async fn fetch_markets(&self) -> Result<Vec<Market>> {
        let raw = self.fetch_raw_markets().await?;
        let catalog = MarketCatalog::rebuild(&raw, &[], &self.config);
        Ok(catalog.markets().iter().map(|m| (**m).clone()).collect())
    }

    pub async fn fetch_currencies(&self) -> Result<Vec<Currency>> {
        let raw = self.fetch_raw_currencies().await?;
        let catalog = MarketCatalog::rebuild(&[], &raw, &self.config);
        Ok(catalog.currencies().iter().map(|c| (**c).clone()).collect())
    }

    /// Caller-triggered catalog refresh. The loaded snapshot is replaced
    /// only after both listings fetched and normalized; on error the last
    /// good catalog stays in place.
    pub async fn load_markets(&self) -> Result<()> {
        let raw_markets = self.fetch_raw_markets().await?;
        let raw_currencies = self.fetch_raw_currencies().await?;
        let rebuilt = MarketCatalog::rebuild(&raw_markets, &raw_currencies, &self.config);
        *self.catalog.write() = rebuilt;
        Ok(())
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let market = self.market_for_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), market.id.clone());
        let response = self
            .request(Api::Public, Method::GET, "markets/{market}/tickers", params)
            .await?;
        Ok(parse_ticker(&response, Some(market.symbol.clone())))
    }

    pub async fn fetch_tickers(&self, symbols: Option<&[&str]>) -> Result<Vec<Ticker>> {
        let response = self
            .request(Api::Public, Method::GET, "markets/tickers", BTreeMap::new())
            .await?;
        let entries = match response.as_object() {
            Some(map) => map,
            None => return Ok(Vec::new()),
        };
        let mut tickers = Vec::with_capacity(entries.len());
        for (market_id, envelope) in entries {
            let symbol = self.symbol_for_market_id(Some(market_id.as_str()));
            tickers.push(parse_ticker(envelope, symbol));
        }
        if let Some(wanted) = symbols {
            tickers.retain(|t| t.symbol.as_deref().map_or(false, |s| wanted.contains(&s)));
        }
        tickers.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(tickers)
    }

    /// Full order book snapshot; both sides rebuilt on every call.
    pub async fn fetch_order_book(&self, symbol: &str, limit: Option<u32>) -> Result<OrderBook> {
        let market = self.market_for_symbol(symbol)?;
        let depth = limit.unwrap_or(self.config.order_book_limit);
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), market.id.clone());
        params.insert("bids_limit".to_string(), depth.to_string());
        params.insert("asks_limit".to_string(), depth.to_string());
        let response = self
            .request(
                Api::Public,
                Method::GET,
                "markets/{market}/order-book",
                params,
            )
            .await?;
        let raw: RawOrderBook = decode(response)?;

        let mut bids = book_side(&raw.bids);
        let mut asks = book_side(&raw.asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        Ok(OrderBook {
            symbol: Some(market.symbol.clone()),
            bids,
            asks,
            timestamp: None,
        })
    }

    pub async fn fetch_trades(
        &self,
        symbol: &str,
        since: Option<UnixMillis>,
        limit: Option<u32>,
    ) -> Result<Vec<Trade>> {
        let market = self.market_for_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), market.id.clone());
        params.insert("order_by".to_string(), "asc".to_string());
        if let Some(limit) = limit {
            params.insert("limit".to_string(), limit.to_string());
        }
        if let Some(since) = since {
            params.insert("timestamp".to_string(), (since / 1000).to_string());
        }
        let response = self
            .request(Api::Public, Method::GET, "markets/{market}/trades", params)
            .await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        let mut raw: Vec<RawTrade> = decode(response)?;
        // The public feed reports creation time as epoch seconds while the
        // per-item converter reads ISO-8601 strings, so rewrite the column
        // first. ISO strings coming through this path are left untouched.
        for item in &mut raw {
            if let Some(ms) = item.created_at.as_ref().and_then(common::value_to_seconds_ms) {
                item.created_at = common::iso_8601(ms).map(Value::String);
            }
        }
        Ok(raw
            .iter()
            .map(|t| self.parse_trade(t, Some(market.as_ref())))
            .collect())
    }

    pub async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<UnixMillis>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>> {
        let market = self.market_for_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), market.id.clone());
        params.insert(
            "period".to_string(),
            converters::timeframe_code(timeframe).to_string(),
        );
        params.insert("limit".to_string(), limit.unwrap_or(100).to_string());
        if let Some(since) = since {
            params.insert("time_from".to_string(), (since / 1000).to_string());
        }
        let response = self
            .request(Api::Public, Method::GET, "markets/{market}/k-line", params)
            .await?;
        let rows: Vec<Vec<Value>> = decode(response)?;
        Ok(rows.iter().map(|row| parse_candle(row)).collect())
    }

    // -------------------------------------------------------------------------
    // Private endpoints
    // -------------------------------------------------------------------------

    pub async fn fetch_balance(&self) -> Result<Balances> {
        let response = self
            .request(Api::Private, Method::GET, "account/balances", BTreeMap::new())
            .await?;
        if !response.is_array() {
            return Ok(Balances::new());
        }
        let raw: Vec<RawBalance> = decode(response)?;
        let mut balances = Balances::new();
        for entry in raw {
            if let Some(currency_id) = entry.currency {
                balances.insert(
                    currency_code(&currency_id),
                    Balance {
                        free: entry.balance.unwrap_or_default(),
                        used: entry.locked.unwrap_or_default(),
                    },
                );
            }
        }
        Ok(balances)
    }

    pub async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order> {
        let market = self.market_for_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("market".to_string(), market.id.clone());
        params.insert("side".to_string(), side.as_str().to_string());
        params.insert(
            "volume".to_string(),
            amount_to_precision(&market, amount),
        );
        params.insert("ord_type".to_string(), order_type.as_str().to_string());
        match order_type {
            OrderType::Limit => {
                let price = price.ok_or_else(|| {
                    ExchangeError::Argument("price is required for limit orders".to_string())
                })?;
                params.insert("price".to_string(), price_to_precision(&market, price));
            }
            OrderType::Market => {
                if let Some(price) = price {
                    params.insert("price".to_string(), price.normalize().to_string());
                }
            }
        }
        let response = self
            .request(Api::Private, Method::POST, "market/orders", params)
            .await?;
        let raw: RawOrder = decode(response)?;
        Ok(self.parse_order(&raw, Some(market.as_ref())))
    }

    /// Cancels one order. A post-cancel state of `done`/`cancel` means there
    /// was nothing left to cancel; that surfaces as [`ExchangeError::OrderNotFound`]
    /// even though the venue reported success.
    pub async fn cancel_order(&self, id: &str) -> Result<Order> {
        let mut params = BTreeMap::new();
        params.insert("id".to_string(), id.to_string());
        let response = self
            .request(
                Api::Private,
                Method::POST,
                "market/orders/{id}/cancel",
                params,
            )
            .await?;
        let raw: RawOrder = decode(response)?;
        let order = self.parse_order(&raw, None);
        if order
            .status
            .as_ref()
            .map_or(false, OrderStatus::is_finished)
        {
            return Err(ExchangeError::OrderNotFound(format!(
                "order {id} already finished"
            )));
        }
        Ok(order)
    }

    pub async fn cancel_all_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let mut params = BTreeMap::new();
        params.insert("market_type".to_string(), "spot".to_string());
        if let Some(symbol) = symbol {
            let market = self.market_for_symbol(symbol)?;
            params.insert("market".to_string(), market.id.clone());
        }
        let response = self
            .request(Api::Private, Method::POST, "market/orders/cancel", params)
            .await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawOrder> = decode(response)?;
        Ok(raw.iter().map(|o| self.parse_order(o, None)).collect())
    }

    pub async fn fetch_order(&self, id: &str) -> Result<Order> {
        let mut params = BTreeMap::new();
        params.insert("id".to_string(), id.to_string());
        let response = self
            .request(Api::Private, Method::GET, "market/orders/{id}", params)
            .await?;
        let raw: RawOrder = decode(response)?;
        Ok(self.parse_order(&raw, None))
    }

    pub async fn fetch_orders(
        &self,
        symbol: Option<&str>,
        since: Option<UnixMillis>,
    ) -> Result<Vec<Order>> {
        self.fetch_orders_with_state(symbol, since, None).await
    }

    pub async fn fetch_open_orders(
        &self,
        symbol: Option<&str>,
        since: Option<UnixMillis>,
    ) -> Result<Vec<Order>> {
        self.fetch_orders_with_state(symbol, since, Some("wait")).await
    }

    pub async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<UnixMillis>,
    ) -> Result<Vec<Order>> {
        self.fetch_orders_with_state(symbol, since, Some("done")).await
    }

    async fn fetch_orders_with_state(
        &self,
        symbol: Option<&str>,
        since: Option<UnixMillis>,
        state: Option<&str>,
    ) -> Result<Vec<Order>> {
        let market = match symbol {
            Some(symbol) => Some(self.market_for_symbol(symbol)?),
            None => None,
        };
        let mut params = BTreeMap::new();
        params.insert("market_type".to_string(), "spot".to_string());
        params.insert("order_by".to_string(), "asc".to_string());
        if let Some(market) = &market {
            params.insert("market".to_string(), market.id.clone());
        }
        if let Some(state) = state {
            params.insert("state".to_string(), state.to_string());
        }
        if let Some(since) = since {
            params.insert("time_from".to_string(), (since / 1000).to_string());
        }
        let response = self
            .request(Api::Private, Method::GET, "market/orders", params)
            .await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawOrder> = decode(response)?;
        Ok(raw
            .iter()
            .map(|o| self.parse_order(o, market.as_deref()))
            .collect())
    }

    pub async fn fetch_my_trades(
        &self,
        symbol: Option<&str>,
        since: Option<UnixMillis>,
    ) -> Result<Vec<Trade>> {
        let market = match symbol {
            Some(symbol) => Some(self.market_for_symbol(symbol)?),
            None => None,
        };
        let mut params = BTreeMap::new();
        params.insert("market_type".to_string(), "spot".to_string());
        params.insert("order_by".to_string(), "asc".to_string());
        if let Some(market) = &market {
            params.insert("market".to_string(), market.id.clone());
        }
        if let Some(since) = since {
            params.insert("time_from".to_string(), (since / 1000).to_string());
        }
        let response = self
            .request(Api::Private, Method::GET, "market/trades", params)
            .await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawTrade> = decode(response)?;
        Ok(raw
            .iter()
            .map(|t| self.parse_trade(t, market.as_deref()))
            .collect())
    }

    pub async fn fetch_deposit_address(&self, code: &str) -> Result<DepositAddress> {
        let currency = self.currency_for_code(code)?;
        let mut params = BTreeMap::new();
        params.insert("currency".to_string(), currency.id.clone());
        let response = self
            .request(
                Api::Private,
                Method::GET,
                "account/deposit_address/{currency}",
                params,
            )
            .await?;
        let address = response
            .get("address")
            .and_then(Value::as_str)
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| {
                ExchangeError::Exchange(format!("no deposit address for {code}: {response}"))
            })?;
        Ok(DepositAddress {
            currency: currency.code.clone(),
            address: address.to_string(),
            tag: None,
        })
    }

    pub async fn fetch_transactions(
        &self,
        code: Option<&str>,
        since: Option<UnixMillis>,
        limit: Option<u32>,
    ) -> Result<Vec<Transaction>> {
        self.fetch_transactions_by_type(None, code, since, limit).await
    }

    pub async fn fetch_deposits(
        &self,
        code: Option<&str>,
        since: Option<UnixMillis>,
        limit: Option<u32>,
    ) -> Result<Vec<Transaction>> {
        self.fetch_transactions_by_type(Some(TransactionType::Deposit), code, since, limit)
            .await
    }

    pub async fn fetch_withdrawals(
        &self,
        code: Option<&str>,
        since: Option<UnixMillis>,
        limit: Option<u32>,
    ) -> Result<Vec<Transaction>> {
        self.fetch_transactions_by_type(Some(TransactionType::Withdrawal), code, since, limit)
            .await
    }

    async fn fetch_transactions_by_type(
        &self,
        transaction_type: Option<TransactionType>,
        code: Option<&str>,
        since: Option<UnixMillis>,
        limit: Option<u32>,
    ) -> Result<Vec<Transaction>> {
        let mut params = BTreeMap::new();
        params.insert("order_by".to_string(), "asc".to_string());
        if let Some(code) = code {
            let currency = self.currency_for_code(code)?;
            params.insert("currency".to_string(), currency.id.clone());
        }
        if let Some(since) = since {
            params.insert("time_from".to_string(), (since / 1000).to_string());
        }
        if let Some(limit) = limit {
            params.insert("limit".to_string(), limit.to_string());
        }
        let path = match transaction_type {
            None => "account/transactions",
            Some(TransactionType::Deposit) => "account/deposits",
            Some(TransactionType::Withdrawal) => "account/withdraws",
        };
        let response = self.request(Api::Private, Method::GET, path, params).await?;
        if !response.is_array() {
            return Ok(Vec::new());
        }
        let mut raw: Vec<RawTransaction> = decode(response)?;
        for item in &mut raw {
            massage_transaction(item, transaction_type);
        }
        Ok(raw
            .iter()
            .map(|t| {
                let mut transaction = parse_transaction(t);
                if transaction_type.is_some() {
                    transaction.transaction_type = transaction_type;
                }
                transaction
            })
            .collect())
    }

    /// Submits a withdrawal. The TOTP secret and the beneficiary id are both
    /// checked before any envelope is built, so a misconfigured caller never
    /// reaches the network.
    pub async fn withdraw(
        &self,
        code: &str,
        amount: Decimal,
        address: &str,
        tag: Option<&str>,
        beneficiary_id: Option<&str>,
    ) -> Result<Transaction> {
        let secret = self.config.totp_secret.as_deref().ok_or_else(|| {
            ExchangeError::Authentication(
                "totp_secret is required to withdraw funds".to_string(),
            )
        })?;
        if address.trim().is_empty() {
            return Err(ExchangeError::Argument(
                "withdrawal address must not be empty".to_string(),
            ));
        }
        let beneficiary_id = beneficiary_id.ok_or_else(|| {
            ExchangeError::Argument(
                "withdraw requires a beneficiary id (see account/beneficiaries)".to_string(),
            )
        })?;
        let currency = self.currency_for_code(code)?;
        let otp = common::totp_code(secret, (common::now_millis() / 1000) as u64)?;

        let mut params = BTreeMap::new();
        params.insert("otp".to_string(), otp);
        params.insert("beneficiary_id".to_string(), beneficiary_id.to_string());
        params.insert("currency".to_string(), currency.id.clone());
        params.insert("amount".to_string(), amount.normalize().to_string());
        if let Some(tag) = tag {
            params.insert("note".to_string(), tag.to_string());
        }
        let response = self
            .request(Api::Private, Method::POST, "account/withdraws", params)
            .await?;
        let mut raw: RawTransaction = decode(response).unwrap_or_default();
        massage_transaction(&mut raw, Some(TransactionType::Withdrawal));
        let mut transaction = parse_transaction(&raw);
        transaction.transaction_type = Some(TransactionType::Withdrawal);
        Ok(transaction)
    }

    // -------------------------------------------------------------------------
    // Normalizers needing catalog access
    // -------------------------------------------------------------------------

    fn parse_trade(&self, raw: &RawTrade, market: Option<&Market>) -> Trade {
        // the generic converter reads string timestamps only
        let timestamp = raw
            .created_at
            .as_ref()
            .and_then(Value::as_str)
            .and_then(common::parse_8601);
        let side = match raw.side.as_deref() {
            Some(side) => converters::parse_side(side),
            // venue omits the side on public trades; the reported taker
            // type is the opposite of the resting order's side
            None => Some(match raw.taker_type.as_deref() {
                Some("buy") => Side::Sell,
                _ => Side::Buy,
            }),
        };
        let symbol = market
            .map(|m| m.symbol.clone())
            .or_else(|| self.symbol_for_market_id(raw.market.as_deref()));
        Trade {
            id: raw.id.clone(),
            order_id: raw.order_id.clone(),
            timestamp,
            symbol,
            side,
            price: raw.price,
            amount: raw.amount,
            cost: raw.total,
        }
    }

    fn parse_order(&self, raw: &RawOrder, market: Option<&Market>) -> Order {
        let symbol = market
            .map(|m| m.symbol.clone())
            .or_else(|| self.symbol_for_market_id(raw.market.as_deref()));
        Order {
            id: raw.id.clone(),
            timestamp: raw.created_at.as_deref().and_then(common::parse_8601),
            last_trade_timestamp: raw.updated_at.as_deref().and_then(common::parse_8601),
            symbol,
            order_type: raw.ord_type.clone(),
            side: raw.side.as_deref().and_then(converters::parse_side),
            price: raw.price,
            amount: raw.origin_volume,
            filled: raw.executed_volume,
            remaining: raw.remaining_volume,
            average: raw.avg_price,
            status: raw.state.as_deref().map(converters::parse_order_status),
            trades: raw.trades.iter().map(|t| self.parse_trade(t, None)).collect(),
        }
    }
}

// =============================================================================
// Pure normalizers
// =============================================================================

/// Book levels from resting orders: price and remaining volume. Orders
/// without a price (should not happen in a book snapshot) are dropped.
fn book_side(orders: &[RawOrder]) -> Vec<BookLevel> {
    orders
        .iter()
        .filter_map(|order| {
            Some(BookLevel {
                price: order.price?,
                amount: order.remaining_volume?,
            })
        })
        .collect()
}

fn parse_candle(row: &[Value]) -> Candle {
    Candle {
        timestamp: row.first().and_then(common::value_to_seconds_ms),
        open: row.get(1).and_then(common::value_to_decimal),
        high: row.get(2).and_then(common::value_to_decimal),
        low: row.get(3).and_then(common::value_to_decimal),
        close: row.get(4).and_then(common::value_to_decimal),
        volume: row.get(5).and_then(common::value_to_decimal),
    }
}

/// Ticker normalization. The batch endpoint wraps each entry in a `ticker`
/// sub-object next to the `at` timestamp; the inner object is unwrapped when
/// present. Derived fields run through decimal-string arithmetic.
fn parse_ticker(value: &Value, symbol: Option<String>) -> Ticker {
    let timestamp = value.get("at").and_then(common::value_to_seconds_ms);
    let inner = match value.get("ticker") {
        Some(ticker) if ticker.is_object() => ticker,
        _ => value,
    };
    let string_field = |key: &str| inner.get(key).and_then(common::value_to_string);
    let decimal_field = |key: &str| inner.get(key).and_then(common::value_to_decimal);

    let last = string_field("last");
    let open = string_field("open");
    let (change, percentage, average) = match (last.as_deref(), open.as_deref()) {
        (Some(last), Some(open)) => ticker_math(last, open),
        _ => (None, None, None),
    };

    Ticker {
        symbol,
        timestamp,
        high: decimal_field("high"),
        low: decimal_field("low"),
        vwap: decimal_field("avg_price"),
        open: open.as_deref().and_then(|s| Decimal::from_str(s).ok()),
        last: last.as_deref().and_then(|s| Decimal::from_str(s).ok()),
        change,
        percentage,
        average,
    }
}

/// change = last − open; percentage = change / open × 100 (zero when open is
/// zero); average = (last + open) / 2. All on decimal strings.
fn ticker_math(last: &str, open: &str) -> (Option<Decimal>, Option<Decimal>, Option<Decimal>) {
    let to_decimal = |s: Option<String>| s.as_deref().and_then(|s| Decimal::from_str(s).ok());

    let change = precision::sub(last, open).ok();
    let open_is_zero = Decimal::from_str(open).map(|d| d.is_zero());
    let percentage = match open_is_zero {
        Ok(false) => change
            .as_deref()
            .and_then(|c| precision::div(c, open).ok())
            .and_then(|rel| precision::mul(&rel, "100").ok()),
        Ok(true) => Some("0".to_string()),
        Err(_) => None,
    };
    let average = precision::add(last, open)
        .ok()
        .and_then(|sum| precision::div(&sum, "2").ok());

    (to_decimal(change), to_decimal(percentage), to_decimal(average))
}

/// Deposit and withdrawal listings miss fields the generic transaction
/// parser reads; borrow them the way the venue intends: deposits report
/// completion time as `completed_at`, withdrawals report the beneficiary as
/// `rid` and the chain transaction as `blockchain_txid`.
fn massage_transaction(raw: &mut RawTransaction, transaction_type: Option<TransactionType>) {
    match transaction_type {
        Some(TransactionType::Deposit) => {
            raw.updated_at = raw.completed_at.clone();
        }
        Some(TransactionType::Withdrawal) => {
            raw.address = raw.rid.clone();
            raw.txid = raw.blockchain_txid.clone();
        }
        None => {}
    }
}

fn parse_transaction(raw: &RawTransaction) -> Transaction {
    let currency = raw.currency.as_deref().map(currency_code);
    Transaction {
        id: raw.id.clone().or_else(|| raw.tid.clone()),
        txid: raw.txid.clone(),
        timestamp: raw.created_at.as_deref().and_then(common::parse_8601),
        updated: raw.updated_at.as_deref().and_then(common::parse_8601),
        transaction_type: raw
            .transaction_type
            .as_deref()
            .and_then(converters::parse_transaction_type),
        address: raw.address.clone(),
        tag: raw.note.clone(),
        amount: raw.amount,
        currency: currency.clone(),
        status: raw
            .state
            .as_deref()
            .map(converters::parse_transaction_status),
        fee: crate::traits::Fee {
            currency,
            cost: raw.fee,
        },
    }
}

/// Truncates an amount to the market's amount precision for the wire.
fn amount_to_precision(market: &Market, amount: Decimal) -> String {
    match market.precision.amount {
        Some(dp) => amount
            .round_dp_with_strategy(dp, RoundingStrategy::ToZero)
            .normalize()
            .to_string(),
        None => amount.normalize().to_string(),
    }
}

fn price_to_precision(market: &Market, price: Decimal) -> String {
    match market.precision.price {
        Some(dp) => price
            .round_dp_with_strategy(dp, RoundingStrategy::ToZero)
            .normalize()
            .to_string(),
        None => price.normalize().to_string(),
    }
}
