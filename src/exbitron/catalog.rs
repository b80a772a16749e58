//! Market and currency catalog
//!
//! Normalizes the venue's market/currency listings into canonical records
//! keyed by symbol, venue id, and currency code. Rebuilt as a whole on each
//! caller-triggered refresh; a failed refresh leaves the previous snapshot
//! in place. Malformed listing entries are dropped with a warning rather
//! than aborting the refresh.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::common::{de_opt_decimal, de_opt_string, de_opt_u32, ExbitronConfig};
use crate::traits::{
    Currency, CurrencyLimits, CurrencyType, Market, MarketLimits, MarketPrecision, MinMax,
};

/// Chain-suffixed venue ids that fold to a base asset code. Static adapter
/// configuration, keyed by uppercased venue id.
const COMMON_CURRENCIES: &[(&str, &str)] = &[
    ("BUSD-BEP20", "BUSD"),
    ("TRX-TRC20", "TRX"),
    ("USDT-TRC20", "USDT"),
];

/// Canonical currency code for a venue-native id.
pub fn currency_code(id: &str) -> String {
    let upper = id.to_uppercase();
    COMMON_CURRENCIES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, code)| code.to_string())
        .unwrap_or(upper)
}

// =============================================================================
// Raw listing shapes
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RawMarket {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub base_unit: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub quote_unit: Option<String>,
    #[serde(default, rename = "type")]
    pub market_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    pub amount_precision: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    pub price_precision: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub min_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub max_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub min_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct RawCurrency {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub currency_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub withdraw_fee: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    pub precision: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub min_deposit_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub min_withdraw_amount: Option<Decimal>,
    #[serde(default)]
    pub deposit_enabled: Option<bool>,
    #[serde(default)]
    pub withdraw_enabled: Option<bool>,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarketCatalog {
    markets_by_symbol: HashMap<String, Arc<Market>>,
    markets_by_id: HashMap<String, Arc<Market>>,
    currencies_by_code: HashMap<String, Arc<Currency>>,
}

impl MarketCatalog {
    /// Builds a catalog from raw listings. Pure: identical input yields an
    /// identical catalog. Entries missing identity fields are skipped.
    pub fn rebuild(
        raw_markets: &[RawMarket],
        raw_currencies: &[RawCurrency],
        config: &ExbitronConfig,
    ) -> Self {
        let mut markets_by_symbol = HashMap::new();
        let mut markets_by_id = HashMap::new();
        let mut currencies_by_code = HashMap::new();

        for raw in raw_markets {
            match normalize_market(raw, config) {
                Some(market) => {
                    let market = Arc::new(market);
                    markets_by_symbol.insert(market.symbol.clone(), Arc::clone(&market));
                    markets_by_id.insert(market.id.clone(), market);
                }
                None => warn!(id = ?raw.id, "skipping malformed market entry"),
            }
        }

        for raw in raw_currencies {
            match normalize_currency(raw) {
                Some(currency) => {
                    currencies_by_code.insert(currency.code.clone(), Arc::new(currency));
                }
                None => warn!(id = ?raw.id, "skipping malformed currency entry"),
            }
        }

        debug!(
            markets = markets_by_id.len(),
            currencies = currencies_by_code.len(),
            "catalog rebuilt"
        );

        Self {
            markets_by_symbol,
            markets_by_id,
            currencies_by_code,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markets_by_id.is_empty()
    }

    pub fn market_by_symbol(&self, symbol: &str) -> Option<Arc<Market>> {
        self.markets_by_symbol.get(symbol).cloned()
    }

    pub fn market_by_id(&self, id: &str) -> Option<Arc<Market>> {
        self.markets_by_id.get(id).cloned()
    }

    /// Canonical symbol for a venue market id; `None` when the catalog has
    /// no such id (records then carry an unset symbol, never an error).
    pub fn symbol_for_id(&self, id: &str) -> Option<String> {
        self.markets_by_id.get(id).map(|m| m.symbol.clone())
    }

    pub fn currency_by_code(&self, code: &str) -> Option<Arc<Currency>> {
        self.currencies_by_code.get(code).cloned()
    }

    pub fn markets(&self) -> Vec<Arc<Market>> {
        let mut markets: Vec<_> = self.markets_by_symbol.values().cloned().collect();
        markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        markets
    }

    pub fn currencies(&self) -> Vec<Arc<Currency>> {
        let mut currencies: Vec<_> = self.currencies_by_code.values().cloned().collect();
        currencies.sort_by(|a, b| a.code.cmp(&b.code));
        currencies
    }
}

fn normalize_market(raw: &RawMarket, config: &ExbitronConfig) -> Option<Market> {
    let id = raw.id.as_deref().filter(|s| !s.is_empty())?;
    let base_id = raw.base_unit.as_deref().filter(|s| !s.is_empty())?;
    let quote_id = raw.quote_unit.as_deref().filter(|s| !s.is_empty())?;

    let base = currency_code(base_id);
    let quote = currency_code(quote_id);
    // zero-valued price bounds mean "unbounded" on this venue
    let min_price = raw.min_price.filter(|p| !p.is_zero());
    let max_price = raw.max_price.filter(|p| !p.is_zero());

    Some(Market {
        id: id.to_string(),
        symbol: format!("{base}/{quote}"),
        base,
        quote,
        base_id: base_id.to_string(),
        quote_id: quote_id.to_string(),
        active: raw.state.as_deref() == Some("enabled"),
        spot: raw.market_type.as_deref() == Some("spot"),
        maker_fee: config.maker_fee,
        taker_fee: config.taker_fee,
        precision: MarketPrecision {
            amount: raw.amount_precision,
            price: raw.price_precision,
        },
        limits: MarketLimits {
            amount: MinMax {
                min: raw.min_amount,
                max: None,
            },
            price: MinMax {
                min: min_price,
                max: max_price,
            },
        },
    })
}

fn normalize_currency(raw: &RawCurrency) -> Option<Currency> {
    let id = raw.id.as_deref().filter(|s| !s.is_empty())?;
    let currency_type = match raw.currency_type.as_deref() {
        Some("fiat") => CurrencyType::Fiat,
        _ => CurrencyType::Crypto,
    };

    Some(Currency {
        id: id.to_string(),
        code: currency_code(id),
        name: raw.name.clone(),
        currency_type,
        active: raw.deposit_enabled.unwrap_or(false) && raw.withdraw_enabled.unwrap_or(false),
        withdraw_fee: raw.withdraw_fee,
        precision: raw.precision,
        limits: CurrencyLimits {
            deposit_min: raw.min_deposit_amount,
            withdraw_min: raw.min_withdraw_amount,
        },
    })
}
