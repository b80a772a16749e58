//! Exbitron exchange adapter core
//!
//! Converts the venue's REST responses and authentication scheme into a
//! canonical trading-data model (markets, currencies, balances, order books,
//! trades, candles, orders, transactions) and canonical requests back into
//! the venue wire format. Money values stay in exact decimals end to end;
//! signed requests are deterministic given a nonce.
//!
//! The HTTP transport is a collaborator behind [`traits::HttpTransport`]:
//! the adapter builds envelopes and normalizes responses, it never opens
//! sockets. A default `reqwest` implementation lives in [`transport`].

pub mod errors;
pub mod exbitron;
pub mod precision;
pub mod traits;
pub mod transport;

pub use errors::{ExchangeError, Result};
pub use exbitron::{ExbitronAdapter, ExbitronConfig};
pub use transport::ReqwestTransport;
