//! Exbitron Exchange Adapter
//!
//! Wraps Exbitron's Peatio REST API (`/api/v2/peatio`) behind the canonical
//! trading-data model.
//!
//! # Module Structure
//!
//! - [`common`] - Authentication, request signing, response classification,
//!   and type converters
//! - [`catalog`] - Market/currency listing normalization and lookups
//! - [`rest`] - The adapter itself: one method per venue operation

pub mod catalog;
pub mod common;
pub mod rest;

pub use catalog::MarketCatalog;
pub use common::{Api, ExbitronAuth, ExbitronConfig, RequestSigner};
pub use rest::ExbitronAdapter;
