//! # HyperIndex Core
//!
//! Data model and aggregation engine for HyperIndex - directional conviction
//! of a curated wallet cohort on Hyperliquid perpetuals.
//!
//! This crate is pure: it turns per-wallet positions into a [`Snapshot`] and
//! knows how schedules advance, but performs no I/O. Persistence lives in
//! `hyperindex-store`, fetching and scheduling in `hyperindex-generator`.

pub mod aggregation;
pub mod cadence;
pub mod clock;
pub mod error;
pub mod models;

pub use aggregation::*;
pub use cadence::*;
pub use clock::*;
pub use error::*;
pub use models::*;
