//! Lifecycle and notification engine for the service marketplace.
//!
//! Booking, bid and review transitions emit catalog events; the dispatcher turns those
//! events into addressed notifications, the reaper retires expired ones and the stats
//! aggregator folds completed bookings into per-customer totals.

pub mod config;
pub mod error;
pub mod marketplace;
pub mod telemetry;
