//! Facility volume balancing for monthly production reports.
//!
//! The engine cleans reported volumes, weights them by activity factor,
//! nulls or drops excluded activity/product pairs and checks that every
//! facility nets out to zero within a tolerance.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
