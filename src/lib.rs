//! # trustgate-rs
//!
//! Adaptive Zero Trust access decision engine.
//!
//! This crate continuously scores how much an authenticated actor (a session,
//! device, or service) should be trusted, and gates access to protected
//! resources based on that score, configurable policies, and behavioral
//! evidence. Three components compose the engine:
//!
//! - [`behavior`] — per-subject baselines of keystroke/motion behavior and
//!   scoring of fresh samples against that baseline.
//! - [`session`] — real-time trust score of one live session, decaying and
//!   escalating with connection metadata and suspicious activity.
//! - [`policy`] — the authoritative gate: ordered, deny-by-default policy
//!   evaluation combined with derived trust levels and risk scores.
//!
//! [`engine::AdaptiveTrustEngine`] wires the three together into a closed
//! loop: decisions and behavioral verdicts feed back into future evaluations.

pub mod behavior;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod policy;
pub mod session;
pub mod storage;

pub use config::EngineConfig;
pub use engine::AdaptiveTrustEngine;
pub use error::{Error, Result};
