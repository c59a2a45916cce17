//! TenFold — onboarding state machine and per-state services.

pub mod config;
pub mod error;
pub mod onboarding;
pub mod services;
pub mod store;
