// =============================================================================
// OKX integration — public REST client and instrument resolution
// =============================================================================

pub mod client;
pub mod instruments;

pub use client::OkxClient;
