// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the screening
// pipeline attaches to every candidate symbol. Every public function returns
// `Option<T>` so callers are forced to handle insufficient-data and
// numerical-edge-case scenarios.

pub mod adx;
pub mod candle;
pub mod composite;
pub mod rsi;
