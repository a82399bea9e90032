// ── Transport backends ──
//
// Concrete implementations of the strategy traits in `crate::transport`.
// Each backend sits behind its own cargo feature.

#[cfg(feature = "btleplug")]
pub mod btleplug;

#[cfg(feature = "btleplug")]
pub use self::btleplug::BtleplugStack;
