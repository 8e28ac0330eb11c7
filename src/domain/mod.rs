// Alert predicates and delivery channels
pub mod alert;

// Market data domain (candles, indicators, timeframes)
pub mod market;

// Persisted notifications and queued delivery jobs
pub mod notification;

// Outbound WebSocket envelopes
pub mod events;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
