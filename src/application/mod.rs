// Alert evaluation engine and its cross-cycle state
pub mod engine;

// Periodic driver for evaluation and cleanup
pub mod monitor;

// Priority queue, channel fan-out, retries, dead-letter
pub mod notifications;

// Subscription rooms and live client fan-out
pub mod broadcast;
