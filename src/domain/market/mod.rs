pub mod timeframe;
pub mod types;

pub use timeframe::Timeframe;
pub use types::{IndicatorPoint, PricePoint};
