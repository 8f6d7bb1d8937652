pub mod bar_feed;

// Re-export the loaders for convenient access (e.g. `use crate::market_data::load_bars_csv`).
pub use bar_feed::{fetch_bars, load_bars_csv};
