pub mod client;

pub use client::{HttpPriceSource, PriceSourceConfig};
