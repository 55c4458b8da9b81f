pub mod adapters;
pub mod configuration;
pub mod core;
pub mod extraction;
pub mod observability;
pub mod utils;

pub use reqwest::Client;
