//! skyorder-http: `reqwest` transport for the SkyOrder client.
//!
//! # Usage
//! ```rust,no_run
//! use skyorder_core::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default().with_api_key("YOUR_API_KEY");
//! let client = skyorder_http::connect(&config)?;
//! let orders: serde_json::Value = client.get("/orders").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{connect, BuildError, HttpTransport};
