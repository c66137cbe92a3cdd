// ABOUTME: API module - boundary to the quota-limited racing data service.
// ABOUTME: Defines the data types, the client trait, and the HTTP implementation.

mod client;
mod http;
mod types;

pub use client::*;
pub use http::*;
pub use types::*;

#[cfg(test)]
mod http_test;
