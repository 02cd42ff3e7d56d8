//! Authenticated HTTP requests.

mod client;

pub use client::{ApiClient, INIT_DATA_HEADER};
