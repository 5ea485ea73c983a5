//! REST endpoints of the voice agent server

mod client;

pub use client::ApiClient;
