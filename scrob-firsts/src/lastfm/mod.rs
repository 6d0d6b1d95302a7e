//! Last.fm remote API boundary

pub mod client;
pub mod types;

pub use client::LastFmClient;
