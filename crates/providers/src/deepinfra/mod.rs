pub mod catalog;
pub mod client;
pub mod config;
pub mod decoder;
pub mod identity;

pub use client::{DeepinfraClient, DEFAULT_STREAM_MODEL, DEFAULT_SYNC_MODEL};
