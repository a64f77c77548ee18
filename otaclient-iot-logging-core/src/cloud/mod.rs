//! The thin, retrying client over the remote CloudWatch-Logs-shaped API.

pub mod client;

pub use client::CloudLogClient;
