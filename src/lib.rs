#![allow(async_fn_in_trait)]
pub mod client;
pub mod config;
pub mod download_plan;
pub mod error;
pub mod filter;
pub mod http;
pub mod item;
pub mod poller;

pub use client::Client;
pub use error::{Error, Result};
