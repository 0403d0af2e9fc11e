// ABOUTME: Library crate for marketsharp-sync
// ABOUTME: Pulls MarketSharp OData feeds and reconciles them into PostgreSQL

pub mod config;
pub mod feed;
pub mod mapping;
pub mod registry;
pub mod remote;
pub mod store;
pub mod sync;
pub mod utils;
