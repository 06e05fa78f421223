//! Redis state backend for tollgate.
//!
//! This crate provides a Redis-backed implementation of the [`StateStore`]
//! trait from `tollgate-state`.
//!
//! # Features
//!
//! - **State storage**: Key-value operations with optional TTL using Redis strings.
//! - **Batches**: [`WriteBatch`]es run as a single `MULTI`/`EXEC` transaction.
//! - **Connection pooling**: Uses `deadpool-redis` for efficient connection management.
//!
//! # Example
//!
//! ```ignore
//! use tollgate_state_redis::{RedisConfig, RedisStateStore};
//!
//! let config = RedisConfig::new("redis://localhost:6379");
//! let store = RedisStateStore::new(&config)?;
//! ```
//!
//! [`StateStore`]: tollgate_state::StateStore
//! [`WriteBatch`]: tollgate_state::WriteBatch

mod config;
mod key_render;
mod scripts;
mod store;

pub use config::RedisConfig;
pub use store::RedisStateStore;
