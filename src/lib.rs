//! pollstream turns discrete query responses into a live, continuously
//! updating visualization feed: on a fixed cadence it pulls the latest query
//! result, merges it into a bounded in-memory frame, and emits the updated
//! frame to a subscriber.

pub mod config;
pub mod frame;
pub mod query;
pub mod scheduler;
pub mod stream;
pub mod template;
