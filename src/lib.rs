//! neoom Connect Library
//!
//! Polls a neoom installation through two channels: the Ntuity cloud API for
//! site info and tariffs, and the local BEAAM gateway for live data point
//! states. Each channel is owned by a [`Coordinator`] that publishes immutable
//! snapshots, and [`entity`] turns those snapshots into sensors, numbers and
//! selects with W/Wh values scaled to a readable prefix.

pub mod aggregator;
pub mod cloud_api;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod local_api;
pub mod models;
pub mod scaling;
mod transport;

// Re-export commonly used types for easier access
pub use aggregator::{merge_states, LocalStateAggregator};
pub use cloud_api::CloudApi;
pub use config::{ConnectionConfig, Timeouts};
pub use connection::Connection;
pub use coordinator::{CloudCoordinator, Coordinator, DataSource, LocalCoordinator, UpdateStatus};
pub use entity::{Entity, EntityState};
pub use error::{Error, Result};
pub use local_api::LocalApi;
pub use models::{DataPointRecord, DataPointValue, SiteConfiguration, SiteSnapshot, StateMap};
pub use scaling::scale;
