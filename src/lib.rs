#[macro_use]
pub mod error;

pub mod api;
pub mod atlas;
pub mod cli;
pub mod federation;
pub mod gate;
pub mod heartbeat;
pub mod import;
pub mod model;
pub mod network;
pub mod notify;
pub mod queue;
pub mod settings;
pub mod store;

pub use atlas::Atlas;
pub use error::{AtlasError, Result};
