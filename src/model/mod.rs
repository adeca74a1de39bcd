//! Node records and the value types they are built from
pub mod address;
pub mod node;
pub mod pgp;
pub mod status;

pub use address::{Address, Netmask};
pub use node::{feature_collection, Node, LOCAL_SOURCE, LOCAL_SOURCE_ID};
pub use pgp::PgpId;
pub use status::Status;
