//! Contest catalog, room records and the room lifecycle

pub mod catalog;
pub mod lifecycle;
pub mod registry;

pub use catalog::ContestCatalog;
pub use lifecycle::RoomState;
pub use registry::{RoomCreation, RoomRecord, RoomRegistry, RoomUpdate};
