mod registry;

pub use registry::{RoomRegistry, RoomStats};
