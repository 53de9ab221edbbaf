pub mod cell;
pub mod doctor;
pub mod link;

pub use cell::{CellSnapshot, LatestRecord};
pub use link::{spawn_reader, LinkError, TelemetryLink};
