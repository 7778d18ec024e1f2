//! Common functionality shared among the exolink crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is
//! re-exported by `exolink-hardware`.
#![warn(missing_docs, missing_copy_implementations)]

pub mod actuation;
pub mod al_state;
pub mod drive_state;
pub mod objects;
pub mod slave;
pub mod traits;

pub use actuation::ActuationMode;
pub use al_state::AlState;
pub use drive_state::{DriveState, TargetState};
pub use objects::{DataDirection, ObjectDescriptor, ObjectName};
pub use slave::SlaveIndex;
