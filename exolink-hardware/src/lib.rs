//! EtherCAT actuation layer for a powered lower-limb exoskeleton
//!
//! This crate drives the exoskeleton's motor-controller slaves over an
//! EtherCAT fieldbus. It keeps a deterministic cyclic link to the drives,
//! walks each of them through the mandatory CiA-402 enable protocol before
//! any motion is permitted, converts between physical quantities and
//! fixed-point protocol registers, and refuses commands that would exceed
//! the calibrated mechanical limits.
//!
//! The main pieces, leaf first:
//!
//! * [`Encoder`] converts raw integer units to radians and holds the
//!   hard/soft travel limits.
//! * [`PdoMap`](pdo_map::PdoMap) negotiates which logical registers occupy
//!   which byte offsets in the cyclic frames, once, pre-operational.
//! * [`MotorController`](motor_controller::MotorController) is the
//!   capability interface of one drive; [`IMotionCube`](motor_controller::IMotionCube)
//!   and [`Ingenia`](motor_controller::Ingenia) are the two families.
//! * [`Joint`] gates actuation and blends the two encoder signals into a
//!   continuous position/velocity estimate.
//! * [`EthercatMaster`](master::EthercatMaster) owns the link and runs the
//!   fixed-period cyclic thread once all slaves are Operational.
//! * [`Robot`] is the single entry point: start/stop communication, fetch
//!   and command individual joints.
//!
//! The physical link sits behind the
//! [`EthercatLink`](exolink_common::traits::EthercatLink) trait, so the
//! whole stack can also run against a simulated link in tests.
#![warn(missing_docs)]

pub mod encoder;
pub mod error;
pub mod joint;
pub mod master;
pub mod motor_controller;
pub mod pdo_map;
pub mod robot;
pub mod temperature;

// Re-export the shared protocol types
pub use exolink_common as common;

pub use encoder::{Encoder, EncoderError};
pub use error::HardwareError;
pub use joint::Joint;
pub use master::{CycleSignal, EthercatMaster};
pub use motor_controller::{IMotionCube, Ingenia, MotorController, MotorControllerStates};
pub use pdo_map::{PdoMap, PdoMappingError};
pub use robot::Robot;
pub use temperature::TemperatureGes;
