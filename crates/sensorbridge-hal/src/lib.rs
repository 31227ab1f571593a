//! `sensorbridge-hal` – reads a robot's sensors through whatever device
//! drivers happen to be available.
//!
//! A configuration names, per sensor category, the instances the robot is
//! expected to have.  The bridge discovers a capability view for each of
//! them in a flat list of [`DeviceHandle`]s, binds it, and from then on
//! refreshes pre-sized measurement buffers on every
//! [`advance`](SensorBridge::advance).
//!
//! # Modules
//!
//! - [`capability`] – the capability views a driver may expose and the
//!   [`Driver`] resolver trait.
//! - [`config`] – [`ParametersHandler`] and the typed
//!   [`SensorBridgeConfig`].
//! - [`reconcile`] – routing six-axis force/torque sensors between the
//!   aggregate and the legacy analog transport.
//! - [`remap`] – [`JointRemapIndex`] from canonical joint order to control
//!   board order.
//! - [`buffers`] – the [`MeasurementStore`].
//! - [`bridge`] – the [`SensorBridge`] state machine and read surface.
//! - [`sim`] – simulated drivers for tests and headless runs.

mod attach;
pub mod bridge;
pub mod buffers;
pub mod capability;
pub mod config;
mod poll;
pub mod reconcile;
pub mod remap;
pub mod sim;

pub use attach::Transport;
pub use bridge::SensorBridge;
pub use buffers::{JointBuffers, MeasurementStore, Stamped};
pub use capability::{CapabilityKind, DeviceFault, DeviceHandle, Driver};
pub use config::{ParametersHandler, SensorBridgeConfig, TomlParameters};
pub use remap::JointRemapIndex;
