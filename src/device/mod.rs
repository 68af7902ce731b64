//! Device identification, geometry and safety checks

mod mount;
mod probe;

pub(crate) use probe::{DeviceDescriptor, default_thermal, identify};
