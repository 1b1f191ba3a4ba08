pub mod context;
#[path = "device.rs"]
mod device_trait;
pub mod endianness;
pub mod error;
pub mod mmio;
pub mod ram;

pub use context::AccessMode;
pub use device_trait::{Device, check_access};
pub use endianness::Endianness;
pub use error::{DeviceError, DeviceResult};
pub use mmio::{MmioWindow, WindowRange};
pub use ram::RamMemory;
