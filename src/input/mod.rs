// Gamepad input
//
// - device: enumeration/open trait seam and the Linux evdev backend
// - gamepad: the vector source thread and its latest-wins receiver

pub mod device;
mod gamepad;

pub use device::{DeviceDescriptor, DeviceSelector, EvdevBackend, InputBackend, InputDevice, InputEvent};
pub use gamepad::{VectorReceiver, VectorSource};
