//! Registration ports for globally discoverable input devices and encoders
//!
//! A region registers the input device (and its encoder) of every layer it
//! is given through a [`RegistrationPort`] handed to it at construction.
//! [`DeviceRegistry`] is the stock implementation: one slot per kind,
//! last write wins.

use std::fmt;
use std::sync::RwLock;

use tracing::debug;

use crate::layer::{EncoderRef, InputDeviceRef};

pub trait RegistrationPort: Send + Sync {
    fn register_input_device(&self, device: InputDeviceRef);

    fn register_encoder(&self, encoder: EncoderRef);
}

#[derive(Default)]
pub struct DeviceRegistry {
    input_device: RwLock<Option<InputDeviceRef>>,
    encoder: RwLock<Option<EncoderRef>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently registered input device
    pub fn input_device(&self) -> Option<InputDeviceRef> {
        self.input_device
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Most recently registered encoder
    pub fn encoder(&self) -> Option<EncoderRef> {
        self.encoder
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl RegistrationPort for DeviceRegistry {
    fn register_input_device(&self, device: InputDeviceRef) {
        debug!("Registering input device '{}'", device.name());
        *self
            .input_device
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(device);
    }

    fn register_encoder(&self, encoder: EncoderRef) {
        debug!("Registering encoder '{}'", encoder.name());
        *self
            .encoder
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(encoder);
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("input_device", &self.input_device().map(|d| d.name().to_string()))
            .field("encoder", &self.encoder().map(|e| e.name().to_string()))
            .finish()
    }
}
