//! regionnet: assemble named layers into single-entry, single-exit regions
//!
//! Layers are added to a [`Region`] and connected pairwise. Closing the
//! region resolves its tail (where input enters) and head (whose inferences
//! are the region's output) from the connections alone, then freezes it.
//! Inferences travel tail to head over push-based relays.

pub mod cli;
pub mod config;
pub mod layer;
pub mod region;
pub mod registry;
pub mod stream;

pub use layer::{
    BasicLayer, Encoder, EncoderRef, Inference, InputDevice, InputDeviceRef, IterSensor, Layer,
    LayerError, LayerInput, LayerRef, Transform,
};
pub use region::{Region, RegionError, RelayConfig, RelayPolicy, TopologyError};
pub use registry::{DeviceRegistry, RegistrationPort};
pub use stream::{Observable, Observer, Publisher, StreamError, Subscription};
