//! Layer capability contract
//!
//! A [`Layer`] is one processing unit of a region's chain. The region only
//! ever talks to layers through this trait: it names them, links them to a
//! predecessor and successor, relays [`Inference`]s between them and drives
//! their lifecycle. What a layer computes is its own business.

pub mod basic;
pub mod sensor;

pub use basic::{BasicLayer, BasicLayerBuilder, Transform, TransformContext};
pub use sensor::IterSensor;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::stream::Observable;

/// Errors raised by a layer or one of its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Layer '{0}' has been halted")]
    Halted(String),

    #[error("Layer '{0}' has no input device")]
    NoInputDevice(String),

    #[error("Transform failed in layer '{layer}': {message}")]
    Transform { layer: String, message: String },

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Input device '{device}' failed: {message}")]
    Device { device: String, message: String },
}

/// Result of one compute pass of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    /// Qualified name of the layer that produced this inference
    pub layer: String,
    /// Per-layer emission counter, starting at 0
    pub sequence: u64,
    /// The value the layer computed on (after encoding)
    pub input: Value,
    /// The layer's output
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// What a layer is asked to compute on
#[derive(Debug, Clone, PartialEq)]
pub enum LayerInput {
    /// Data entering the chain from outside
    Raw(Value),
    /// An inference relayed from a predecessor
    Inference(Inference),
}

impl LayerInput {
    /// The data value carried by this input
    pub fn value(&self) -> &Value {
        match self {
            LayerInput::Raw(value) => value,
            LayerInput::Inference(inference) => &inference.value,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, LayerInput::Raw(_))
    }
}

impl From<Value> for LayerInput {
    fn from(value: Value) -> Self {
        LayerInput::Raw(value)
    }
}

impl From<Inference> for LayerInput {
    fn from(inference: Inference) -> Self {
        LayerInput::Inference(inference)
    }
}

/// Encoding object owned by a layer or its input device
pub trait Encoder: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn encode(&self, input: &Value) -> Result<Value, LayerError>;
}

pub type EncoderRef = Arc<dyn Encoder>;

/// Callback an input device pushes each raw value into
pub type DeviceSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Input-ingestion device ("sensor") owned by a layer
///
/// Any threading happens inside the device; `start` must return promptly.
pub trait InputDevice: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn encoder(&self) -> Option<EncoderRef> {
        None
    }

    fn start(&self, sink: DeviceSink) -> Result<(), LayerError>;

    fn halt(&self);
}

pub type InputDeviceRef = Arc<dyn InputDevice>;

pub type LayerRef = Arc<dyn Layer>;

/// Capability contract a region requires from each of its layers
pub trait Layer: Send + Sync {
    fn name(&self) -> String;

    /// Replace the layer's name with its region-qualified name
    fn set_name(&self, qualified_name: &str);

    fn input_device(&self) -> Option<InputDeviceRef>;

    fn has_input_device(&self) -> bool {
        self.input_device().is_some()
    }

    fn encoder(&self) -> Option<EncoderRef>;

    /// Record the name of the region this layer belongs to
    fn set_region(&self, region: &str);

    fn region(&self) -> Option<String>;

    fn set_next(&self, next: &LayerRef);

    fn set_previous(&self, previous: &LayerRef);

    fn next(&self) -> Option<LayerRef>;

    fn previous(&self) -> Option<LayerRef>;

    /// The stream of inferences this layer emits
    fn observe(&self) -> Observable<Inference>;

    fn compute(&self, input: LayerInput) -> Result<(), LayerError>;

    /// Called with each predecessor inference before it is computed
    fn receive_inference(&self, inference: &Inference);

    /// Called once when connected to a predecessor that owns an encoder
    fn receive_encoder(&self, encoder: EncoderRef);

    fn close(&self);

    fn start(&self) -> Result<(), LayerError>;

    fn halt(&self);
}

/// `region:layer`
pub fn qualified_name(region: &str, layer: &str) -> String {
    format!("{}:{}", region, layer)
}
