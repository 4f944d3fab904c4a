//! Reference layer implementation
//!
//! [`BasicLayer`] applies a [`Transform`] to each input and emits the result
//! as a sequence-numbered [`Inference`]. Raw input is run through the layer's
//! encoder first when it has one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    EncoderRef, Inference, InputDeviceRef, Layer, LayerError, LayerInput, LayerRef,
};
use crate::stream::{lock, Observable, Publisher};

/// Everything a transform gets to see for one compute pass
#[derive(Debug)]
pub struct TransformContext<'a> {
    pub layer: &'a str,
    pub input: &'a LayerInput,
    /// The input value after encoding
    pub value: &'a Value,
    /// Last inference received from the predecessor, if any
    pub previous: Option<&'a Inference>,
}

type TransformFn = dyn Fn(&TransformContext<'_>) -> Result<Value, LayerError> + Send + Sync;

/// The per-layer computation
#[derive(Clone)]
pub struct Transform {
    label: String,
    f: Arc<TransformFn>,
}

impl Transform {
    pub fn new<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TransformContext<'_>) -> Result<Value, LayerError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            f: Arc::new(f),
        }
    }

    pub fn passthrough() -> Self {
        Self::new("passthrough", |ctx| Ok(ctx.value.clone()))
    }

    /// Multiply a number, or every number in an array, by `factor`
    pub fn scale(factor: f64) -> Self {
        Self::new(format!("scale({})", factor), move |ctx| {
            map_numbers(ctx.layer, ctx.value, |n| n * factor)
        })
    }

    /// Add `amount` to a number, or to every number in an array
    pub fn offset(amount: f64) -> Self {
        Self::new(format!("offset({})", amount), move |ctx| {
            map_numbers(ctx.layer, ctx.value, |n| n + amount)
        })
    }

    /// Wrap the value as `{"label": ..., "value": ...}`
    pub fn tag(label: impl Into<String>) -> Self {
        let label = label.into();
        Self::new(format!("tag({})", label), move |ctx| {
            let mut tagged = Map::new();
            tagged.insert("label".to_string(), Value::String(label.clone()));
            tagged.insert("value".to_string(), ctx.value.clone());
            Ok(Value::Object(tagged))
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn apply(&self, ctx: &TransformContext<'_>) -> Result<Value, LayerError> {
        (self.f)(ctx)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.label).finish()
    }
}

fn map_numbers(layer: &str, value: &Value, op: impl Fn(f64) -> f64) -> Result<Value, LayerError> {
    let not_numeric = || LayerError::Transform {
        layer: layer.to_string(),
        message: format!("expected a number or array of numbers, got {}", value),
    };
    let apply = |v: &Value| -> Result<Value, LayerError> {
        let n = v.as_f64().ok_or_else(not_numeric)?;
        serde_json::Number::from_f64(op(n))
            .map(Value::Number)
            .ok_or_else(not_numeric)
    };

    match value {
        Value::Array(items) => items
            .iter()
            .map(apply)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => apply(other),
    }
}

/// Builder for [`BasicLayer`]
pub struct BasicLayerBuilder {
    name: String,
    transform: Transform,
    device: Option<InputDeviceRef>,
    encoder: Option<EncoderRef>,
}

impl BasicLayerBuilder {
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn input_device(mut self, device: InputDeviceRef) -> Self {
        self.device = Some(device);
        self
    }

    pub fn encoder(mut self, encoder: EncoderRef) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn build(self) -> Arc<BasicLayer> {
        Arc::new_cyclic(|me| BasicLayer {
            me: me.clone(),
            name: RwLock::new(self.name),
            region: RwLock::new(None),
            transform: self.transform,
            device: self.device,
            encoder: RwLock::new(self.encoder),
            next: RwLock::new(None),
            previous: RwLock::new(None),
            last_received: Mutex::new(None),
            publisher: Publisher::new(),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        })
    }
}

pub struct BasicLayer {
    me: Weak<BasicLayer>,
    name: RwLock<String>,
    region: RwLock<Option<String>>,
    transform: Transform,
    device: Option<InputDeviceRef>,
    encoder: RwLock<Option<EncoderRef>>,
    next: RwLock<Option<Weak<dyn Layer>>>,
    previous: RwLock<Option<Weak<dyn Layer>>>,
    last_received: Mutex<Option<Inference>>,
    publisher: Publisher<Inference>,
    sequence: AtomicU64,
    closed: AtomicBool,
    halted: AtomicBool,
}

impl BasicLayer {
    /// A passthrough layer with no device or encoder
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> BasicLayerBuilder {
        BasicLayerBuilder {
            name: name.into(),
            transform: Transform::passthrough(),
            device: None,
            encoder: None,
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Last inference handed over by the predecessor
    pub fn last_received(&self) -> Option<Inference> {
        lock(&self.last_received).clone()
    }

    /// Number of inferences emitted so far
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

impl Layer for BasicLayer {
    fn name(&self) -> String {
        read(&self.name)
    }

    fn set_name(&self, qualified_name: &str) {
        write(&self.name, qualified_name.to_string());
    }

    fn input_device(&self) -> Option<InputDeviceRef> {
        self.device.clone()
    }

    fn encoder(&self) -> Option<EncoderRef> {
        read(&self.encoder).or_else(|| self.device.as_ref().and_then(|d| d.encoder()))
    }

    fn set_region(&self, region: &str) {
        write(&self.region, Some(region.to_string()));
    }

    fn region(&self) -> Option<String> {
        read(&self.region)
    }

    fn set_next(&self, next: &LayerRef) {
        write(&self.next, Some(Arc::downgrade(next)));
    }

    fn set_previous(&self, previous: &LayerRef) {
        write(&self.previous, Some(Arc::downgrade(previous)));
    }

    fn next(&self) -> Option<LayerRef> {
        read(&self.next).and_then(|weak| weak.upgrade())
    }

    fn previous(&self) -> Option<LayerRef> {
        read(&self.previous).and_then(|weak| weak.upgrade())
    }

    fn observe(&self) -> Observable<Inference> {
        self.publisher.observable()
    }

    fn compute(&self, input: LayerInput) -> Result<(), LayerError> {
        let name = self.name();
        if self.is_halted() {
            return Err(LayerError::Halted(name));
        }

        let value = match (&input, self.encoder()) {
            (LayerInput::Raw(raw), Some(encoder)) => encoder.encode(raw)?,
            _ => input.value().clone(),
        };

        let previous = self.last_received();
        let output = self.transform.apply(&TransformContext {
            layer: &name,
            input: &input,
            value: &value,
            previous: previous.as_ref(),
        })?;

        let inference = Inference {
            layer: name,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            input: value,
            value: output,
            timestamp: Utc::now(),
        };
        self.publisher.emit(inference);
        Ok(())
    }

    fn receive_inference(&self, inference: &Inference) {
        *lock(&self.last_received) = Some(inference.clone());
    }

    fn receive_encoder(&self, encoder: EncoderRef) {
        debug!("Layer '{}' received encoder '{}'", self.name(), encoder.name());
        write(&self.encoder, Some(encoder));
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Layer '{}' closed", self.name());
        }
    }

    fn start(&self) -> Result<(), LayerError> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| LayerError::NoInputDevice(self.name()))?;

        let me = self.me.clone();
        device.start(Arc::new(move |value| {
            if let Some(layer) = me.upgrade() {
                if let Err(e) = layer.compute(LayerInput::Raw(value)) {
                    warn!("Layer '{}' dropped device input: {}", layer.name(), e);
                }
            }
        }))
    }

    fn halt(&self) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Halting layer '{}'", self.name());

        if let Some(device) = &self.device {
            device.halt();
        }
        self.publisher.complete();

        if let Some(next) = self.next() {
            next.halt();
        }
    }
}

impl fmt::Debug for BasicLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicLayer")
            .field("name", &self.name())
            .field("transform", &self.transform)
            .field("device", &self.device)
            .field("closed", &self.is_closed())
            .field("halted", &self.is_halted())
            .finish()
    }
}
