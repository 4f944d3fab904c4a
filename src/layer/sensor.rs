//! Input device that replays a fixed list of values
//!
//! Values are pushed from a tokio blocking task, optionally paced, until the
//! list runs out or the device is halted.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DeviceSink, EncoderRef, InputDevice, LayerError};
use crate::stream::lock;

#[derive(Debug)]
pub struct IterSensor {
    name: String,
    values: Vec<Value>,
    interval: Option<Duration>,
    encoder: Option<EncoderRef>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<usize>>>,
}

impl IterSensor {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
            interval: None,
            encoder: None,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Pause between consecutive values
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderRef) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn is_started(&self) -> bool {
        lock(&self.task).is_some()
    }

    /// Wait for the replay task to finish. Returns how many values were
    /// pushed, or `None` if the device was never started or already awaited.
    pub async fn finished(&self) -> Option<usize> {
        let task = lock(&self.task).take()?;
        task.await.ok()
    }
}

impl InputDevice for IterSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn encoder(&self) -> Option<EncoderRef> {
        self.encoder.clone()
    }

    fn start(&self, sink: DeviceSink) -> Result<(), LayerError> {
        let device_error = |message: String| LayerError::Device {
            device: self.name.clone(),
            message,
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| device_error(format!("no tokio runtime available: {}", e)))?;

        let mut task = lock(&self.task);
        if task.is_some() {
            return Err(device_error("already started".to_string()));
        }
        if self.cancel.is_cancelled() {
            return Err(device_error("halted".to_string()));
        }

        info!(
            "Starting sensor '{}' with {} values",
            self.name,
            self.values.len()
        );

        let values = self.values.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        let name = self.name.clone();

        *task = Some(runtime.spawn_blocking(move || {
            let mut pushed = 0;
            for value in values {
                if cancel.is_cancelled() {
                    break;
                }
                sink(value);
                pushed += 1;
                if let Some(interval) = interval {
                    std::thread::sleep(interval);
                }
            }
            debug!("Sensor '{}' pushed {} values", name, pushed);
            pushed
        }));

        Ok(())
    }

    fn halt(&self) {
        debug!("Halting sensor '{}'", self.name);
        self.cancel.cancel();
    }
}
