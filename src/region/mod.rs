//! Regions: named groups of layers wired into a single chain
//!
//! A region starts out open. Layers are added and connected pairwise, then
//! [`Region::close`] resolves the chain's tail (entry) and head (exit) and
//! freezes the structure for good. Input enters at the tail, either through
//! [`Region::compute`] or the tail's input device after [`Region::start`];
//! the head's inferences are the region's public stream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use regionnet::layer::BasicLayer;
//! use regionnet::region::Region;
//! use regionnet::registry::DeviceRegistry;
//!
//! # fn main() -> Result<(), regionnet::region::RegionError> {
//! let mut region = Region::new("r1", Arc::new(DeviceRegistry::new()));
//! region
//!     .add(BasicLayer::new("l1"))?
//!     .add(BasicLayer::new("l2"))?
//!     .connect("l2", "l1")?
//!     .close()?;
//! region.compute(serde_json::json!(42))?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod topology;

pub use chain::{
    LoggingErrorSink, RelayConfig, RelayError, RelayErrorSink, RelayFailure, RelayPolicy,
};
pub use topology::{resolve_endpoints, Endpoints, TopologyError};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layer::{qualified_name, Inference, LayerError, LayerInput, LayerRef};
use crate::registry::RegistrationPort;
use crate::stream::{lock, Observable, Subscription};

/// Which end of a connection a layer name was given for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    Sink,
    Source,
}

impl fmt::Display for LinkEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEnd::Sink => f.write_str("to"),
            LinkEnd::Source => f.write_str("from"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("Cannot {operation} when Region '{region}' has already been closed")]
    Closed {
        region: String,
        operation: &'static str,
    },

    #[error("A Layer with the name '{layer}' has already been added to Region '{region}'")]
    DuplicateName { region: String, layer: String },

    #[error("Could not lookup ({end}) Layer with name: {name}")]
    LayerNotFound { name: String, end: LinkEnd },

    #[error("Layer '{0}' cannot be connected to itself")]
    SelfConnection(String),

    #[error("Detected misconfigured Region '{region}': {source}")]
    Topology {
        region: String,
        #[source]
        source: TopologyError,
    },

    #[error("Region '{region}' must be closed before it can {operation}")]
    NotClosed {
        region: String,
        operation: &'static str,
    },

    #[error(transparent)]
    Layer(#[from] LayerError),
}

pub struct Region {
    name: String,
    registry: Arc<dyn RegistrationPort>,
    layers: HashMap<String, LayerRef>,
    /// Layers that feed another layer; only consulted until close
    sources: HashSet<String>,
    /// Layers fed by another layer; only consulted until close
    sinks: HashSet<String>,
    /// Live relays keyed by (sink, source)
    relays: HashMap<(String, String), Subscription>,
    /// Relays from other regions keyed by upstream region name
    upstreams: HashMap<String, Subscription>,
    tail: Option<LayerRef>,
    head: Option<LayerRef>,
    region_observable: Option<Observable<Inference>>,
    input: Arc<Mutex<Option<LayerInput>>>,
    relay_config: RelayConfig,
    assembly_closed: bool,
}

impl Region {
    pub fn new(name: impl Into<String>, registry: Arc<dyn RegistrationPort>) -> Self {
        Self {
            name: name.into(),
            registry,
            layers: HashMap::new(),
            sources: HashSet::new(),
            sinks: HashSet::new(),
            relays: HashMap::new(),
            upstreams: HashMap::new(),
            tail: None,
            head: None,
            region_observable: None,
            input: Arc::new(Mutex::new(None)),
            relay_config: RelayConfig::default(),
            assembly_closed: false,
        }
    }

    /// Replace the failure policy and error sink used by relays built from
    /// now on
    pub fn with_relay_config(mut self, config: RelayConfig) -> Self {
        self.relay_config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relay_config(&self) -> &RelayConfig {
        &self.relay_config
    }

    /// Whether [`Region::close`] has completed
    pub fn is_closed(&self) -> bool {
        self.assembly_closed
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Local names of all layers, sorted
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Entry layer, once closed
    pub fn tail(&self) -> Option<&LayerRef> {
        self.tail.as_ref()
    }

    /// Exit layer, once closed
    pub fn head(&self) -> Option<&LayerRef> {
        self.head.as_ref()
    }

    /// Add a layer under its current name.
    ///
    /// The layer is renamed `region:layer` and, if it owns an input device,
    /// the device and its encoder are registered for discovery.
    pub fn add(&mut self, layer: LayerRef) -> Result<&mut Self, RegionError> {
        self.ensure_open("add layers")?;

        let local_name = layer.name();
        if self.layers.contains_key(&local_name) {
            return Err(RegionError::DuplicateName {
                region: self.name.clone(),
                layer: local_name,
            });
        }

        if let Some(device) = layer.input_device() {
            if let Some(encoder) = device.encoder() {
                self.registry.register_encoder(encoder);
            }
            self.registry.register_input_device(device);
        }

        layer.set_name(&qualified_name(&self.name, &local_name));
        layer.set_region(&self.name);
        debug!("Region [{}] added layer '{}'", self.name, local_name);
        self.layers.insert(local_name, layer);

        Ok(self)
    }

    /// Connect two layers so that `source`'s inferences feed `sink`.
    ///
    /// Declaring the same pair again replaces the earlier relay.
    pub fn connect(&mut self, sink: &str, source: &str) -> Result<&mut Self, RegionError> {
        self.ensure_open("connect layers")?;

        let to = self.lookup(sink).ok_or_else(|| RegionError::LayerNotFound {
            name: sink.to_string(),
            end: LinkEnd::Sink,
        })?;
        let from = self.lookup(source).ok_or_else(|| RegionError::LayerNotFound {
            name: source.to_string(),
            end: LinkEnd::Source,
        })?;
        if sink == source {
            return Err(RegionError::SelfConnection(sink.to_string()));
        }

        from.set_next(&to);
        to.set_previous(&from);

        let key = (sink.to_string(), source.to_string());
        if let Some(previous) = self.relays.remove(&key) {
            debug!(
                "Region [{}] replacing relay {} -> {}",
                self.name, source, sink
            );
            previous.unsubscribe();
        }

        let subscription = chain::build_relay(&to, &from, &self.relay_config);
        self.sources.insert(source.to_string());
        self.sinks.insert(sink.to_string());
        self.relays.insert(key, subscription);
        debug!("Region [{}] connected {} -> {}", self.name, source, sink);

        Ok(self)
    }

    /// Find a layer by its local name
    pub fn lookup(&self, layer_name: &str) -> Option<LayerRef> {
        self.layers.get(layer_name).cloned()
    }

    /// Resolve the chain and freeze the region. Idempotent.
    ///
    /// On a topology error the region stays open and unchanged.
    pub fn close(&mut self) -> Result<&mut Self, RegionError> {
        if self.assembly_closed {
            return Ok(self);
        }

        let names: Vec<String> = self.layers.keys().cloned().collect();
        let endpoints =
            topology::resolve_endpoints(&names, &self.sources, &self.sinks).map_err(|source| {
                RegionError::Topology {
                    region: self.name.clone(),
                    source,
                }
            })?;

        let tail = self.resolved(&endpoints.tail)?;
        let head = self.resolved(&endpoints.head)?;

        self.region_observable = Some(head.observe());
        self.tail = Some(Arc::clone(&tail));
        self.head = Some(head);
        self.assembly_closed = true;
        self.sources.clear();
        self.sinks.clear();

        // Walk tail to head; bounded in case links were rewired into a loop
        let mut current = Some(tail);
        for _ in 0..self.layers.len() {
            let Some(layer) = current else { break };
            layer.close();
            current = layer.next();
        }

        debug!(
            "Region [{}] closed: tail={}, head={}",
            self.name, endpoints.tail, endpoints.head
        );
        Ok(self)
    }

    /// Feed input directly to the tail layer, bypassing any input device.
    ///
    /// The input is recorded even when the region is still open, in which
    /// case there is no tail to feed and `NotClosed` is returned.
    pub fn compute(&self, input: impl Into<LayerInput>) -> Result<(), RegionError> {
        let input = input.into();
        *lock(&self.input) = Some(input.clone());

        let tail = self.tail.as_ref().ok_or_else(|| RegionError::NotClosed {
            region: self.name.clone(),
            operation: "compute",
        })?;
        tail.compute(input)?;
        Ok(())
    }

    /// Most recent input passed to [`Region::compute`] or relayed from an
    /// upstream region
    pub fn input(&self) -> Option<LayerInput> {
        lock(&self.input).clone()
    }

    /// Start the tail layer's input device, if it has one
    pub fn start(&self) -> Result<(), RegionError> {
        let tail = self.tail.as_ref().ok_or_else(|| RegionError::NotClosed {
            region: self.name.clone(),
            operation: "start",
        })?;

        if tail.has_input_device() {
            info!("Starting Region [{}] input Layer", self.name);
            tail.start()?;
        } else {
            warn!(
                "Start called on Region [{}] with no effect due to no input device present",
                self.name
            );
        }
        Ok(())
    }

    /// Halt the tail layer; halting propagates along the chain
    pub fn stop(&self) {
        debug!("Stop called on Region [{}]", self.name);
        if let Some(tail) = &self.tail {
            tail.halt();
        }
        debug!("Region [{}] stopped", self.name);
    }

    /// The head layer's inference stream, once closed
    pub fn observe(&self) -> Option<Observable<Inference>> {
        self.region_observable.clone()
    }

    /// Feed `upstream`'s public stream into this region's tail.
    ///
    /// Both regions must be closed. Connecting the same upstream region again
    /// replaces the earlier relay.
    pub fn connect_region(&mut self, upstream: &Region) -> Result<&mut Self, RegionError> {
        let observable = upstream.observe().ok_or_else(|| RegionError::NotClosed {
            region: upstream.name.clone(),
            operation: "feed another region",
        })?;
        let tail = self.tail.clone().ok_or_else(|| RegionError::NotClosed {
            region: self.name.clone(),
            operation: "receive from another region",
        })?;

        if let Some(previous) = self.upstreams.remove(&upstream.name) {
            previous.unsubscribe();
        }

        let subscription = chain::build_region_relay(
            &observable,
            &upstream.name,
            &tail,
            Arc::clone(&self.input),
            &self.relay_config,
        );
        self.upstreams.insert(upstream.name.clone(), subscription);
        debug!(
            "Region [{}] now receives from Region [{}]",
            self.name, upstream.name
        );

        Ok(self)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), RegionError> {
        if self.assembly_closed {
            return Err(RegionError::Closed {
                region: self.name.clone(),
                operation,
            });
        }
        Ok(())
    }

    fn resolved(&self, layer_name: &str) -> Result<LayerRef, RegionError> {
        self.lookup(layer_name)
            .ok_or_else(|| RegionError::LayerNotFound {
                name: layer_name.to_string(),
                end: LinkEnd::Sink,
            })
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("layers", &self.layer_names())
            .field("tail", &self.tail.as_ref().map(|l| l.name()))
            .field("head", &self.head.as_ref().map(|l| l.name()))
            .field("closed", &self.assembly_closed)
            .finish()
    }
}
