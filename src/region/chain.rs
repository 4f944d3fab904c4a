//! Relays between connected layers
//!
//! A relay subscribes to a source layer's inferences, hands each one to the
//! sink's `receive_inference` and then computes it on the sink. Failures on a
//! live relay never reach the caller that emitted the payload; they go to the
//! region's [`RelayErrorSink`] and the [`RelayPolicy`] decides whether the
//! relay survives them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::layer::{Inference, LayerError, LayerInput, LayerRef};
use crate::stream::{lock, Observable, Observer, StreamError, Subscription};

/// What a relay does after reporting a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayPolicy {
    /// Keep relaying subsequent payloads
    #[default]
    Continue,
    /// Cancel the relay
    Disconnect,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayFailure {
    #[error("compute failed: {0}")]
    Compute(#[from] LayerError),

    #[error("{0}")]
    Upstream(#[from] StreamError),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Relay {upstream} -> {downstream} failed: {failure}")]
pub struct RelayError {
    pub upstream: String,
    pub downstream: String,
    pub failure: RelayFailure,
}

/// Destination for failures caught on live relays
pub trait RelayErrorSink: Send + Sync {
    fn report(&self, error: &RelayError);
}

impl<F> RelayErrorSink for F
where
    F: Fn(&RelayError) + Send + Sync,
{
    fn report(&self, error: &RelayError) {
        self(error)
    }
}

/// Default sink: log and move on
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorSink;

impl RelayErrorSink for LoggingErrorSink {
    fn report(&self, relay_error: &RelayError) {
        error!("{}", relay_error);
    }
}

#[derive(Clone)]
pub struct RelayConfig {
    pub policy: RelayPolicy,
    pub error_sink: Arc<dyn RelayErrorSink>,
}

impl RelayConfig {
    pub fn with_policy(mut self, policy: RelayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_error_sink(mut self, sink: impl RelayErrorSink + 'static) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            policy: RelayPolicy::default(),
            error_sink: Arc::new(LoggingErrorSink),
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Wire `source`'s inferences into `sink`.
///
/// The source's encoder, if any, is handed to the sink once, here.
pub(crate) fn build_relay(sink: &LayerRef, source: &LayerRef, config: &RelayConfig) -> Subscription {
    let receiver = Arc::clone(sink);
    let derived = source
        .observe()
        .inspect(move |inference| receiver.receive_inference(inference));

    if let Some(encoder) = source.encoder() {
        sink.receive_encoder(encoder);
    }

    subscribe_relay(
        &derived,
        RelayObserver {
            target: Arc::clone(sink),
            input_slot: None,
            upstream: source.name(),
            downstream: sink.name(),
            config: config.clone(),
            subscription: OnceLock::new(),
            disconnected: AtomicBool::new(false),
        },
    )
}

/// Wire another region's public stream into `tail`, recording each relayed
/// inference in `input_slot` before it is computed.
pub(crate) fn build_region_relay(
    upstream: &Observable<Inference>,
    upstream_name: &str,
    tail: &LayerRef,
    input_slot: Arc<Mutex<Option<LayerInput>>>,
    config: &RelayConfig,
) -> Subscription {
    subscribe_relay(
        upstream,
        RelayObserver {
            target: Arc::clone(tail),
            input_slot: Some(input_slot),
            upstream: upstream_name.to_string(),
            downstream: tail.name(),
            config: config.clone(),
            subscription: OnceLock::new(),
            disconnected: AtomicBool::new(false),
        },
    )
}

fn subscribe_relay(observable: &Observable<Inference>, observer: RelayObserver) -> Subscription {
    let observer = Arc::new(observer);
    let subscription = observable.subscribe_shared(observer.clone());
    // Only ever set here, right after subscribing
    let _ = observer.subscription.set(subscription.clone());
    // A failure delivered during subscribe had no handle to cancel yet
    if observer.disconnected.load(Ordering::SeqCst) {
        subscription.unsubscribe();
    }
    subscription
}

struct RelayObserver {
    target: LayerRef,
    input_slot: Option<Arc<Mutex<Option<LayerInput>>>>,
    upstream: String,
    downstream: String,
    config: RelayConfig,
    subscription: OnceLock<Subscription>,
    /// Set once a failure disconnected this relay
    disconnected: AtomicBool,
}

impl RelayObserver {
    fn fail(&self, failure: RelayFailure) {
        self.config.error_sink.report(&RelayError {
            upstream: self.upstream.clone(),
            downstream: self.downstream.clone(),
            failure,
        });

        if self.config.policy == RelayPolicy::Disconnect {
            debug!(
                "Disconnecting relay {} -> {} after failure",
                self.upstream, self.downstream
            );
            self.disconnected.store(true, Ordering::SeqCst);
            if let Some(subscription) = self.subscription.get() {
                subscription.unsubscribe();
            }
        }
    }
}

impl Observer<Inference> for RelayObserver {
    fn on_next(&self, inference: &Inference) {
        if self.disconnected.load(Ordering::SeqCst) {
            return;
        }
        let input = LayerInput::Inference(inference.clone());
        if let Some(slot) = &self.input_slot {
            *lock(slot) = Some(input.clone());
        }
        if let Err(e) = self.target.compute(input) {
            self.fail(e.into());
        }
    }

    fn on_error(&self, error: &StreamError) {
        self.fail(error.clone().into());
    }

    fn on_completed(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{BasicLayer, Encoder, Layer, Transform};
    use serde_json::{json, Value};

    #[derive(Debug)]
    struct Identity;

    impl Encoder for Identity {
        fn name(&self) -> &str {
            "identity"
        }

        fn encode(&self, input: &Value) -> Result<Value, LayerError> {
            Ok(input.clone())
        }
    }

    fn recording_sink() -> (Arc<Mutex<Vec<RelayError>>>, impl RelayErrorSink + 'static) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        (errors, move |e: &RelayError| sink.lock().unwrap().push(e.clone()))
    }

    #[test]
    fn test_relay_passes_inference_then_computes() {
        let source = BasicLayer::new("l1");
        // The sink checks that the predecessor payload arrived before compute
        let sink = BasicLayer::builder("l2")
            .transform(Transform::new("check-order", |ctx| match ctx.input {
                crate::layer::LayerInput::Inference(relayed) if ctx.previous == Some(relayed) => {
                    Ok(ctx.value.clone())
                }
                _ => Err(LayerError::Transform {
                    layer: ctx.layer.to_string(),
                    message: "payload computed before it was received".to_string(),
                }),
            }))
            .build();
        let (errors, error_sink) = recording_sink();
        let config = RelayConfig::default().with_error_sink(error_sink);

        let source_ref: LayerRef = source.clone();
        let sink_ref: LayerRef = sink.clone();
        let subscription = build_relay(&sink_ref, &source_ref, &config);

        source.compute(json!(5).into()).unwrap();

        assert!(subscription.is_active());
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(sink.emitted(), 1);
        assert_eq!(sink.last_received().map(|i| i.value), Some(json!(5)));
    }

    #[test]
    fn test_encoder_transferred_once_at_build() {
        let source = BasicLayer::builder("l1").encoder(Arc::new(Identity)).build();
        let sink = BasicLayer::new("l2");

        let source_ref: LayerRef = source.clone();
        let sink_ref: LayerRef = sink.clone();
        build_relay(&sink_ref, &source_ref, &RelayConfig::default());

        assert_eq!(
            sink.encoder().map(|e| e.name().to_string()),
            Some("identity".to_string())
        );
    }

    #[test]
    fn test_continue_policy_keeps_relay_alive() {
        let source = BasicLayer::new("l1");
        let sink = BasicLayer::builder("l2")
            .transform(Transform::scale(2.0))
            .build();
        let (errors, error_sink) = recording_sink();
        let config = RelayConfig::default().with_error_sink(error_sink);

        let source_ref: LayerRef = source.clone();
        let sink_ref: LayerRef = sink.clone();
        let subscription = build_relay(&sink_ref, &source_ref, &config);

        // Caller of compute on the source is not affected by the sink failing
        source.compute(json!("not a number").into()).unwrap();
        source.compute(json!(3).into()).unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].upstream, "l1");
        assert_eq!(errors[0].downstream, "l2");
        assert!(matches!(errors[0].failure, RelayFailure::Compute(_)));
        assert!(subscription.is_active());
        assert_eq!(sink.emitted(), 1);
    }

    #[test]
    fn test_disconnect_policy_cancels_relay() {
        let source = BasicLayer::new("l1");
        let sink = BasicLayer::builder("l2")
            .transform(Transform::scale(2.0))
            .build();
        let (errors, error_sink) = recording_sink();
        let config = RelayConfig::default()
            .with_policy(RelayPolicy::Disconnect)
            .with_error_sink(error_sink);

        let source_ref: LayerRef = source.clone();
        let sink_ref: LayerRef = sink.clone();
        let subscription = build_relay(&sink_ref, &source_ref, &config);

        source.compute(json!("not a number").into()).unwrap();
        source.compute(json!(3).into()).unwrap();

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(!subscription.is_active());
        assert_eq!(sink.emitted(), 0);
    }

    #[test]
    fn test_relay_policy_deserializes_kebab_case() {
        let policy: RelayPolicy = serde_json::from_str("\"disconnect\"").unwrap();
        assert_eq!(policy, RelayPolicy::Disconnect);
        assert_eq!(RelayPolicy::default(), RelayPolicy::Continue);
    }

    fn inference(layer: &str, value: Value) -> Inference {
        Inference {
            layer: layer.to_string(),
            sequence: 0,
            input: value.clone(),
            value,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_disconnect_during_subscribe_cancels_relay() {
        // Replays both items while the relay is still subscribing
        let upstream = Observable::from_items(vec![
            inference("r1:l1", json!("not a number")),
            inference("r1:l1", json!(3)),
        ]);
        let tail = BasicLayer::builder("r2:l1")
            .transform(Transform::scale(2.0))
            .build();
        let input_slot = Arc::new(Mutex::new(None));
        let (errors, error_sink) = recording_sink();
        let config = RelayConfig::default()
            .with_policy(RelayPolicy::Disconnect)
            .with_error_sink(error_sink);

        let tail_ref: LayerRef = tail.clone();
        let subscription =
            build_region_relay(&upstream, "r1", &tail_ref, input_slot.clone(), &config);

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(tail.emitted(), 0);
        assert!(!subscription.is_active());
        assert_eq!(
            lock(&input_slot).as_ref().map(|i| i.value().clone()),
            Some(json!("not a number"))
        );
    }

    #[test]
    fn test_continue_during_subscribe_keeps_relaying() {
        let upstream = Observable::from_items(vec![
            inference("r1:l1", json!("not a number")),
            inference("r1:l1", json!(3)),
        ]);
        let tail = BasicLayer::builder("r2:l1")
            .transform(Transform::scale(2.0))
            .build();
        let (errors, error_sink) = recording_sink();
        let config = RelayConfig::default().with_error_sink(error_sink);

        let tail_ref: LayerRef = tail.clone();
        build_region_relay(&upstream, "r1", &tail_ref, Arc::new(Mutex::new(None)), &config);

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(tail.emitted(), 1);
    }
}
