//! Turn a [`RegionComposition`] into a live, still open, [`Region`]

use std::sync::Arc;
use std::time::Duration;

use crate::layer::{BasicLayer, IterSensor, LayerRef, Transform};
use crate::region::{Region, RegionError, RelayConfig};
use crate::registry::RegistrationPort;

use super::composition::{LayerSpec, RegionComposition, TransformSpec};

impl TransformSpec {
    pub fn to_transform(&self) -> Transform {
        match self {
            TransformSpec::Passthrough => Transform::passthrough(),
            TransformSpec::Scale { factor } => Transform::scale(*factor),
            TransformSpec::Offset { amount } => Transform::offset(*amount),
            TransformSpec::Tag { label } => Transform::tag(label.clone()),
        }
    }
}

pub fn build_layer(spec: &LayerSpec) -> LayerRef {
    let mut builder = BasicLayer::builder(&spec.name).transform(spec.transform.to_transform());

    if let Some(sensor) = &spec.sensor {
        let name = sensor.name.clone().unwrap_or_else(|| spec.name.clone());
        let mut device = IterSensor::new(name, sensor.values.clone());
        if let Some(ms) = sensor.interval_ms {
            device = device.with_interval(Duration::from_millis(ms));
        }
        builder = builder.input_device(Arc::new(device));
    }

    builder.build()
}

/// Add every layer and declare every connection. The region is returned
/// open so callers can still extend it before closing.
pub fn build_region(
    composition: &RegionComposition,
    registry: Arc<dyn RegistrationPort>,
) -> Result<Region, RegionError> {
    let relay_config = RelayConfig::default().with_policy(composition.relay.on_failure);
    let mut region = Region::new(composition.name.clone(), registry).with_relay_config(relay_config);

    for spec in &composition.layers {
        region.add(build_layer(spec))?;
    }
    for connection in &composition.connections {
        region.connect(&connection.to, &connection.from)?;
    }

    Ok(region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::composition::CompositionFormat;
    use crate::layer::Layer;
    use crate::region::RelayPolicy;
    use crate::registry::DeviceRegistry;

    fn composition(json: &str) -> RegionComposition {
        RegionComposition::parse(json, CompositionFormat::Json).unwrap()
    }

    #[test]
    fn test_build_region_from_composition() {
        let composition = composition(
            r#"{
                "name": "r1",
                "layers": [
                    {"name": "l1", "sensor": {"values": [1]}},
                    {"name": "l2", "transform": {"type": "scale", "factor": 3}}
                ],
                "connections": [{"to": "l2", "from": "l1"}],
                "relay": {"on-failure": "disconnect"}
            }"#,
        );
        let registry = Arc::new(DeviceRegistry::new());

        let mut region = build_region(&composition, registry.clone()).unwrap();

        assert!(!region.is_closed());
        assert_eq!(region.layer_names(), vec!["l1", "l2"]);
        assert_eq!(region.relay_config().policy, RelayPolicy::Disconnect);
        assert_eq!(
            registry.input_device().map(|d| d.name().to_string()),
            Some("l1".to_string())
        );

        region.close().unwrap();
        assert_eq!(region.tail().map(|l| l.name()), Some("r1:l1".to_string()));
        assert!(region.tail().map(|l| l.has_input_device()).unwrap_or(false));
    }

    #[test]
    fn test_build_layer_transform() {
        let spec = LayerSpec {
            name: "l1".to_string(),
            transform: TransformSpec::Tag {
                label: "x".to_string(),
            },
            sensor: None,
        };

        let layer = build_layer(&spec);

        assert_eq!(layer.name(), "l1");
        assert!(!layer.has_input_device());
    }
}
