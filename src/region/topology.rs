//! Endpoint resolution for a region's layer chain
//!
//! The tail is the one layer that feeds another layer but is never fed; the
//! head is the one layer that is fed but never feeds another. Both are found
//! by a single set difference over the recorded sources and sinks.

use std::collections::HashSet;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("region contains no layers")]
    Empty,

    #[error("expected exactly one tail layer, found {}: [{}]", .candidates.len(), .candidates.join(", "))]
    AmbiguousTail { candidates: Vec<String> },

    #[error("expected exactly one head layer, found {}: [{}]", .candidates.len(), .candidates.join(", "))]
    AmbiguousHead { candidates: Vec<String> },

    #[error("layers not connected to any other layer: [{}]", .layers.join(", "))]
    Disconnected { layers: Vec<String> },
}

/// Resolved entry and exit of a chain, by local layer name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub tail: String,
    pub head: String,
}

/// Resolve the tail and head of a chain.
/// Pure function - no I/O.
pub fn resolve_endpoints(
    layers: &[String],
    sources: &HashSet<String>,
    sinks: &HashSet<String>,
) -> Result<Endpoints, TopologyError> {
    match layers {
        [] => Err(TopologyError::Empty),
        [only] => Ok(Endpoints {
            tail: only.clone(),
            head: only.clone(),
        }),
        _ => {
            let mut disconnected: Vec<String> = layers
                .iter()
                .filter(|name| !sources.contains(*name) && !sinks.contains(*name))
                .cloned()
                .collect();
            if !disconnected.is_empty() {
                disconnected.sort();
                return Err(TopologyError::Disconnected {
                    layers: disconnected,
                });
            }

            let tail = single(sources.difference(sinks))
                .map_err(|candidates| TopologyError::AmbiguousTail { candidates })?;
            let head = single(sinks.difference(sources))
                .map_err(|candidates| TopologyError::AmbiguousHead { candidates })?;

            Ok(Endpoints { tail, head })
        }
    }
}

fn single<'a>(candidates: impl Iterator<Item = &'a String>) -> Result<String, Vec<String>> {
    let mut candidates: Vec<String> = candidates.cloned().collect();
    if candidates.len() == 1 {
        Ok(candidates.remove(0))
    } else {
        candidates.sort();
        Err(candidates)
    }
}
