//! MappingsEngine - reshapes payloads per destination

use std::collections::HashMap;
use tokio::sync::watch;

use contracts::{DataItem, DataObject, Dispatch, MappingOperation, PathReference, SdkSettings};

/// Applies the mapping list configured for a destination
#[derive(Clone)]
pub struct MappingsEngine {
    settings: watch::Receiver<SdkSettings>,
}

impl MappingsEngine {
    pub fn new(settings: watch::Receiver<SdkSettings>) -> Self {
        Self { settings }
    }

    /// Remap the dispatch for `destination_id`.
    ///
    /// Destinations without mappings get the dispatch unchanged.
    pub fn map(&self, destination_id: &str, dispatch: Dispatch) -> Dispatch {
        let mappings = self
            .settings
            .borrow()
            .destinations
            .get(destination_id)
            .and_then(|d| d.mappings.clone());
        match mappings {
            Some(mappings) => {
                let payload = map_payload(dispatch.payload(), &mappings);
                dispatch.with_payload(payload)
            }
            None => dispatch,
        }
    }
}

/// Build a new payload from `payload` by applying `mappings` in order.
///
/// Keys not mentioned by any mapping are dropped. Constant writes to one
/// destination path collect into a list until another mapping writes that
/// path, one of its ancestors or one of its descendants; any other
/// collision overwrites.
pub fn map_payload(payload: &DataObject, mappings: &[MappingOperation]) -> DataObject {
    let mut result = DataObject::new();
    // constants written to a path since its last other write at, above or below it
    let mut constants: HashMap<PathReference, Vec<DataItem>> = HashMap::new();

    for mapping in mappings {
        let Some(value) = mapped_value(payload, mapping) else {
            continue;
        };
        let path = &mapping.destination;
        constants.retain(|written, _| written == path || !overlaps(written, path));

        let value = if mapping.is_constant() {
            let written = constants.entry(path.clone()).or_default();
            written.push(value);
            if written.len() == 1 {
                written[0].clone()
            } else {
                DataItem::List(written.clone())
            }
        } else {
            constants.remove(path);
            value
        };
        result = result.build_path(&mapping.destination, value);
    }
    result
}

/// Whether one path is an ancestor of the other
fn overlaps(a: &PathReference, b: &PathReference) -> bool {
    let (a, b) = (a.components(), b.components());
    a.starts_with(b) || b.starts_with(a)
}

fn mapped_value(payload: &DataObject, mapping: &MappingOperation) -> Option<DataItem> {
    let extracted = mapping.source.as_ref().and_then(|source| payload.extract(source));
    if let Some(filter) = &mapping.filter {
        match extracted {
            Some(value) if value.to_string() == *filter => {}
            _ => return None,
        }
    }
    mapping.map_to.clone().or_else(|| extracted.cloned())
}
