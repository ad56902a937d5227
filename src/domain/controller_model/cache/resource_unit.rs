use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::controller_model::utils::id::{AliasProviderId, ResourceId, ValueProviderId};

/// Smallest exclusively allocatable slice of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceUnit {
    /// One participant port of a multipoint device.
    RoomPort { resource_id: ResourceId, port: u32 },
    /// One concurrent recording of a recording device.
    RecordingLicense { resource_id: ResourceId, index: u32 },
    /// A whole device, e.g. a terminal.
    Device { resource_id: ResourceId },
    Alias { provider_id: AliasProviderId, value: String },
    Value { provider_id: ValueProviderId, value: String },
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUnit::RoomPort { resource_id, port } => write!(f, "port {} of '{}'", port, resource_id),
            ResourceUnit::RecordingLicense { resource_id, index } => write!(f, "recording license {} of '{}'", index, resource_id),
            ResourceUnit::Device { resource_id } => write!(f, "device '{}'", resource_id),
            ResourceUnit::Alias { provider_id, value } => write!(f, "alias '{}' of provider '{}'", value, provider_id),
            ResourceUnit::Value { provider_id, value } => write!(f, "value '{}' of provider '{}'", value, provider_id),
        }
    }
}
