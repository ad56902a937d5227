use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::controller_model::resource::value_pattern::ValuePattern;
use crate::domain::controller_model::utils::id::{AgentId, AliasProviderId, ResourceId, ValueProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Technology {
    H323,
    Sip,
    AdobeConnect,
    WebRtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AliasType {
    E164,
    H323Uri,
    SipUri,
    RoomName,
    Url,
}

impl AliasType {
    /// Technology the alias is dialable with, `None` for technology independent aliases.
    pub fn technology(&self) -> Option<Technology> {
        match self {
            AliasType::E164 | AliasType::H323Uri => Some(Technology::H323),
            AliasType::SipUri => Some(Technology::Sip),
            AliasType::Url => Some(Technology::AdobeConnect),
            AliasType::RoomName => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Alias {
    pub alias_type: AliasType,
    pub value: String,
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.alias_type, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomProviderCapability {
    /// Number of participant ports.
    pub license_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingCapability {
    /// Number of recordings which can run at the same time.
    pub license_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCapability {
    pub aliases: Vec<Alias>,
}

/// A managed device: multipoint unit, recording server or terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResource {
    pub id: ResourceId,
    pub name: String,
    /// Agent controlling the device, devices without agent cannot be executed.
    pub agent_id: Option<AgentId>,
    pub allocatable: bool,
    pub technologies: BTreeSet<Technology>,
    pub room_provider: Option<RoomProviderCapability>,
    pub recording: Option<RecordingCapability>,
    pub terminal: Option<TerminalCapability>,
}

impl DeviceResource {
    pub fn is_managed(&self) -> bool {
        self.agent_id.is_some()
    }

    pub fn supports_all(&self, technologies: &BTreeSet<Technology>) -> bool {
        technologies.is_subset(&self.technologies)
    }

    pub fn port_count(&self) -> u32 {
        self.room_provider.as_ref().map_or(0, |capability| capability.license_count)
    }
}

/// Hands out aliases of one type, e.g. E.164 numbers of a gatekeeper prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasProvider {
    pub id: AliasProviderId,
    pub resource_id: ResourceId,
    pub alias_type: AliasType,
    pub pattern: ValuePattern,
}

/// Hands out generic values, e.g. room names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueProvider {
    pub id: ValueProviderId,
    pub resource_id: ResourceId,
    pub pattern: ValuePattern,
}
