use std::collections::BTreeMap;

use crate::domain::controller_model::resource::resource::{AliasProvider, DeviceResource, ValueProvider};
use crate::domain::controller_model::utils::id::{AliasProviderId, ResourceId, ValueProviderId};
use crate::error::{Error, Result};

/// Read only registry of devices and providers known to the controller.
///
/// Ordered maps keep candidate selection deterministic.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    resources: BTreeMap<ResourceId, DeviceResource>,
    alias_providers: BTreeMap<AliasProviderId, AliasProvider>,
    value_providers: BTreeMap<ValueProviderId, ValueProvider>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&mut self, resource: DeviceResource) -> Result<()> {
        if self.resources.contains_key(&resource.id) {
            return Err(Error::ModelConstructionError(format!("Duplicate resource id '{}'", resource.id)));
        }
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    pub fn add_alias_provider(&mut self, provider: AliasProvider) -> Result<()> {
        self.check_owner(&provider.resource_id, "Alias provider", &provider.id.id)?;
        if self.alias_providers.contains_key(&provider.id) {
            return Err(Error::ModelConstructionError(format!("Duplicate alias provider id '{}'", provider.id)));
        }
        self.alias_providers.insert(provider.id.clone(), provider);
        Ok(())
    }

    pub fn add_value_provider(&mut self, provider: ValueProvider) -> Result<()> {
        self.check_owner(&provider.resource_id, "Value provider", &provider.id.id)?;
        if self.value_providers.contains_key(&provider.id) {
            return Err(Error::ModelConstructionError(format!("Duplicate value provider id '{}'", provider.id)));
        }
        self.value_providers.insert(provider.id.clone(), provider);
        Ok(())
    }

    fn check_owner(&self, resource_id: &ResourceId, kind: &str, id: &str) -> Result<()> {
        if !self.resources.contains_key(resource_id) {
            return Err(Error::ModelConstructionError(format!("{} '{}' references unknown resource '{}'", kind, id, resource_id)));
        }
        Ok(())
    }

    pub fn get_resource(&self, id: &ResourceId) -> Option<&DeviceResource> {
        self.resources.get(id)
    }

    pub fn get_alias_provider(&self, id: &AliasProviderId) -> Option<&AliasProvider> {
        self.alias_providers.get(id)
    }

    pub fn get_value_provider(&self, id: &ValueProviderId) -> Option<&ValueProvider> {
        self.value_providers.get(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &DeviceResource> {
        self.resources.values()
    }

    /// Allocatable, managed devices able to host rooms.
    pub fn room_providers(&self) -> impl Iterator<Item = &DeviceResource> {
        self.resources.values().filter(|r| r.allocatable && r.is_managed() && r.room_provider.is_some())
    }

    pub fn recording_devices(&self) -> impl Iterator<Item = &DeviceResource> {
        self.resources.values().filter(|r| r.allocatable && r.is_managed() && r.recording.is_some())
    }

    pub fn alias_providers(&self) -> impl Iterator<Item = &AliasProvider> {
        self.alias_providers.values()
    }

    pub fn value_providers(&self) -> impl Iterator<Item = &ValueProvider> {
        self.value_providers.values()
    }
}
