//! The custom-resource request/response boundary.
//!
//! Events carry untyped property maps. They are turned into
//! [`ResourceDescriptor`]s here and nowhere else.
use std::collections::BTreeMap;

use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::{
    controller::LifecycleController,
    descriptor::{ResourceDescriptor, ResourceRecord},
    store::ResourceStore,
    Error, MissingPropertySnafu,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    pub request_type: RequestType,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
}

impl CustomResourceEvent {
    pub fn create(logical_resource_id: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            request_type: RequestType::Create,
            logical_resource_id: logical_resource_id.into(),
            physical_resource_id: None,
            resource_properties: properties,
            old_resource_properties: None,
        }
    }

    pub fn update(
        logical_resource_id: impl Into<String>,
        physical_resource_id: impl Into<String>,
        properties: Map<String, Value>,
        old_properties: Map<String, Value>,
    ) -> Self {
        Self {
            request_type: RequestType::Update,
            logical_resource_id: logical_resource_id.into(),
            physical_resource_id: Some(physical_resource_id.into()),
            resource_properties: properties,
            old_resource_properties: Some(old_properties),
        }
    }

    pub fn delete(
        logical_resource_id: impl Into<String>,
        physical_resource_id: impl Into<String>,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            request_type: RequestType::Delete,
            logical_resource_id: logical_resource_id.into(),
            physical_resource_id: Some(physical_resource_id.into()),
            resource_properties: properties,
            old_resource_properties: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub physical_resource_id: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl From<ResourceRecord> for CustomResourceResponse {
    fn from(record: ResourceRecord) -> Self {
        Self {
            physical_resource_id: record.physical_id,
            data: record.attributes,
        }
    }
}

impl<S: ResourceStore> LifecycleController<S> {
    /// Finds the record the event refers to.
    ///
    /// A physical id names exactly one resource. When it is not in the store
    /// that resource is gone, even if another resource now holds the
    /// descriptor's name. Only events without a physical id fall back to the
    /// desired name.
    async fn locate(
        &self,
        physical_resource_id: Option<&str>,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ResourceRecord>, Error> {
        match physical_resource_id {
            Some(id) => Ok(self
                .lookup(id)
                .await?
                .filter(|record| record.physical_id == id)),
            None => self.lookup(&descriptor.desired_name()).await,
        }
    }

    /// Handles one custom-resource request.
    ///
    /// Nothing is remembered between requests: the previous record of an
    /// update or delete is re-derived from the store.
    pub async fn handle(&self, event: &CustomResourceEvent) -> Result<CustomResourceResponse, Error> {
        let family = self.family();
        log::debug!(
            "{:?} request for {family} '{}'",
            event.request_type,
            event.logical_resource_id
        );
        let desired = ResourceDescriptor::from_properties(family, &event.resource_properties)?;
        let physical_id = event.physical_resource_id.as_deref();

        match event.request_type {
            RequestType::Create => Ok(self.create(&desired).await?.into()),
            RequestType::Update => {
                let old = event
                    .old_resource_properties
                    .as_ref()
                    .context(MissingPropertySnafu {
                        family,
                        key: "OldResourceProperties",
                    })?;
                let previous = ResourceDescriptor::from_properties(family, old)?;
                match self.locate(physical_id, &previous).await? {
                    Some(record) => Ok(self.update(&desired, &previous, &record).await?.into()),
                    None => {
                        log::warn!(
                            "previous {family} '{}' is not in the store, creating it",
                            previous.desired_name()
                        );
                        Ok(self.create(&desired).await?.into())
                    }
                }
            }
            RequestType::Delete => match self.locate(physical_id, &desired).await? {
                Some(record) => {
                    self.delete(&record).await?;
                    Ok(CustomResourceResponse {
                        physical_resource_id: record.physical_id,
                        data: BTreeMap::new(),
                    })
                }
                None => {
                    log::info!(
                        "{family} '{}' is already gone",
                        physical_id
                            .map(str::to_owned)
                            .unwrap_or_else(|| desired.desired_name())
                    );
                    Ok(CustomResourceResponse {
                        physical_resource_id: physical_id
                            .map(str::to_owned)
                            .unwrap_or_else(|| desired.desired_name()),
                        data: BTreeMap::new(),
                    })
                }
            },
        }
    }
}
