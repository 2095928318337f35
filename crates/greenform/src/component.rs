//! Greengrass deployment component lists.
use std::collections::BTreeMap;

use snafu::prelude::*;

use crate::{DuplicateComponentSnafu, Error, HasDependencies};

/// Configuration merge/reset applied when a component is deployed.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<Vec<String>>,
}

/// One component of a deployment.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDeployment {
    pub component_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_update: Option<ConfigurationUpdate>,
}

impl ComponentDeployment {
    pub fn new(component_version: impl Into<String>) -> Self {
        Self {
            component_version: component_version.into(),
            configuration_update: None,
        }
    }

    pub fn with_merge(mut self, merge: impl Into<String>) -> Self {
        self.configuration_update
            .get_or_insert_with(Default::default)
            .merge = Some(merge.into());
        self
    }
}

impl HasDependencies for ComponentDeployment {}

/// Components of a deployment keyed by component name.
///
/// Names are unique. Adding never modifies an existing entry; a name that
/// is already present is rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ComponentList(BTreeMap<String, ComponentDeployment>);

impl HasDependencies for ComponentList {}

impl ComponentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ComponentDeployment> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ComponentDeployment)> {
        self.0.iter()
    }

    /// Returns a new list with `component` added under `name`.
    pub fn add_component(
        &self,
        name: impl Into<String>,
        component: ComponentDeployment,
    ) -> Result<Self, Error> {
        let name = name.into();
        ensure!(!self.0.contains_key(&name), DuplicateComponentSnafu { name });
        log::trace!("adding component '{name}' {}", component.component_version);
        let mut next = self.clone();
        next.0.insert(name, component);
        Ok(next)
    }

    /// Returns a new list containing the components of both.
    ///
    /// Fails without adding anything if any name in `other` is already
    /// present.
    pub fn merge(&self, other: &ComponentList) -> Result<Self, Error> {
        if let Some(name) = other.0.keys().find(|name| self.0.contains_key(*name)) {
            return DuplicateComponentSnafu { name }.fail();
        }
        let mut next = self.clone();
        next.0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(next)
    }
}

impl FromIterator<(String, ComponentDeployment)> for ComponentList {
    fn from_iter<T: IntoIterator<Item = (String, ComponentDeployment)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// See [`ComponentList::add_component`].
pub fn add_component(
    existing: &ComponentList,
    name: impl Into<String>,
    component: ComponentDeployment,
) -> Result<ComponentList, Error> {
    existing.add_component(name, component)
}
