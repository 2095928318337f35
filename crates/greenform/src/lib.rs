//! # Greenform
//!
//! Greenform provisions AWS IoT Greengrass environments: IoT things,
//! certificates, IoT policies, role aliases, thing groups, Greengrass
//! components and Greengrass deployments.
//!
//! Every resource family is driven by the same lifecycle: a desired-state
//! [`ResourceDescriptor`](descriptor::ResourceDescriptor) is reconciled
//! against an external resource store by a
//! [`LifecycleController`](controller::LifecycleController) through one of
//! three events: create, update or delete.
//!
//! ## Concepts
//!
//! - **Descriptor**: the desired state of one resource, as a typed variant
//!   per resource family. Descriptors are converted to and from the untyped
//!   custom-resource property map only at the [`event`] boundary.
//! - **Record**: the state of the resource as the store sees it. The store
//!   owns records; the controller holds no durable state and re-derives
//!   what it needs from the store on every invocation.
//! - **Store**: anything implementing [`ResourceStore`](store::ResourceStore).
//!   [`LocalStore`](local::LocalStore) keeps records as JSON files on disk
//!   and stands in for an AWS account.
//!
//! Names for resources are generated by [`naming`] and IoT policy documents
//! are rendered from templates by [`policy`].
//!
//! ## Error Handling
//!
//! Greenform exposes a single error enum [`Error`]. Validation errors
//! (naming, duplicate components, missing template parameters) are raised
//! before any call to the store is made.

extern crate self as green;

use snafu::prelude::*;

pub use greenform_derive::HasDependencies;

pub mod arn;
pub mod bundle;
pub mod component;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod event;
mod has_dependencies_impl;
pub mod lifecycle;
pub mod local;
pub mod naming;
pub mod policy;
pub mod registry;
pub mod store;
#[cfg(test)]
mod test;

use arn::Arn;
use descriptor::{ResourceFamily, ResourceRecord};
use lifecycle::{LifecycleEvent, LifecycleState};
use store::RemoteError;

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{family} '{name}' already exists in the resource store"))]
    AlreadyExists { family: ResourceFamily, name: String },

    #[snafu(display("Cannot delete {family} '{name}', it is still used by: {dependents}"))]
    DependencyExists {
        family: ResourceFamily,
        name: String,
        dependents: String,
    },

    #[snafu(display("Policy template references '{name}' but no such parameter was given"))]
    MissingParameter { name: String },

    #[snafu(display("Malformed policy template at byte {offset}: {reason}"))]
    MalformedTemplate { offset: usize, reason: String },

    #[snafu(display(
        "Duplicate components not allowed. Component '{name}' already part of deployment"
    ))]
    DuplicateComponent { name: String },

    #[snafu(display("Name '{name}' violates naming constraints: {reason}"))]
    NamingConstraint { name: String, reason: String },

    #[snafu(display("Invalid ARN '{arn}': {reason}"))]
    InvalidArn { arn: String, reason: String },

    #[snafu(display("Policy document for '{name}' is not valid JSON: {source}"))]
    InvalidPolicyDocument {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Deployment '{name}' has no components"))]
    EmptyDeployment { name: String },

    #[snafu(display("Missing property '{key}' for {family}"))]
    MissingProperty { family: ResourceFamily, key: String },

    #[snafu(display("Invalid properties for {family}: {source}"))]
    InvalidProperty {
        family: ResourceFamily,
        source: serde_json::Error,
    },

    #[snafu(display("Controller for {expected} was handed a {found} descriptor"))]
    FamilyMismatch {
        expected: ResourceFamily,
        found: ResourceFamily,
    },

    #[snafu(display("{family} '{name}' cannot go from {from} on {event}"))]
    InvalidTransition {
        family: ResourceFamily,
        name: String,
        from: LifecycleState,
        event: LifecycleEvent,
    },

    #[snafu(display("{family} '{name}' is {state}: {source}"))]
    RemoteOperationFailed {
        family: ResourceFamily,
        name: String,
        state: LifecycleState,
        source: RemoteError,
    },

    #[snafu(display(
        "{family} '{name}' was replaced by '{}' but the old resource could not be deleted: {source}",
        record.physical_id
    ))]
    ReplacementCleanup {
        family: ResourceFamily,
        name: String,
        record: Box<ResourceRecord>,
        source: RemoteError,
    },

    #[snafu(display("Could not read config file '{path:?}': {source}"))]
    ConfigRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse config '{path:?}': {source}"))]
    ConfigParse {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Invalid config: {reason}"))]
    InvalidConfig { reason: String },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The set of ARNs a descriptor refers to.
///
/// Every ARN listed here must resolve to an existing resource before the
/// descriptor is handed to a controller.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Dependencies {
    inner: Vec<Arn>,
}

impl IntoIterator for Dependencies {
    type Item = Arn;

    type IntoIter = <Vec<Arn> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl core::fmt::Display for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(
            &self
                .inner
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

impl Dependencies {
    pub fn single(arn: Arn) -> Self {
        Dependencies { inner: vec![arn] }
    }

    pub fn merge(self, other: Self) -> Self {
        Dependencies {
            inner: [self.inner, other.inner].concat(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Tracks the ARNs a value depends on.
///
/// This trait can be derived, and has a default implementation that
/// reports zero dependencies.
pub trait HasDependencies {
    fn dependencies(&self) -> Dependencies {
        Dependencies::default()
    }
}
