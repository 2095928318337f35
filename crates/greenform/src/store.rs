//! The external resource store a controller reconciles against.
use std::future::Future;

use snafu::prelude::*;

use crate::descriptor::{ResourceDescriptor, ResourceFamily, ResourceRecord};

/// Failures reported by a [`ResourceStore`], classified by what the
/// controller needs to decide next.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RemoteError {
    #[snafu(display("'{id}' was not found"))]
    NotFound { id: String },

    #[snafu(display("A resource named '{name}' already exists"))]
    AlreadyExists { name: String },

    #[snafu(display("'{id}' is still referenced by {dependents}"))]
    HasDependents { id: String, dependents: String },

    #[snafu(display("Dependency '{arn}' does not exist"))]
    MissingDependency { arn: String },

    #[snafu(display("{path:?}: {source}"))]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not encode or decode {path:?}: {source}"))]
    Codec {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("{message}"))]
    Service { message: String },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

/// Something that holds resources, usually a cloud account.
///
/// Implementations hold the durable state; a controller never does.
pub trait ResourceStore {
    /// Looks up the resource of `family` known by `name`.
    fn describe(
        &self,
        family: ResourceFamily,
        name: &str,
    ) -> impl Future<Output = Result<Option<ResourceRecord>, RemoteError>>;

    fn provision(
        &self,
        desired: &ResourceDescriptor,
    ) -> impl Future<Output = Result<ResourceRecord, RemoteError>>;

    /// Modifies an existing resource in place.
    fn modify(
        &self,
        desired: &ResourceDescriptor,
        previous: &ResourceRecord,
    ) -> impl Future<Output = Result<ResourceRecord, RemoteError>>;

    fn remove(
        &self,
        family: ResourceFamily,
        previous: &ResourceRecord,
    ) -> impl Future<Output = Result<(), RemoteError>>;
}
