//! The per-family lifecycle controller.
//!
//! A controller is stateless between invocations. Everything it needs to
//! know about a resource comes either from the caller (the desired and
//! previous descriptors) or from the store.
use std::sync::Arc;

use snafu::{prelude::*, IntoError};

use crate::{
    descriptor::{ResourceDescriptor, ResourceFamily, ResourceRecord},
    lifecycle::{LifecycleEvent, LifecycleState, Tracker},
    store::{RemoteError, ResourceStore},
    AlreadyExistsSnafu, DependencyExistsSnafu, Error, FamilyMismatchSnafu, HasDependencies,
    RemoteOperationFailedSnafu, ReplacementCleanupSnafu,
};

/// What `create` does when a resource with the desired name is already in
/// the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdoptionPolicy {
    /// Return [`Error::AlreadyExists`].
    #[default]
    Fail,
    /// Take over the existing resource and return its record.
    Adopt,
}

pub struct LifecycleController<S> {
    family: ResourceFamily,
    store: Arc<S>,
    adoption: AdoptionPolicy,
}

impl<S> core::fmt::Debug for LifecycleController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("family", &self.family)
            .field("adoption", &self.adoption)
            .finish()
    }
}

impl<S: ResourceStore> LifecycleController<S> {
    pub fn new(family: ResourceFamily, store: Arc<S>) -> Self {
        Self {
            family,
            store,
            adoption: AdoptionPolicy::default(),
        }
    }

    pub fn with_adoption(mut self, adoption: AdoptionPolicy) -> Self {
        self.adoption = adoption;
        self
    }

    pub fn family(&self) -> ResourceFamily {
        self.family
    }

    pub fn adoption(&self) -> AdoptionPolicy {
        self.adoption
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn check_family(&self, desc: &ResourceDescriptor) -> Result<(), Error> {
        ensure!(
            desc.family() == self.family,
            FamilyMismatchSnafu {
                expected: self.family,
                found: desc.family(),
            }
        );
        Ok(())
    }

    /// Moves `tracker` to its failed state and wraps `source`.
    fn fail(&self, tracker: &mut Tracker, source: RemoteError) -> Error {
        let state = tracker
            .advance(LifecycleEvent::Failed)
            .unwrap_or_else(|_| tracker.state());
        log::error!("{} '{}' is {state}: {source}", self.family, tracker.name());
        RemoteOperationFailedSnafu {
            family: self.family,
            name: tracker.name(),
            state,
        }
        .into_error(source)
    }

    /// Looks up the record of the resource named `name`.
    ///
    /// Store failures are reported in [`LifecycleState::NotExists`], as
    /// nothing is known about the resource yet.
    pub async fn lookup(&self, name: &str) -> Result<Option<ResourceRecord>, Error> {
        self.store
            .describe(self.family, name)
            .await
            .context(RemoteOperationFailedSnafu {
                family: self.family,
                name,
                state: LifecycleState::NotExists,
            })
    }

    /// Provisions the resource described by `desired`.
    ///
    /// ## Errors
    /// Errs before any call to the store if `desired` is invalid. Errs with
    /// [`Error::AlreadyExists`] if a resource of the same name exists and
    /// the adoption policy is [`AdoptionPolicy::Fail`].
    pub async fn create(&self, desired: &ResourceDescriptor) -> Result<ResourceRecord, Error> {
        self.check_family(desired)?;
        desired.validate()?;
        let name = desired.desired_name();
        log::info!("create {} '{name}':", self.family);
        let dependencies = desired.spec().dependencies();
        if !dependencies.is_empty() {
            log::debug!("  depends on {dependencies}");
        }
        let mut tracker = Tracker::new(self.family, &name, LifecycleState::NotExists);
        tracker.advance(LifecycleEvent::Create)?;

        if self.family.unique_names() {
            let existing = match self.store.describe(self.family, &name).await {
                Ok(existing) => existing,
                Err(e) => return Err(self.fail(&mut tracker, e)),
            };
            if let Some(record) = existing {
                return self.existing(&mut tracker, record);
            }
        }

        self.provision(&mut tracker, desired).await
    }

    fn existing(
        &self,
        tracker: &mut Tracker,
        record: ResourceRecord,
    ) -> Result<ResourceRecord, Error> {
        match self.adoption {
            AdoptionPolicy::Fail => AlreadyExistsSnafu {
                family: self.family,
                name: tracker.name(),
            }
            .fail(),
            AdoptionPolicy::Adopt => {
                log::warn!(
                    "  adopting existing {} '{}' ({})",
                    self.family,
                    tracker.name(),
                    record.arn
                );
                tracker.advance(LifecycleEvent::Succeeded)?;
                Ok(record)
            }
        }
    }

    async fn provision(
        &self,
        tracker: &mut Tracker,
        desired: &ResourceDescriptor,
    ) -> Result<ResourceRecord, Error> {
        match self.store.provision(desired).await {
            Ok(record) => {
                tracker.advance(LifecycleEvent::Succeeded)?;
                log::info!("  provisioned {}", record.arn);
                Ok(record)
            }
            Err(RemoteError::AlreadyExists { .. }) => AlreadyExistsSnafu {
                family: self.family,
                name: tracker.name(),
            }
            .fail(),
            Err(e) => Err(self.fail(tracker, e)),
        }
    }

    /// Moves the resource from `previous` to `desired`.
    ///
    /// Returns `previous_record` untouched, without calling the store, when
    /// nothing changed. Changes that cannot be made in place provision (or
    /// adopt) a replacement first and remove the previous resource after.
    ///
    /// ## Errors
    /// Errs with [`Error::AlreadyExists`] if the replacement would have the
    /// same identity as the previous resource, such as a component whose
    /// recipe changed but whose version did not.
    pub async fn update(
        &self,
        desired: &ResourceDescriptor,
        previous: &ResourceDescriptor,
        previous_record: &ResourceRecord,
    ) -> Result<ResourceRecord, Error> {
        self.check_family(desired)?;
        let name = desired.desired_name();
        if desired == previous {
            log::warn!(
                "Skipping '{name}' update as the local value has not changed.\n\
                If you require an update, consider adding a sentinel value."
            );
            return Ok(previous_record.clone());
        }
        desired.validate()?;

        let cmp = pretty_assertions::Comparison::new(previous, desired);
        let change_string = format!("{cmp}")
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        log::info!("updating {} '{name}':\n{change_string}", self.family);

        let mut tracker = Tracker::new(self.family, &name, LifecycleState::Active);
        if desired.spec().requires_replacement(previous.spec()) {
            tracker.advance(LifecycleEvent::Replace)?;
            self.replace(&mut tracker, desired, previous_record).await
        } else {
            tracker.advance(LifecycleEvent::Update)?;
            match self.store.modify(desired, previous_record).await {
                Ok(record) => {
                    tracker.advance(LifecycleEvent::Succeeded)?;
                    log::info!("  updated {}", record.arn);
                    Ok(record)
                }
                Err(e) => Err(self.fail(&mut tracker, e)),
            }
        }
    }

    async fn replace(
        &self,
        tracker: &mut Tracker,
        desired: &ResourceDescriptor,
        previous_record: &ResourceRecord,
    ) -> Result<ResourceRecord, Error> {
        let existing = if self.family.unique_names() {
            match self.store.describe(self.family, tracker.name()).await {
                Ok(existing) => existing,
                Err(e) => return Err(self.fail(tracker, e)),
            }
        } else {
            None
        };

        let record = match existing {
            Some(current) if current.physical_id == previous_record.physical_id => {
                // the store cannot hold two resources of one identity
                log::warn!(
                    "  {} '{}' cannot be replaced under the same name, \
                    change its name or version instead",
                    self.family,
                    tracker.name()
                );
                tracker.advance(LifecycleEvent::Failed)?;
                return AlreadyExistsSnafu {
                    family: self.family,
                    name: tracker.name(),
                }
                .fail();
            }
            Some(record) => self.existing(tracker, record)?,
            None => self.provision(tracker, desired).await?,
        };
        self.retire(tracker.name(), record, previous_record).await
    }

    /// Removes `previous_record` once `record` has replaced it.
    async fn retire(
        &self,
        name: &str,
        record: ResourceRecord,
        previous_record: &ResourceRecord,
    ) -> Result<ResourceRecord, Error> {
        log::info!(
            "  removing replaced {} '{}'",
            self.family,
            previous_record.physical_id
        );
        let mut old = Tracker::new(
            self.family,
            &previous_record.physical_id,
            LifecycleState::Active,
        );
        old.advance(LifecycleEvent::Delete)?;
        match self.store.remove(self.family, previous_record).await {
            Ok(()) => {
                old.advance(LifecycleEvent::Succeeded)?;
                Ok(record)
            }
            Err(e) if e.is_not_found() => {
                old.advance(LifecycleEvent::Succeeded)?;
                log::debug!("  '{}' was already gone", previous_record.physical_id);
                Ok(record)
            }
            Err(source) => {
                old.advance(LifecycleEvent::Failed)?;
                Err(ReplacementCleanupSnafu {
                    family: self.family,
                    name,
                    record: Box::new(record),
                }
                .into_error(source))
            }
        }
    }

    /// Removes the resource recorded in `previous_record`.
    ///
    /// A resource that is already gone counts as deleted.
    pub async fn delete(&self, previous_record: &ResourceRecord) -> Result<(), Error> {
        let name = previous_record.physical_id.as_str();
        log::info!("delete {} '{name}':", self.family);
        let mut tracker = Tracker::new(self.family, name, LifecycleState::Active);
        tracker.advance(LifecycleEvent::Delete)?;
        match self.store.remove(self.family, previous_record).await {
            Ok(()) => {
                tracker.advance(LifecycleEvent::Succeeded)?;
                log::info!("  {} '{name}' is destroyed", self.family);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracker.advance(LifecycleEvent::Succeeded)?;
                log::warn!("  {} '{name}' was already gone", self.family);
                Ok(())
            }
            Err(RemoteError::HasDependents { dependents, .. }) => {
                tracker.advance(LifecycleEvent::Failed)?;
                DependencyExistsSnafu {
                    family: self.family,
                    name,
                    dependents,
                }
                .fail()
            }
            Err(e) => Err(self.fail(&mut tracker, e)),
        }
    }
}
