//! One controller per resource family, shared by everything that asks.
use std::{collections::HashMap, sync::Arc};

use crate::{
    controller::{AdoptionPolicy, LifecycleController},
    descriptor::ResourceFamily,
    store::ResourceStore,
};

/// Hands out the controller for a resource family, creating it on first
/// request and returning the same instance afterwards.
///
/// Pass the registry to whatever needs controllers; there is no global.
pub struct ProviderRegistry<S> {
    store: Arc<S>,
    adoption: AdoptionPolicy,
    controllers: HashMap<ResourceFamily, Arc<LifecycleController<S>>>,
}

impl<S: ResourceStore> ProviderRegistry<S> {
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            adoption: AdoptionPolicy::default(),
            controllers: HashMap::default(),
        }
    }

    /// Sets the adoption policy of controllers created from now on.
    pub fn with_adoption(mut self, adoption: AdoptionPolicy) -> Self {
        self.adoption = adoption;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn controller(&mut self, family: ResourceFamily) -> Arc<LifecycleController<S>> {
        if let Some(controller) = self.controllers.get(&family) {
            log::trace!("reusing {family} controller");
            return controller.clone();
        }
        log::debug!("creating {family} controller");
        let controller = Arc::new(
            LifecycleController::new(family, self.store.clone()).with_adoption(self.adoption),
        );
        self.controllers.insert(family, controller.clone());
        controller
    }

    /// Number of controllers created so far.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
