//! Transaction and snapshot handles.

use crate::store::{Inner, Set};
use kpng_sync_common::{Changes, Op};
use kpng_types::{EndpointInfo, Service, ServiceKey, SourceKey};
use std::ops::Bound;
use std::sync::Arc;

/// Endpoint rows of one service, across all of its sources.
fn service_sources<'a>(
    inner: &'a Inner,
    namespace: &str,
    service: &str,
) -> impl Iterator<Item = (&'a SourceKey, &'a Arc<[EndpointInfo]>)> {
    let start = SourceKey::new(namespace, service, "");
    let namespace = namespace.to_string();
    let service = service.to_string();
    inner
        .endpoints
        .range((Bound::Included(start), Bound::Unbounded))
        .take_while(move |(key, _)| key.namespace == namespace && key.service_name == service)
}

/// Mutable handle passed to [`crate::Store::update`].
pub struct Tx<'a> {
    inner: &'a mut Inner,
    changes: Changes,
    synced_changed: bool,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(inner: &'a mut Inner) -> Self {
        Self {
            inner,
            changes: Changes::new(),
            synced_changed: false,
        }
    }

    pub(crate) fn finish(self) -> (Changes, bool) {
        (self.changes, self.synced_changed)
    }

    /// Upserts a service. Returns false if the stored row was identical.
    pub fn set_service(&mut self, service: Service) -> bool {
        let key = service.key();
        if self.inner.services.get(&key).is_some_and(|s| **s == service) {
            return false;
        }
        let service = Arc::new(service);
        self.inner.services.insert(key, service.clone());
        self.changes.record(Op::SetService(service));
        true
    }

    /// Deletes a service. Returns false if it was not stored.
    pub fn del_service(&mut self, namespace: &str, name: &str) -> bool {
        let key = ServiceKey::new(namespace, name);
        if self.inner.services.remove(&key).is_none() {
            return false;
        }
        self.changes.record(Op::DeleteService(key));
        true
    }

    /// Replaces every endpoint published by `source` for `service`.
    ///
    /// If the source previously fed another service, its old row is
    /// deleted in the same transaction.
    pub fn set_endpoints_of_source(
        &mut self,
        namespace: &str,
        service: &str,
        source: &str,
        endpoints: Vec<EndpointInfo>,
    ) -> bool {
        let index_key = (namespace.to_string(), source.to_string());
        if let Some(previous) = self.inner.sources.get(&index_key) {
            if previous != service {
                let old = SourceKey::new(namespace, previous.as_str(), source);
                self.inner.endpoints.remove(&old);
                self.changes.record(Op::DeleteEndpoints(old));
            }
        }

        let key = SourceKey::new(namespace, service, source);
        if self
            .inner
            .endpoints
            .get(&key)
            .is_some_and(|current| **current == *endpoints)
        {
            return false;
        }

        let endpoints: Arc<[EndpointInfo]> = Arc::from(endpoints);
        self.inner.sources.insert(index_key, service.to_string());
        self.inner.endpoints.insert(key.clone(), endpoints.clone());
        self.changes.record(Op::SetEndpoints {
            source: key,
            endpoints,
        });
        true
    }

    /// Deletes the batch published by `source`, whatever service it fed.
    pub fn del_endpoints_of_source(&mut self, namespace: &str, source: &str) -> bool {
        let index_key = (namespace.to_string(), source.to_string());
        let Some(service) = self.inner.sources.remove(&index_key) else {
            return false;
        };
        let key = SourceKey::new(namespace, service, source);
        self.inner.endpoints.remove(&key);
        self.changes.record(Op::DeleteEndpoints(key));
        true
    }

    /// Marks `set` as having completed its initial listing. Idempotent.
    pub fn set_sync(&mut self, set: Set) {
        if self.inner.synced.insert(set) {
            self.synced_changed = true;
        }
    }

    pub fn is_synced(&self, set: Set) -> bool {
        self.inner.synced.contains(&set)
    }

    pub fn get_service(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.inner
            .services
            .get(&ServiceKey::new(namespace, name))
            .map(|s| &**s)
    }

    /// Calls `f` for every endpoint of a service, across all sources.
    pub fn each_endpoint_of_service(&self, namespace: &str, service: &str, mut f: impl FnMut(&EndpointInfo)) {
        for (_, endpoints) in service_sources(&*self.inner, namespace, service) {
            endpoints.iter().for_each(&mut f);
        }
    }
}

/// Read-only handle passed to [`crate::Store::view`].
pub struct View<'a> {
    inner: &'a Inner,
}

impl<'a> View<'a> {
    pub(crate) fn new(inner: &'a Inner) -> Self {
        Self { inner }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_synced(&self, set: Set) -> bool {
        self.inner.synced.contains(&set)
    }

    pub fn all_synced(&self) -> bool {
        self.inner.all_synced()
    }

    pub fn get_service(&self, namespace: &str, name: &str) -> Option<&'a Service> {
        self.inner
            .services
            .get(&ServiceKey::new(namespace, name))
            .map(|s| &**s)
    }

    pub fn services(&self) -> impl Iterator<Item = &'a Service> {
        self.inner.services.values().map(|s| &**s)
    }

    pub fn endpoints_of_source(&self, source: &SourceKey) -> Option<&'a [EndpointInfo]> {
        self.inner.endpoints.get(source).map(|e| &**e)
    }

    pub fn each_endpoint_of_service(&self, namespace: &str, service: &str, mut f: impl FnMut(&EndpointInfo)) {
        for (_, endpoints) in service_sources(self.inner, namespace, service) {
            endpoints.iter().for_each(&mut f);
        }
    }

    pub fn endpoints_of_service(&self, namespace: &str, service: &str) -> Vec<&'a EndpointInfo> {
        service_sources(self.inner, namespace, service)
            .flat_map(|(_, endpoints)| endpoints.iter())
            .collect()
    }

    pub fn service_count(&self) -> usize {
        self.inner.services.len()
    }

    pub fn source_count(&self) -> usize {
        self.inner.endpoints.len()
    }
}
