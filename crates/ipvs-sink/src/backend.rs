//! IPVS reconciliation engine.

use crate::config::IpvsConfig;
use crate::desired::desired_state;
use crate::dummy::DummyIps;
use crate::error::EngineError;
use crate::ipset::Ipsets;
use crate::kernel::{Kernel, KernelOp};
use crate::lb::{IpvsLb, RealServer};
use async_trait::async_trait;
use kpng_sync_common::{DiffSet, Sink, SinkResult};
use kpng_types::{EndpointInfo, IpSet, Service, ServiceKey, SourceKey};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

/// Counters over the life of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub syncs: u64,
    pub kernel_ops: u64,
    pub kernel_failures: u64,
    pub invalid_entries: u64,
    pub skipped_services: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Add,
    Delete,
}

async fn apply_logged<K: Kernel + ?Sized>(kernel: &mut K, stats: &mut SyncStats, op: &KernelOp) -> bool {
    stats.kernel_ops += 1;
    match kernel.apply(op).await {
        Ok(()) => true,
        Err(e) => {
            error!(op = %op, error = %e, "kernel operation failed, retrying on next sync");
            stats.kernel_failures += 1;
            false
        }
    }
}

/// Programs services into IPVS through a [`Kernel`].
#[derive(Debug)]
pub struct Backend<K> {
    config: IpvsConfig,
    kernel: K,
    services: BTreeMap<ServiceKey, Service>,
    /// Endpoints by service, then by source name.
    endpoints: BTreeMap<ServiceKey, BTreeMap<String, Vec<EndpointInfo>>>,
    ipsets: Ipsets,
    lbs: DiffSet<String, IpvsLb>,
    real_servers: DiffSet<String, RealServer>,
    dummy: DummyIps,
    stats: SyncStats,
}

impl<K: Kernel> Backend<K> {
    pub fn new(config: IpvsConfig, kernel: K) -> Self {
        let dummy = DummyIps::new(config.dummy_interface.clone());
        Self {
            config,
            kernel,
            services: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            ipsets: Ipsets::new(),
            lbs: DiffSet::new(),
            real_servers: DiffSet::new(),
            dummy,
            stats: SyncStats::default(),
        }
    }

    pub fn config(&self) -> &IpvsConfig {
        &self.config
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn ipsets(&self) -> &Ipsets {
        &self.ipsets
    }

    pub fn dummy_ips(&self) -> &DummyIps {
        &self.dummy
    }

    pub fn dummy_ref_count(&self, ip: &IpAddr) -> u32 {
        self.dummy.ref_count(ip)
    }

    /// Committed virtual servers, by key.
    pub fn lb_keys(&self) -> Vec<&str> {
        self.lbs.keys().map(String::as_str).collect()
    }

    /// Committed real servers, by key.
    pub fn real_server_keys(&self) -> Vec<&str> {
        self.real_servers.keys().map(String::as_str).collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Addresses bound on the dummy interface for `key`.
    fn programmed_ips(&self, key: &ServiceKey) -> IpSet {
        self.services
            .get(key)
            .filter(|svc| !svc.families().is_empty())
            .map(|svc| svc.ips.all())
            .unwrap_or_default()
    }

    /// Stages the kernel state of `key` for add or removal. Returns false if
    /// the service has nothing to program.
    fn stage_service(&mut self, key: &ServiceKey, stage: Stage) -> bool {
        let Some(service) = self.services.get(key) else {
            return true;
        };
        let endpoints: Vec<&EndpointInfo> = self
            .endpoints
            .get(key)
            .into_iter()
            .flat_map(|sources| sources.values().flatten())
            .collect();
        let Some(desired) = desired_state(service, &endpoints, &self.config) else {
            return false;
        };

        for (kind, family, entry) in desired.entries {
            let Some(set) = self.ipsets.get_mut(kind, family) else {
                continue;
            };
            match stage {
                Stage::Add => {
                    if let Err(e) = set.stage_add(key, entry) {
                        error!(ipset = set.name(), entry = %e.key, service = %key, "invalid ip-set entry, skipping");
                        self.stats.invalid_entries += 1;
                    }
                }
                Stage::Delete => set.stage_delete(key, &entry),
            }
        }

        for (lb_key, lb) in desired.lbs {
            match stage {
                Stage::Add => {
                    if let Err(e) = self.lbs.stage_add(lb_key, lb) {
                        error!(lb = %e.key, "invalid virtual server, skipping");
                    }
                }
                Stage::Delete => self.lbs.stage_delete(lb_key),
            }
        }

        for (rs_key, rs) in desired.real_servers {
            match stage {
                Stage::Add => {
                    if let Err(e) = self.real_servers.stage_add(rs_key, rs) {
                        error!(real_server = %e.key, "invalid real server, skipping");
                    }
                }
                Stage::Delete => self.real_servers.stage_delete(rs_key),
            }
        }

        true
    }

    /// Restages `key` around a change to its stored state. Returns whether
    /// the service has anything to program.
    fn restage<F>(&mut self, key: &ServiceKey, change: F) -> Result<bool, EngineError>
    where
        F: FnOnce(&mut Self),
    {
        let prev_ips = self.programmed_ips(key);
        self.stage_service(key, Stage::Delete);
        change(self);
        let programmed = self.stage_service(key, Stage::Add);
        let next_ips = self.programmed_ips(key);
        self.dummy.apply_diff(&prev_ips, &next_ips)?;
        Ok(programmed)
    }
}

#[async_trait]
impl<K: Kernel> Sink for Backend<K> {
    fn name(&self) -> &str {
        "ipvs"
    }

    async fn setup(&mut self) -> SinkResult<()> {
        let link = KernelOp::EnsureDummyLink {
            link: self.config.dummy_interface.clone(),
        };
        self.kernel.apply(&link).await.map_err(EngineError::Setup)?;

        for spec in self.ipsets.specs() {
            self.kernel
                .apply(&KernelOp::EnsureIpset(spec))
                .await
                .map_err(EngineError::Setup)?;
        }

        info!(
            link = %self.config.dummy_interface,
            scheduler = %self.config.scheduling_method,
            "ipvs sink ready"
        );
        Ok(())
    }

    fn set_service(&mut self, service: &Service) -> SinkResult<()> {
        let key = service.key();
        let service = service.clone();
        let programmed = self.restage(&key, |this| {
            this.services.insert(key.clone(), service);
        })?;
        if !programmed {
            warn!(service = %key, "service has no cluster IP family, not programming it");
            self.stats.skipped_services += 1;
        }
        Ok(())
    }

    fn delete_service(&mut self, key: &ServiceKey) -> SinkResult<()> {
        let prev_ips = self.programmed_ips(key);
        self.stage_service(key, Stage::Delete);
        self.services.remove(key);
        self.dummy.apply_diff(&prev_ips, &IpSet::new())?;
        Ok(())
    }

    fn set_endpoints(&mut self, source: &SourceKey, endpoints: &[EndpointInfo]) -> SinkResult<()> {
        let key = source.service_key();
        let endpoints = endpoints.to_vec();
        self.restage(&key, |this| {
            this.endpoints
                .entry(key.clone())
                .or_default()
                .insert(source.source_name.clone(), endpoints);
        })?;
        Ok(())
    }

    fn delete_endpoints(&mut self, source: &SourceKey) -> SinkResult<()> {
        let key = source.service_key();
        self.restage(&key, |this| {
            if let Some(sources) = this.endpoints.get_mut(&key) {
                sources.remove(&source.source_name);
                if sources.is_empty() {
                    this.endpoints.remove(&key);
                }
            }
        })?;
        Ok(())
    }

    async fn sync(&mut self) -> SinkResult<()> {
        let failures_before = self.stats.kernel_failures;
        let mut changes = 0usize;

        for set in self.ipsets.iter_mut() {
            let name = set.name();
            let committed = set.commit();
            changes += committed.len();

            for (key, entry) in committed.added.into_iter().chain(committed.updated) {
                let op = KernelOp::AddIpsetEntry {
                    set: name.to_string(),
                    entry: key.clone(),
                };
                if !apply_logged(&mut self.kernel, &mut self.stats, &op).await {
                    set.requeue_add(key, entry);
                }
            }
            for (key, entry) in committed.deleted {
                let op = KernelOp::DelIpsetEntry {
                    set: name.to_string(),
                    entry: key.clone(),
                };
                if !apply_logged(&mut self.kernel, &mut self.stats, &op).await {
                    set.requeue_delete(key, entry);
                }
            }
        }

        let lbs = self.lbs.commit();
        let real_servers = self.real_servers.commit();
        changes += lbs.len() + real_servers.len();

        for (key, lb) in lbs.added.into_iter().chain(lbs.updated) {
            let op = KernelOp::UpsertVirtualServer(lb.virtual_server());
            if !apply_logged(&mut self.kernel, &mut self.stats, &op).await {
                self.lbs.requeue_add(key, lb);
            }
        }

        for (key, rs) in real_servers.added.into_iter().chain(real_servers.updated) {
            let op = KernelOp::UpsertRealServer(rs.clone());
            if !apply_logged(&mut self.kernel, &mut self.stats, &op).await {
                self.real_servers.requeue_add(key, rs);
            }
        }
        for (key, rs) in real_servers.deleted {
            if self.real_servers.iter().any(|(_, other)| other.same_destination(&rs)) {
                debug!(real_server = %rs, "still used by another service, keeping");
                continue;
            }
            let op = KernelOp::DelRealServer(rs.clone());
            if !apply_logged(&mut self.kernel, &mut self.stats, &op).await {
                self.real_servers.requeue_delete(key, rs);
            }
        }

        for (key, lb) in lbs.deleted {
            let vs = lb.virtual_server();
            if self.lbs.iter().any(|(_, other)| other.virtual_server().same_service(&vs)) {
                debug!(virtual_server = %vs, "still used by another service, keeping");
                continue;
            }
            let op = KernelOp::DelVirtualServer(vs);
            if !apply_logged(&mut self.kernel, &mut self.stats, &op).await {
                self.lbs.requeue_delete(key, lb);
            }
        }

        let outcome = self.dummy.reconcile(&mut self.kernel).await;
        self.stats.kernel_ops += (outcome.bound + outcome.unbound + outcome.failed) as u64;
        self.stats.kernel_failures += outcome.failed as u64;
        self.stats.syncs += 1;

        let failures = self.stats.kernel_failures - failures_before;
        if changes == 0 && outcome == Default::default() {
            debug!("ipvs sync: nothing to do");
        } else {
            info!(
                changes,
                bound = outcome.bound,
                unbound = outcome.unbound,
                failures,
                virtual_servers = self.lbs.len(),
                real_servers = self.real_servers.len(),
                "ipvs sync complete"
            );
        }
        Ok(())
    }

    fn reset(&mut self) {
        debug!(services = self.services.len(), "resetting ipvs state");
        self.services.clear();
        self.endpoints.clear();
        self.ipsets.reset();
        self.lbs.rollback();
        self.lbs.stage_delete_all();
        self.real_servers.rollback();
        self.real_servers.stage_delete_all();
        self.dummy.reset();
    }
}
