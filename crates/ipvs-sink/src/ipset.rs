//! Kernel ip-set membership.
//!
//! Four sets are maintained: one cluster-IP set and one loopback set per
//! address family. Membership is staged per service and committed once per
//! generation. An entry may be wanted by more than one service (two
//! services selecting the same pods on the same port); it stays in the set
//! until its last owner lets go.

use kpng_sync_common::{Committed, DiffSet, InvalidEntry};
use kpng_types::{IpFamily, Protocol, ServiceKey};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

/// Cluster IP and port of every IPv4 service port.
pub const KUBE_CLUSTER_IP: &str = "KUBE-CLUSTER-IP";
/// IPv4 endpoints that may reach themselves through a service (hairpin).
pub const KUBE_LOOP_BACK: &str = "KUBE-LOOP-BACK";
/// IPv6 counterpart of [`KUBE_CLUSTER_IP`].
pub const KUBE_6_CLUSTER_IP: &str = "KUBE-6-CLUSTER-IP";
/// IPv6 counterpart of [`KUBE_LOOP_BACK`].
pub const KUBE_6_LOOP_BACK: &str = "KUBE-6-LOOP-BACK";

/// Kernel storage type of an ip-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetType {
    /// `hash:ip,port`
    HashIpPort,
    /// `hash:ip,port,ip`
    HashIpPortIp,
}

impl SetType {
    /// Type name as `ipset create` takes it.
    pub fn as_str(&self) -> &'static str {
        match self {
            SetType::HashIpPort => "hash:ip,port",
            SetType::HashIpPortIp => "hash:ip,port,ip",
        }
    }
}

impl fmt::Display for SetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a set is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetKind {
    /// Cluster IP and port, for masquerading.
    ClusterIp,
    /// Endpoint IP, port and the same IP again, for hairpin traffic.
    Loopback,
}

/// Everything needed to create one ip-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpsetSpec {
    pub name: &'static str,
    pub set_type: SetType,
    pub family: IpFamily,
    pub comment: &'static str,
}

impl IpsetSpec {
    /// The set holding `kind` entries for `family`.
    pub fn of(kind: SetKind, family: IpFamily) -> Self {
        match (kind, family) {
            (SetKind::ClusterIp, IpFamily::V4) => Self::cluster_ip(KUBE_CLUSTER_IP, family),
            (SetKind::ClusterIp, IpFamily::V6) => Self::cluster_ip(KUBE_6_CLUSTER_IP, family),
            (SetKind::Loopback, IpFamily::V4) => Self::loopback(KUBE_LOOP_BACK, family),
            (SetKind::Loopback, IpFamily::V6) => Self::loopback(KUBE_6_LOOP_BACK, family),
        }
    }

    fn cluster_ip(name: &'static str, family: IpFamily) -> Self {
        Self {
            name,
            set_type: SetType::HashIpPort,
            family,
            comment: "Kubernetes service cluster ip + port for masquerade purpose",
        }
    }

    fn loopback(name: &'static str, family: IpFamily) -> Self {
        Self {
            name,
            set_type: SetType::HashIpPortIp,
            family,
            comment: "Kubernetes endpoints dst ip:port, source ip for solving hairpin purpose",
        }
    }
}

/// One ip-set member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entry {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    /// Second address, only for `hash:ip,port,ip` sets.
    pub ip2: Option<IpAddr>,
    pub set_type: SetType,
}

impl Entry {
    /// `10.0.0.5,tcp:80` for a service's cluster IP and port.
    pub fn cluster_ip(ip: IpAddr, port: u16, protocol: Protocol) -> Self {
        Self {
            ip,
            port,
            protocol,
            ip2: None,
            set_type: SetType::HashIpPort,
        }
    }

    /// `10.1.2.3,tcp:8080,10.1.2.3` for an endpoint reaching itself.
    pub fn loopback(ip: IpAddr, port: u16, protocol: Protocol) -> Self {
        Self {
            ip,
            port,
            protocol,
            ip2: Some(ip),
            set_type: SetType::HashIpPortIp,
        }
    }

    /// Checks the entry fits a set: same type, same family, a real port.
    pub fn is_valid_for(&self, spec: &IpsetSpec) -> bool {
        if self.set_type != spec.set_type || IpFamily::of(&self.ip) != spec.family || self.port == 0 {
            return false;
        }
        match (self.set_type, self.ip2) {
            (SetType::HashIpPort, None) => true,
            (SetType::HashIpPortIp, Some(ip2)) => IpFamily::of(&ip2) == spec.family,
            _ => false,
        }
    }
}

/// `ipset` member syntax: `10.0.0.5,tcp:80` or `10.1.2.3,tcp:8080,10.1.2.3`.
impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}:{}", self.ip, self.protocol.as_lower(), self.port)?;
        if let Some(ip2) = self.ip2 {
            write!(f, ",{}", ip2)?;
        }
        Ok(())
    }
}

/// Desired and committed membership of one kernel ip-set.
#[derive(Debug)]
pub struct Ipset {
    spec: IpsetSpec,
    owners: BTreeMap<String, BTreeSet<ServiceKey>>,
    entries: DiffSet<String, Entry>,
}

impl Ipset {
    /// An empty set; entries that do not fit `spec` are rejected.
    pub fn new(spec: IpsetSpec) -> Self {
        Self {
            spec,
            owners: BTreeMap::new(),
            entries: DiffSet::with_validator(move |entry: &Entry| entry.is_valid_for(&spec)),
        }
    }

    pub fn spec(&self) -> &IpsetSpec {
        &self.spec
    }

    /// Kernel name of the set.
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Records `owner` as wanting `entry` in the set.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEntry`] if the entry does not fit this set; nothing
    /// is recorded.
    pub fn stage_add(&mut self, owner: &ServiceKey, entry: Entry) -> Result<(), InvalidEntry> {
        let key = entry.to_string();
        self.entries.stage_add(key.clone(), entry)?;
        self.owners.entry(key).or_default().insert(owner.clone());
        Ok(())
    }

    /// Drops `owner`'s claim on `entry`; the entry leaves the set with its
    /// last owner.
    pub fn stage_delete(&mut self, owner: &ServiceKey, entry: &Entry) {
        let key = entry.to_string();
        let Some(owners) = self.owners.get_mut(&key) else {
            return;
        };
        owners.remove(owner);
        if owners.is_empty() {
            self.owners.remove(&key);
            self.entries.stage_delete(key);
        }
    }

    /// Promotes staged changes and returns the entries to add and remove.
    pub fn commit(&mut self) -> Committed<String, Entry> {
        self.entries.commit()
    }

    /// Stages `entry` again after the kernel rejected its insert.
    pub fn requeue_add(&mut self, key: String, entry: Entry) {
        self.entries.requeue_add(key, entry);
    }

    /// Stages removal again after the kernel rejected it.
    pub fn requeue_delete(&mut self, key: String, entry: Entry) {
        self.entries.requeue_delete(key, entry);
    }

    /// Forgets every owner and stages removal of every committed entry.
    pub fn reset(&mut self) {
        self.owners.clear();
        self.entries.rollback();
        self.entries.stage_delete_all();
    }

    /// Committed members, in `ipset` syntax.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `entry` is a committed member.
    pub fn contains(&self, entry: &Entry) -> bool {
        self.entries.contains_key(&entry.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The four sets, by kind and family.
#[derive(Debug)]
pub struct Ipsets {
    sets: BTreeMap<(SetKind, IpFamily), Ipset>,
}

impl Ipsets {
    pub fn new() -> Self {
        let sets = [SetKind::ClusterIp, SetKind::Loopback]
            .into_iter()
            .flat_map(|kind| IpFamily::ALL.into_iter().map(move |family| (kind, family)))
            .map(|(kind, family)| ((kind, family), Ipset::new(IpsetSpec::of(kind, family))))
            .collect();
        Self { sets }
    }

    pub fn get(&self, kind: SetKind, family: IpFamily) -> Option<&Ipset> {
        self.sets.get(&(kind, family))
    }

    pub fn get_mut(&mut self, kind: SetKind, family: IpFamily) -> Option<&mut Ipset> {
        self.sets.get_mut(&(kind, family))
    }

    /// Looks a set up by its kernel name, e.g. [`KUBE_LOOP_BACK`].
    pub fn by_name(&self, name: &str) -> Option<&Ipset> {
        self.sets.values().find(|set| set.name() == name)
    }

    /// Specs of all four sets, for creating them at setup.
    pub fn specs(&self) -> Vec<IpsetSpec> {
        self.sets.values().map(|set| set.spec).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ipset> {
        self.sets.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ipset> {
        self.sets.values_mut()
    }

    /// Resets every set; see [`Ipset::reset`].
    pub fn reset(&mut self) {
        self.sets.values_mut().for_each(Ipset::reset);
    }
}

impl Default for Ipsets {
    fn default() -> Self {
        Self::new()
    }
}
