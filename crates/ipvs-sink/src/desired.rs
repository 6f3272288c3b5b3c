//! Kernel state a single service calls for.

use crate::config::IpvsConfig;
use crate::ipset::{Entry, SetKind};
use crate::lb::{real_server_key, IpvsLb, RealServer};
use kpng_types::{EndpointInfo, IpFamily, Service};

#[derive(Debug, Default)]
pub(crate) struct Desired {
    pub entries: Vec<(SetKind, IpFamily, Entry)>,
    pub lbs: Vec<(String, IpvsLb)>,
    pub real_servers: Vec<(String, RealServer)>,
}

/// Derives everything `service` needs from the kernel, given the
/// endpoints currently known for it.
///
/// Returns `None` for a service with no cluster IP: it has no family to
/// program.
pub(crate) fn desired_state(
    service: &Service,
    endpoints: &[&EndpointInfo],
    config: &IpvsConfig,
) -> Option<Desired> {
    let families = service.families();
    if families.is_empty() {
        return None;
    }

    let key = service.key();
    let ready: Vec<&EndpointInfo> = endpoints.iter().copied().filter(|ep| ep.ready).collect();
    let addresses = service.ips.all();
    let mut desired = Desired::default();

    for port in &service.ports {
        for &family in &families {
            if let Some(ip) = service.ips.cluster_ips.first(family) {
                desired.entries.push((
                    SetKind::ClusterIp,
                    family,
                    Entry::cluster_ip(ip, port.port, port.protocol),
                ));
            }
        }

        let target_port = port.effective_target_port();
        for ep in &ready {
            for ip in ep.ips.iter() {
                desired.entries.push((
                    SetKind::Loopback,
                    IpFamily::of(ip),
                    Entry::loopback(*ip, target_port, port.protocol),
                ));
            }
        }

        for ip in addresses.iter() {
            let lb = IpvsLb {
                ip: *ip,
                service_key: key.clone(),
                port: port.clone(),
                scheduling_method: config.scheduling_method.clone(),
                service_type: service.service_type,
            };
            let lb_key = lb.key();
            let virtual_server = lb.virtual_server();

            for ep in &ready {
                for ep_ip in ep.ips_of(IpFamily::of(ip)) {
                    let real_server = RealServer {
                        virtual_server: virtual_server.clone(),
                        address: *ep_ip,
                        port: target_port,
                        weight: config.weight,
                        masquerade: config.masquerade,
                    };
                    desired
                        .real_servers
                        .push((real_server_key(&lb_key, ep_ip, target_port), real_server));
                }
            }
            desired.lbs.push((lb_key, lb));
        }
    }

    Some(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpng_types::{PortMapping, Protocol, SourceKey};
    use pretty_assertions::assert_eq;

    fn service(ips: &[&str]) -> Service {
        let mut svc = Service::new("ns", "svc1");
        svc.ips.cluster_ips = ips.iter().map(|s| s.parse().unwrap()).collect();
        svc.ports = vec![PortMapping::new(Protocol::Tcp, 80, 8080)];
        svc
    }

    fn endpoint(ips: &[&str], ready: bool) -> EndpointInfo {
        let mut ep = EndpointInfo::new(&SourceKey::new("ns", "svc1", "svc1-abcde"));
        ep.ips = ips.iter().map(|s| s.parse().unwrap()).collect();
        ep.ready = ready;
        ep
    }

    fn entry_strings(desired: &Desired, kind: SetKind) -> Vec<String> {
        desired
            .entries
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, e)| e.to_string())
            .collect()
    }

    #[test]
    fn test_single_stack_service() {
        let ep = endpoint(&["10.1.2.3"], true);
        let desired = desired_state(&service(&["10.0.0.5"]), &[&ep], &IpvsConfig::default()).unwrap();

        assert_eq!(entry_strings(&desired, SetKind::ClusterIp), vec!["10.0.0.5,tcp:80"]);
        assert_eq!(
            entry_strings(&desired, SetKind::Loopback),
            vec!["10.1.2.3,tcp:8080,10.1.2.3"]
        );
        assert_eq!(desired.lbs.len(), 1);
        assert_eq!(desired.lbs[0].0, "ns/svc1/10.0.0.5/80-TCP");
        assert_eq!(desired.real_servers.len(), 1);
        assert_eq!(desired.real_servers[0].0, "ns/svc1/10.0.0.5/80-TCP/10.1.2.3:8080");
        assert_eq!(desired.real_servers[0].1.port, 8080);
    }

    #[test]
    fn test_headless_service_has_no_state() {
        assert!(desired_state(&service(&[]), &[], &IpvsConfig::default()).is_none());
    }

    #[test]
    fn test_unready_endpoints_are_left_out() {
        let ep = endpoint(&["10.1.2.3"], false);
        let desired = desired_state(&service(&["10.0.0.5"]), &[&ep], &IpvsConfig::default()).unwrap();

        assert!(entry_strings(&desired, SetKind::Loopback).is_empty());
        assert!(desired.real_servers.is_empty());
        assert_eq!(desired.lbs.len(), 1);
    }

    #[test]
    fn test_dual_stack_matches_families() {
        let ep = endpoint(&["10.1.2.3", "fd00::1:2"], true);
        let desired =
            desired_state(&service(&["10.0.0.5", "fd00::5"]), &[&ep], &IpvsConfig::default()).unwrap();

        let families: Vec<IpFamily> = desired
            .entries
            .iter()
            .filter(|(k, _, _)| *k == SetKind::ClusterIp)
            .map(|(_, f, _)| *f)
            .collect();
        assert_eq!(families, vec![IpFamily::V4, IpFamily::V6]);

        let rs: Vec<&str> = desired.real_servers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            rs,
            vec![
                "ns/svc1/10.0.0.5/80-TCP/10.1.2.3:8080",
                "ns/svc1/fd00::5/80-TCP/[fd00::1:2]:8080"
            ]
        );
    }

    #[test]
    fn test_external_ips_get_virtual_servers() {
        let mut svc = service(&["10.0.0.5"]);
        svc.ips.external_ips.insert("192.0.2.10".parse().unwrap());
        svc.ports[0].target_port = 0;

        let desired = desired_state(&svc, &[], &IpvsConfig::default()).unwrap();
        let keys: Vec<&str> = desired.lbs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["ns/svc1/10.0.0.5/80-TCP", "ns/svc1/192.0.2.10/80-TCP"]);
        assert_eq!(entry_strings(&desired, SetKind::ClusterIp), vec!["10.0.0.5,tcp:80"]);
    }
}
