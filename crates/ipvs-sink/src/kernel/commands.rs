//! Command builders for `ip`, `ipset` and `ipvsadm`.

use super::shell::{shellquote, IPSET_CMD, IPVSADM_CMD, IP_CMD};
use crate::ipset::IpsetSpec;
use crate::lb::{RealServer, VirtualServer};
use kpng_types::{IpFamily, IpPrefix, Protocol};

fn ip_cmd_for(family: IpFamily) -> String {
    match family {
        IpFamily::V4 => IP_CMD.to_string(),
        IpFamily::V6 => format!("{} -6", IP_CMD),
    }
}

fn ipset_family(family: IpFamily) -> &'static str {
    match family {
        IpFamily::V4 => "inet",
        IpFamily::V6 => "inet6",
    }
}

/// `-t 10.0.0.5:80`, `-u [fd00::5]:53`, `--sctp-service ...`
fn service_arg(vs: &VirtualServer) -> String {
    let flag = match vs.protocol {
        Protocol::Tcp => "-t",
        Protocol::Udp => "-u",
        Protocol::Sctp => "--sctp-service",
    };
    format!("{} {}", flag, vs.socket_addr())
}

pub fn build_ensure_dummy_link_cmd(link: &str) -> String {
    let link = shellquote(link);
    format!(
        "{ip} link show {link} >/dev/null 2>&1 || {ip} link add {link} type dummy",
        ip = IP_CMD,
        link = link
    )
}

pub fn build_add_addr_cmd(link: &str, addr: &IpPrefix) -> String {
    format!(
        "{} address add {} dev {}",
        ip_cmd_for(addr.family()),
        addr,
        shellquote(link)
    )
}

pub fn build_del_addr_cmd(link: &str, addr: &IpPrefix) -> String {
    format!(
        "{} address del {} dev {}",
        ip_cmd_for(addr.family()),
        addr,
        shellquote(link)
    )
}

pub fn build_ensure_ipset_cmd(spec: &IpsetSpec) -> String {
    format!(
        "{} create {} {} family {} comment -exist",
        IPSET_CMD,
        shellquote(spec.name),
        spec.set_type,
        ipset_family(spec.family)
    )
}

pub fn build_add_ipset_entry_cmd(set: &str, entry: &str) -> String {
    format!("{} add {} {} -exist", IPSET_CMD, shellquote(set), shellquote(entry))
}

pub fn build_del_ipset_entry_cmd(set: &str, entry: &str) -> String {
    format!("{} del {} {} -exist", IPSET_CMD, shellquote(set), shellquote(entry))
}

pub fn build_upsert_virtual_server_cmd(vs: &VirtualServer) -> String {
    let service = service_arg(vs);
    let scheduler = shellquote(&vs.scheduler);
    format!(
        "{cmd} -A {service} -s {scheduler} 2>/dev/null || {cmd} -E {service} -s {scheduler}",
        cmd = IPVSADM_CMD,
        service = service,
        scheduler = scheduler
    )
}

pub fn build_del_virtual_server_cmd(vs: &VirtualServer) -> String {
    format!("{} -D {}", IPVSADM_CMD, service_arg(vs))
}

pub fn build_upsert_real_server_cmd(rs: &RealServer) -> String {
    let service = service_arg(&rs.virtual_server);
    let forwarding = if rs.masquerade { "-m" } else { "-g" };
    let real = format!(
        "-r {} {} -w {}",
        rs.socket_addr(),
        forwarding,
        rs.weight
    );
    format!(
        "{cmd} -a {service} {real} 2>/dev/null || {cmd} -e {service} {real}",
        cmd = IPVSADM_CMD,
        service = service,
        real = real
    )
}

pub fn build_del_real_server_cmd(rs: &RealServer) -> String {
    format!(
        "{} -d {} -r {}",
        IPVSADM_CMD,
        service_arg(&rs.virtual_server),
        rs.socket_addr()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipset::SetKind;

    fn vs(addr: &str, protocol: Protocol) -> VirtualServer {
        VirtualServer {
            address: addr.parse().unwrap(),
            port: 80,
            protocol,
            scheduler: "rr".into(),
        }
    }

    #[test]
    fn test_build_dummy_link_cmd() {
        let cmd = build_ensure_dummy_link_cmd("kube-ipvs0");
        assert!(cmd.contains("link show \"kube-ipvs0\""));
        assert!(cmd.contains("|| /sbin/ip link add \"kube-ipvs0\" type dummy"));
    }

    #[test]
    fn test_build_addr_cmds() {
        let v4: IpPrefix = "10.0.0.5/32".parse().unwrap();
        assert_eq!(
            build_add_addr_cmd("kube-ipvs0", &v4),
            "/sbin/ip address add 10.0.0.5/32 dev \"kube-ipvs0\""
        );

        let v6: IpPrefix = "fd00::5/128".parse().unwrap();
        let cmd = build_del_addr_cmd("kube-ipvs0", &v6);
        assert!(cmd.starts_with("/sbin/ip -6 address del fd00::5/128"));
    }

    #[test]
    fn test_build_ipset_cmds() {
        let cmd = build_ensure_ipset_cmd(&IpsetSpec::of(SetKind::Loopback, IpFamily::V6));
        assert!(cmd.contains("create \"KUBE-6-LOOP-BACK\" hash:ip,port,ip family inet6"));
        assert!(cmd.ends_with("-exist"));

        let cmd = build_add_ipset_entry_cmd("KUBE-CLUSTER-IP", "10.0.0.5,tcp:80");
        assert_eq!(
            cmd,
            "/sbin/ipset add \"KUBE-CLUSTER-IP\" \"10.0.0.5,tcp:80\" -exist"
        );
        assert!(build_del_ipset_entry_cmd("KUBE-CLUSTER-IP", "10.0.0.5,tcp:80").contains(" del "));
    }

    #[test]
    fn test_build_virtual_server_cmds() {
        let cmd = build_upsert_virtual_server_cmd(&vs("10.0.0.5", Protocol::Tcp));
        assert!(cmd.contains("-A -t 10.0.0.5:80 -s \"rr\""));
        assert!(cmd.contains("|| /sbin/ipvsadm -E -t 10.0.0.5:80"));

        let cmd = build_del_virtual_server_cmd(&vs("fd00::5", Protocol::Udp));
        assert_eq!(cmd, "/sbin/ipvsadm -D -u [fd00::5]:80");

        let cmd = build_del_virtual_server_cmd(&vs("10.0.0.5", Protocol::Sctp));
        assert!(cmd.contains("--sctp-service 10.0.0.5:80"));
    }

    #[test]
    fn test_build_real_server_cmds() {
        let rs = RealServer {
            virtual_server: vs("10.0.0.5", Protocol::Tcp),
            address: "10.1.2.3".parse().unwrap(),
            port: 8080,
            weight: 1,
            masquerade: true,
        };
        let cmd = build_upsert_real_server_cmd(&rs);
        assert!(cmd.contains("-a -t 10.0.0.5:80 -r 10.1.2.3:8080 -m -w 1"));
        assert!(cmd.contains("|| /sbin/ipvsadm -e -t 10.0.0.5:80"));

        assert_eq!(
            build_del_real_server_cmd(&rs),
            "/sbin/ipvsadm -d -t 10.0.0.5:80 -r 10.1.2.3:8080"
        );
    }
}
