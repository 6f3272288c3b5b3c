//! Behavioural properties of the whole pipeline

use ipvs_sink::{IpvsConfig, KernelOp, KUBE_6_CLUSTER_IP, KUBE_CLUSTER_IP, KUBE_LOOP_BACK};
use kpng_test::{events, scenario, KernelSnapshot, KernelVerifier, PipelineEnv, ServiceBuilder, SliceBuilder};
use kube2store::{IngestConfig, KubeEvent};
use pretty_assertions::assert_eq;
use proxystore::StoreConfig;
use std::net::IpAddr;

const LINK: &str = "kube-ipvs0";

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

async fn synced_env() -> PipelineEnv {
    let mut env = PipelineEnv::start().await.unwrap();
    env.mark_synced().unwrap();
    env.settle().await.unwrap();
    env
}

/// A mix of adds, updates and deletes across two services.
fn history() -> Vec<KubeEvent> {
    let web_v1 = ServiceBuilder::new("ns", "web")
        .cluster_ip("10.0.0.7")
        .cluster_ip("fd00::7")
        .port("TCP", 80, 8080)
        .build();
    let web_v2 = ServiceBuilder::new("ns", "web")
        .cluster_ip("10.0.0.7")
        .cluster_ip("fd00::7")
        .external_ip("192.0.2.10")
        .port("TCP", 80, 8080)
        .port("UDP", 53, 5353)
        .build();
    let web_a_v1 = SliceBuilder::new("ns", "web-a", "web")
        .endpoint("10.1.0.1")
        .endpoint("10.1.0.2")
        .build();
    let web_a_v2 = SliceBuilder::new("ns", "web-a", "web").endpoint("10.1.0.3").build();
    let web_b = SliceBuilder::new("ns", "web-b", "web").endpoint("fd00::1:4").build();
    let gone = ServiceBuilder::new("ns", "gone")
        .cluster_ip("10.0.0.99")
        .port("TCP", 9000, 0)
        .build();

    vec![
        events::service_added(scenario::svc1()),
        events::service_added(web_v1.clone()),
        events::service_added(gone.clone()),
        events::slice_added(web_a_v1.clone()),
        events::slice_added(scenario::svc1_slice()),
        events::service_updated(web_v1, web_v2),
        events::slice_added(web_b),
        events::slice_updated(web_a_v1, web_a_v2),
        events::service_deleted(gone),
    ]
}

#[tokio::test]
async fn test_address_families_follow_cluster_ips() {
    let mut env = synced_env().await;
    let v4 = ServiceBuilder::new("ns", "v4").cluster_ip("10.0.0.1").port("TCP", 80, 0).build();
    let v6 = ServiceBuilder::new("ns", "v6").cluster_ip("fd00::1").port("TCP", 80, 0).build();
    let dual = ServiceBuilder::new("ns", "dual")
        .cluster_ip("10.0.0.2")
        .cluster_ip("fd00::2")
        .port("TCP", 80, 0)
        .build();

    env.apply([v4, v6, dual].map(events::service_added)).await.unwrap();

    let kernel = env.kernel();
    assert_eq!(
        kernel.ipset_entries(KUBE_CLUSTER_IP),
        vec!["10.0.0.1,tcp:80", "10.0.0.2,tcp:80"]
    );
    assert_eq!(
        kernel.ipset_entries(KUBE_6_CLUSTER_IP),
        vec!["fd00::1,tcp:80", "fd00::2,tcp:80"]
    );
    assert_eq!(env.backend().stats().skipped_services, 0);
}

#[tokio::test]
async fn test_service_without_cluster_ip_is_skipped() {
    let mut env = synced_env().await;
    let headless = ServiceBuilder::new("ns", "headless").headless().port("TCP", 80, 0).build();
    let slice = SliceBuilder::new("ns", "headless-1", "headless").endpoint("10.1.0.1").build();

    env.apply([events::service_added(headless), events::slice_added(slice)])
        .await
        .unwrap();

    assert_eq!(env.backend().stats().skipped_services, 1);
    assert!(env.backend().lb_keys().is_empty());
    assert!(KernelSnapshot::capture(env.kernel(), LINK).is_empty());
}

#[tokio::test]
async fn test_repeated_add_is_idempotent() {
    let mut env = synced_env().await;
    env.apply([events::service_added(scenario::svc1())]).await.unwrap();
    let before = KernelSnapshot::capture(env.kernel(), LINK);
    env.kernel_mut().take_ops();

    let applied = env
        .apply([events::service_added(scenario::svc1()), events::service_added(scenario::svc1())])
        .await
        .unwrap();

    assert_eq!(applied, 0);
    assert!(env.kernel().ops().is_empty());
    assert_eq!(KernelSnapshot::capture(env.kernel(), LINK), before);
}

/// Scenario:
/// 1. Service A and service B share cluster IP 10.0.0.1
/// 2. Removing A keeps the address bound and the shared virtual server
/// 3. Removing B unbinds the address
#[tokio::test]
async fn test_shared_cluster_ip_reference_counts() {
    let mut env = synced_env().await;
    let a = ServiceBuilder::new("ns", "a").cluster_ip("10.0.0.1").port("TCP", 80, 0).build();
    let b = ServiceBuilder::new("ns", "b").cluster_ip("10.0.0.1").port("TCP", 80, 0).build();
    let vip = ip("10.0.0.1");

    env.apply([events::service_added(a.clone())]).await.unwrap();
    env.apply([events::service_added(b.clone())]).await.unwrap();
    assert_eq!(env.backend().dummy_ref_count(&vip), 2);

    env.kernel_mut().take_ops();
    env.apply([events::service_deleted(a)]).await.unwrap();
    assert_eq!(env.backend().dummy_ref_count(&vip), 1);
    assert!(!env
        .kernel()
        .ops()
        .iter()
        .any(|op| matches!(op, KernelOp::DelInterfaceAddr { .. })));
    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_bound(vip).unwrap();
    verifier.assert_virtual_server("TCP:10.0.0.1:80").unwrap();
    verifier.assert_ipset_contains(KUBE_CLUSTER_IP, "10.0.0.1,tcp:80").unwrap();

    env.apply([events::service_deleted(b)]).await.unwrap();
    assert_eq!(env.backend().dummy_ref_count(&vip), 0);
    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_unbound(vip).unwrap();
    verifier.assert_no_virtual_server("TCP:10.0.0.1:80").unwrap();
    verifier.assert_ipset_lacks(KUBE_CLUSTER_IP, "10.0.0.1,tcp:80").unwrap();
}

#[tokio::test]
async fn test_bootstrap_matches_incremental_history() {
    let mut incremental = synced_env().await;
    for event in history() {
        incremental.apply([event]).await.unwrap();
    }

    let mut bootstrapped = PipelineEnv::start().await.unwrap();
    bootstrapped.handle_all(history()).unwrap();
    bootstrapped.mark_synced().unwrap();
    assert_eq!(bootstrapped.settle().await.unwrap(), 1);

    let expected = KernelSnapshot::capture(incremental.kernel(), LINK);
    assert!(!expected.is_empty());
    assert_eq!(KernelSnapshot::capture(bootstrapped.kernel(), LINK), expected);
    assert_eq!(bootstrapped.backend().lb_keys(), incremental.backend().lb_keys());
    assert_eq!(
        bootstrapped.backend().real_server_keys(),
        incremental.backend().real_server_keys()
    );
}

#[tokio::test]
async fn test_consumer_behind_history_is_bootstrapped() {
    let store = StoreConfig {
        history_generations: 1,
        ..Default::default()
    };
    let mut env = PipelineEnv::with_config(store, IngestConfig::default(), IpvsConfig::default())
        .await
        .unwrap();
    env.mark_synced().unwrap();
    env.apply([events::service_added(scenario::svc1())]).await.unwrap();

    // several generations land before the engine catches up
    env.handle_all(history()).unwrap();
    env.kernel_mut().take_ops();
    assert_eq!(env.settle().await.unwrap(), 1);

    let mut reference = PipelineEnv::start().await.unwrap();
    reference.handle_all(history()).unwrap();
    reference.mark_synced().unwrap();
    reference.settle().await.unwrap();

    assert_eq!(
        KernelSnapshot::capture(env.kernel(), LINK),
        KernelSnapshot::capture(reference.kernel(), LINK)
    );
    // svc1 was already programmed, the bootstrap leaves it alone
    let vip = ip("10.0.0.5");
    assert!(!env.kernel().ops().iter().any(|op| match op {
        KernelOp::UpsertVirtualServer(vs) | KernelOp::DelVirtualServer(vs) => vs.address == vip,
        KernelOp::AddInterfaceAddr { addr, .. } | KernelOp::DelInterfaceAddr { addr, .. } => *addr.address() == vip,
        _ => false,
    }));
}

#[tokio::test]
async fn test_endpoint_batch_is_replaced_wholesale() {
    let mut env = synced_env().await;
    let v1 = SliceBuilder::new("ns", "svc1-abcde", "svc1")
        .endpoint("10.1.2.1")
        .endpoint("10.1.2.2")
        .build();
    let v2 = SliceBuilder::new("ns", "svc1-abcde", "svc1").endpoint("10.1.2.3").build();

    env.apply([events::service_added(scenario::svc1()), events::slice_added(v1.clone())])
        .await
        .unwrap();
    KernelVerifier::new(env.kernel())
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.1:8080", "10.1.2.2:8080"])
        .unwrap();

    env.apply([events::slice_updated(v1, v2)]).await.unwrap();

    KernelVerifier::new(env.kernel())
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.3:8080"])
        .unwrap();
    assert_eq!(
        env.kernel().ipset_entries(KUBE_LOOP_BACK),
        vec!["10.1.2.3,tcp:8080,10.1.2.3"]
    );
}

/// Retargeting a port moves the kernel destination instead of adding a
/// second one, and ends where a fresh bootstrap would.
#[tokio::test]
async fn test_target_port_change_moves_destination() {
    let retargeted = ServiceBuilder::new("ns", "svc1")
        .cluster_ip("10.0.0.5")
        .port("TCP", 80, 9090)
        .build();

    let mut env = synced_env().await;
    env.apply([events::service_added(scenario::svc1()), events::slice_added(scenario::svc1_slice())])
        .await
        .unwrap();
    env.apply([events::service_updated(scenario::svc1(), retargeted.clone())])
        .await
        .unwrap();

    KernelVerifier::new(env.kernel())
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.3:9090"])
        .unwrap();
    assert_eq!(
        env.kernel().ipset_entries(KUBE_LOOP_BACK),
        vec!["10.1.2.3,tcp:9090,10.1.2.3"]
    );

    let mut reference = PipelineEnv::start().await.unwrap();
    reference
        .handle_all([events::service_added(retargeted), events::slice_added(scenario::svc1_slice())])
        .unwrap();
    reference.mark_synced().unwrap();
    reference.settle().await.unwrap();

    assert_eq!(
        KernelSnapshot::capture(env.kernel(), LINK),
        KernelSnapshot::capture(reference.kernel(), LINK)
    );
}

#[tokio::test]
async fn test_failed_kernel_operations_are_retried_next_generation() {
    let mut env = synced_env().await;
    env.kernel_mut()
        .fail_when(|op| matches!(op, KernelOp::UpsertVirtualServer(_)));

    env.apply([
        events::service_added(scenario::svc1()),
        events::slice_added(scenario::svc1_slice()),
    ])
    .await
    .unwrap();
    assert!(env.backend().stats().kernel_failures > 0);
    KernelVerifier::new(env.kernel())
        .assert_no_virtual_server("TCP:10.0.0.5:80")
        .unwrap();

    env.kernel_mut().clear_failures();
    let other = ServiceBuilder::new("ns", "other").cluster_ip("10.0.0.6").port("TCP", 80, 0).build();
    env.apply([events::service_added(other)]).await.unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_virtual_server("TCP:10.0.0.5:80").unwrap();
    verifier
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.3:8080"])
        .unwrap();
    verifier.assert_virtual_server("TCP:10.0.0.6:80").unwrap();
}
