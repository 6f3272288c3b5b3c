//! End-to-end pipeline tests
//!
//! Raw watch events through ingestion, the store, the diff feed and the
//! IPVS engine into the in-memory kernel.

use ipvs_sink::{IpvsConfig, KernelOp, KUBE_CLUSTER_IP, KUBE_LOOP_BACK};
use kpng_test::{
    events, scenario, watch_record, KernelSnapshot, KernelVerifier, PipelineEnv, ServiceBuilder, SliceBuilder,
};
use kube2store::{IngestConfig, JsonLinesSource, Job};
use pretty_assertions::assert_eq;
use proxystore::StoreConfig;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

async fn synced_env() -> PipelineEnv {
    let mut env = PipelineEnv::start().await.unwrap();
    env.mark_synced().unwrap();
    env.settle().await.unwrap();
    env
}

/// Scenario:
/// 1. Add ns/svc1 on 10.0.0.5:80/TCP targeting 8080
/// 2. Publish one ready endpoint 10.1.2.3 from svc1-abcde
/// 3. Verify both ip-sets, the virtual server and the dummy binding
#[tokio::test]
async fn test_service_with_endpoint() {
    let mut env = synced_env().await;

    env.apply([
        events::service_added(scenario::svc1()),
        events::slice_added(scenario::svc1_slice()),
    ])
    .await
    .unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_ipset_contains(KUBE_CLUSTER_IP, "10.0.0.5,tcp:80").unwrap();
    verifier
        .assert_ipset_contains(KUBE_LOOP_BACK, "10.1.2.3,tcp:8080,10.1.2.3")
        .unwrap();
    verifier.assert_virtual_server("TCP:10.0.0.5:80").unwrap();
    verifier
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.3:8080"])
        .unwrap();
    verifier.assert_bound(ip("10.0.0.5")).unwrap();

    assert_eq!(env.backend().lb_keys(), vec!["ns/svc1/10.0.0.5/80-TCP"]);
    assert_eq!(env.backend().dummy_ref_count(&ip("10.0.0.5")), 1);

    let binds: Vec<String> = env
        .kernel()
        .ops()
        .iter()
        .filter_map(|op| match op {
            KernelOp::AddInterfaceAddr { link, addr } => Some(format!("{} {}", link, addr)),
            _ => None,
        })
        .collect();
    assert_eq!(binds, vec!["kube-ipvs0 10.0.0.5/32"]);
}

/// Scenario:
/// 1. Program the single service scenario
/// 2. Delete the service
/// 3. Verify virtual server, ip-set entries and binding are gone
#[tokio::test]
async fn test_service_deletion() {
    let mut env = synced_env().await;
    env.apply([
        events::service_added(scenario::svc1()),
        events::slice_added(scenario::svc1_slice()),
    ])
    .await
    .unwrap();

    env.apply([events::service_deleted(scenario::svc1())]).await.unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_no_virtual_server("TCP:10.0.0.5:80").unwrap();
    verifier.assert_ipset_lacks(KUBE_CLUSTER_IP, "10.0.0.5,tcp:80").unwrap();
    verifier
        .assert_ipset_lacks(KUBE_LOOP_BACK, "10.1.2.3,tcp:8080,10.1.2.3")
        .unwrap();
    verifier.assert_unbound(ip("10.0.0.5")).unwrap();
    assert_eq!(env.backend().dummy_ref_count(&ip("10.0.0.5")), 0);
    assert!(env.backend().lb_keys().is_empty());
    assert_eq!(env.backend().service_count(), 0);
}

#[tokio::test]
async fn test_nothing_reaches_the_kernel_before_sync() {
    let mut env = PipelineEnv::start().await.unwrap();

    let applied = env
        .apply([
            events::service_added(scenario::svc1()),
            events::slice_added(scenario::svc1_slice()),
        ])
        .await
        .unwrap();
    assert_eq!(applied, 0);
    assert!(env.kernel().ops().is_empty());

    env.mark_synced().unwrap();
    assert_eq!(env.settle().await.unwrap(), 1);
    KernelVerifier::new(env.kernel())
        .assert_virtual_server("TCP:10.0.0.5:80")
        .unwrap();
}

#[tokio::test]
async fn test_json_lines_source_feeds_the_pipeline() {
    let mut env = PipelineEnv::start().await.unwrap();

    let mut input = String::from("# recorded watch\n");
    for event in [
        events::service_added(scenario::svc1()),
        events::slice_added(scenario::svc1_slice()),
    ]
    .iter()
    .chain(events::synced().iter())
    {
        input.push_str(&watch_record(event));
        input.push('\n');
    }

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let source = JsonLinesSource::new("recorded", input.as_bytes());
    source.run(tx, cancel.clone()).await.unwrap();
    Job::new(env.store().clone(), IngestConfig::default())
        .run(rx, cancel)
        .await
        .unwrap();

    env.settle().await.unwrap();
    KernelVerifier::new(env.kernel())
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.3:8080"])
        .unwrap();
}

#[tokio::test]
async fn test_unready_endpoints_are_not_backends() {
    let mut env = synced_env().await;
    let slice = SliceBuilder::new("ns", "svc1-abcde", "svc1")
        .endpoint("10.1.2.3")
        .endpoint_with(&["10.1.2.4"], false)
        .build();

    env.apply([events::service_added(scenario::svc1()), events::slice_added(slice)])
        .await
        .unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier
        .assert_real_servers("TCP:10.0.0.5:80", &["10.1.2.3:8080"])
        .unwrap();
    verifier
        .assert_ipset_lacks(KUBE_LOOP_BACK, "10.1.2.4,tcp:8080,10.1.2.4")
        .unwrap();
}

#[tokio::test]
async fn test_external_ips_are_served_and_bound() {
    let mut env = synced_env().await;
    let svc = ServiceBuilder::new("ns", "web")
        .cluster_ip("10.0.0.7")
        .external_ip("192.0.2.10")
        .port("TCP", 443, 0)
        .build();
    let slice = SliceBuilder::new("ns", "web-1", "web").endpoint("10.1.0.9").build();

    env.apply([events::service_added(svc), events::slice_added(slice)])
        .await
        .unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier
        .assert_real_servers("TCP:192.0.2.10:443", &["10.1.0.9:443"])
        .unwrap();
    verifier.assert_bound(ip("192.0.2.10")).unwrap();
    verifier.assert_ipset_lacks(KUBE_CLUSTER_IP, "192.0.2.10,tcp:443").unwrap();
}

#[tokio::test]
async fn test_service_proxy_name_filter() {
    let ingest = IngestConfig {
        service_proxy_name: Some("kpng".to_string()),
        ..Default::default()
    };
    let mut env = PipelineEnv::with_config(StoreConfig::default(), ingest, IpvsConfig::default())
        .await
        .unwrap();
    env.mark_synced().unwrap();

    let ours = ServiceBuilder::new("ns", "ours")
        .cluster_ip("10.0.0.8")
        .port("TCP", 80, 0)
        .proxy_name("kpng")
        .build();
    let theirs = ServiceBuilder::new("ns", "theirs")
        .cluster_ip("10.0.0.9")
        .port("TCP", 80, 0)
        .proxy_name("other")
        .build();
    env.apply([events::service_added(ours), events::service_added(theirs)])
        .await
        .unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_virtual_server("TCP:10.0.0.8:80").unwrap();
    verifier.assert_no_virtual_server("TCP:10.0.0.9:80").unwrap();
}

#[tokio::test]
async fn test_slice_losing_its_label_withdraws_backends() {
    let mut env = synced_env().await;
    env.apply([
        events::service_added(scenario::svc1()),
        events::slice_added(scenario::svc1_slice()),
    ])
    .await
    .unwrap();

    let unlabelled = SliceBuilder::new("ns", "svc1-abcde", "svc1")
        .endpoint("10.1.2.3")
        .without_service_label()
        .build();
    env.apply([events::slice_updated(scenario::svc1_slice(), unlabelled)])
        .await
        .unwrap();

    let verifier = KernelVerifier::new(env.kernel());
    verifier.assert_real_servers("TCP:10.0.0.5:80", &[]).unwrap();
    verifier.assert_virtual_server("TCP:10.0.0.5:80").unwrap();
}

#[tokio::test]
async fn test_deleting_everything_leaves_an_empty_kernel() {
    let mut env = synced_env().await;
    let web = ServiceBuilder::new("ns", "web")
        .cluster_ip("10.0.0.7")
        .cluster_ip("fd00::7")
        .port("TCP", 80, 8080)
        .port("UDP", 53, 0)
        .build();
    let slice = SliceBuilder::new("ns", "web-1", "web")
        .endpoint("10.1.0.9")
        .endpoint("fd00::1:9")
        .build();

    env.apply([
        events::service_added(web.clone()),
        events::slice_added(slice.clone()),
        events::service_added(scenario::svc1()),
        events::slice_added(scenario::svc1_slice()),
    ])
    .await
    .unwrap();
    assert!(!KernelSnapshot::capture(env.kernel(), "kube-ipvs0").is_empty());

    env.apply([
        events::slice_deleted(slice),
        events::service_deleted(web),
        events::slice_deleted(scenario::svc1_slice()),
        events::service_deleted(scenario::svc1()),
    ])
    .await
    .unwrap();

    assert!(KernelSnapshot::capture(env.kernel(), "kube-ipvs0").is_empty());
}
