use super::*;
use farm_services::CHUNK_SIZE;

#[tokio::test]
async fn install_deploys_on_every_other_member() {
    let cluster = Cluster::new("install", &["a", "b", "c"]);
    let a = cluster.node("a");

    // Three data chunks, the last one short.
    let data = artifact_bytes(2 * CHUNK_SIZE + 4000, 7);
    let artifact = a.root.join("app.war");
    std::fs::write(&artifact, &data).unwrap();

    let report = a.coordinator.install("/app", &artifact).unwrap();
    assert_eq!(report.chunks, 4);
    assert_eq!(report.sends, 8);
    assert_eq!(report.failed_sends, 0);
    assert!(!a.webapps.join("app.war").exists());

    let outcomes = cluster.deliver_all().await;
    for name in ["b", "c"] {
        let node = cluster.node(name);
        let got = &outcomes[name];
        assert_eq!(got.len(), 4);
        assert!(got[..3].iter().all(|o| *o == DispatchOutcome::Pending));
        assert_eq!(got[3], DispatchOutcome::Deployed(node.webapps.join("app.war")));

        assert_eq!(std::fs::read(node.webapps.join("app.war")).unwrap(), data);
        assert!(node.is_running("/app"));
        assert!(node.sessions.is_empty().await);
        assert!(!node.temp.join("app.war").exists());
    }
    assert!(!outcomes.contains_key("a"));
}

#[tokio::test]
async fn lone_member_install_sends_nothing() {
    let cluster = Cluster::new("lone", &["a"]);
    let a = cluster.node("a");
    let artifact = a.root.join("solo.war");
    std::fs::write(&artifact, b"solo").unwrap();

    let report = a.coordinator.install("/solo", &artifact).unwrap();
    assert_eq!(report.sends, 0);
    assert!(cluster.deliver_all().await.is_empty());
}

#[tokio::test]
async fn reinstall_replaces_the_running_unit() {
    let cluster = Cluster::new("reinstall", &["a", "b"]);
    let a = cluster.node("a");
    let b = cluster.node("b");
    let artifact = a.root.join("shop.war");

    std::fs::write(&artifact, artifact_bytes(CHUNK_SIZE + 1, 1)).unwrap();
    a.coordinator.install("/shop", &artifact).unwrap();
    cluster.deliver_all().await;
    let first = b.host.unit("/shop").unwrap();

    let second_version = artifact_bytes(3 * CHUNK_SIZE, 2);
    std::fs::write(&artifact, &second_version).unwrap();
    a.coordinator.install("/shop", &artifact).unwrap();
    let outcomes = cluster.deliver_all().await;

    assert_eq!(
        outcomes["b"].last(),
        Some(&DispatchOutcome::Deployed(b.webapps.join("shop.war")))
    );
    assert!(!first.is_running());
    assert!(b.is_running("/shop"));
    assert_eq!(
        std::fs::read(b.webapps.join("shop.war")).unwrap(),
        second_version
    );
}

#[tokio::test]
async fn versioned_and_nested_names_land_as_their_files() {
    let cluster = Cluster::new("names", &["a", "b"]);
    let a = cluster.node("a");
    let b = cluster.node("b");

    let artifact = a.root.join("shop#cart##2.war");
    std::fs::write(&artifact, b"cart v2").unwrap();
    a.coordinator.install("/shop/cart##2", &artifact).unwrap();
    cluster.deliver_all().await;

    assert!(b.webapps.join("shop#cart##2.war").exists());
    assert!(b.is_running("/shop/cart##2"));
}

#[tokio::test]
async fn receive_side_busy_leaves_artifact_staged() {
    let cluster = Cluster::new("recv-busy", &["a", "b"]);
    let a = cluster.node("a");
    let b = cluster.node("b");
    let artifact = a.root.join("app.war");
    std::fs::write(&artifact, artifact_bytes(CHUNK_SIZE / 2, 3)).unwrap();
    a.coordinator.install("/app", &artifact).unwrap();

    let held = farm_services::ServicedLock::try_acquire(b.host.as_ref(), "/app")
        .unwrap()
        .unwrap();
    let outcomes = cluster.deliver_all().await;
    drop(held);

    assert_eq!(outcomes["b"].last(), Some(&DispatchOutcome::Busy));
    assert!(!b.webapps.join("app.war").exists());
    assert!(b.temp.join("app.war").exists());
    assert!(b.sessions.is_empty().await);
    assert!(!b.host.is_serviced("/app"));
}

#[tokio::test]
async fn unknown_message_kinds_are_ignored() {
    let cluster = Cluster::new("unknown", &["a", "b"]);
    let b = cluster.node("b");

    let outcome = b
        .dispatcher
        .on_bytes(br#"{"kind":"heartbeat","origin":"a"}"#)
        .await;
    assert_eq!(outcome, DispatchOutcome::Ignored);

    let outcome = b.dispatcher.on_bytes(b"not json").await;
    assert_eq!(outcome, DispatchOutcome::Ignored);
}
