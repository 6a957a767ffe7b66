use super::*;
use bytes::Bytes;
use farm_core::message::{now_millis, ChunkMessage};
use farm_services::CHUNK_SIZE;
use std::time::Instant;

fn chunk(file_name: &str, target_name: &str, seq: u64, payload: &[u8]) -> ClusterMessage {
    ClusterMessage::Chunk(ChunkMessage {
        origin: MemberId::new("a"),
        file_name: file_name.to_string(),
        target_name: target_name.to_string(),
        seq,
        payload: Bytes::copy_from_slice(payload),
        timestamp: now_millis(),
    })
}

#[tokio::test]
async fn interrupted_transfer_stays_open_until_expiry() {
    let cluster = Cluster::with_max_valid_time("expiry", &["a", "b"], Duration::from_secs(60));
    let a = cluster.node("a");
    let b = cluster.node("b");
    let artifact = a.root.join("big.war");
    std::fs::write(&artifact, artifact_bytes(3 * CHUNK_SIZE, 4)).unwrap();
    a.coordinator.install("/big", &artifact).unwrap();

    // The sender goes away after two chunks.
    assert_eq!(cluster.deliver_one("b").await, Some(DispatchOutcome::Pending));
    assert_eq!(cluster.deliver_one("b").await, Some(DispatchOutcome::Pending));
    assert_eq!(cluster.hub.pending(&b.id), 2);
    assert_eq!(b.sessions.in_progress().await, vec!["big.war".to_string()]);

    let now = Instant::now();
    assert!(b.sessions.prune_expired(now).await.is_empty());
    let pruned = b
        .sessions
        .prune_expired(now + Duration::from_secs(61))
        .await;
    assert_eq!(pruned, vec!["big.war".to_string()]);
    assert!(b.sessions.is_empty().await);
    assert!(!b.webapps.join("big.war").exists());
}

#[tokio::test]
async fn transfer_cannot_resume_after_expiry() {
    let cluster = Cluster::with_max_valid_time("resume", &["a", "b"], Duration::from_secs(60));
    let b = cluster.node("b");

    let outcome = b
        .dispatcher
        .on_message(chunk("late.war", "/late", 0, b"first"))
        .await;
    assert_eq!(outcome, DispatchOutcome::Pending);
    b.sessions
        .prune_expired(Instant::now() + Duration::from_secs(120))
        .await;

    // A fresh session expects sequence 0 again.
    let outcome = b
        .dispatcher
        .on_message(chunk("late.war", "/late", 1, b"second"))
        .await;
    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    assert!(!b.webapps.join("late.war").exists());
}

#[tokio::test]
async fn concurrent_transfers_do_not_mix() {
    let cluster = Cluster::new("concurrent", &["a", "b", "c"]);
    let a = cluster.node("a");
    let c = cluster.node("c");
    let b = cluster.node("b");

    let one = artifact_bytes(2 * CHUNK_SIZE + 10, 1);
    let two = artifact_bytes(CHUNK_SIZE + 700, 2);
    std::fs::write(a.root.join("one.war"), &one).unwrap();
    std::fs::write(c.root.join("two.war"), &two).unwrap();
    a.coordinator.install("/one", &a.root.join("one.war")).unwrap();
    c.coordinator.install("/two", &c.root.join("two.war")).unwrap();

    // Interleave the two streams on b.
    let mut from_a = Vec::new();
    while let Some(frame) = cluster.hub.pop(&b.id) {
        from_a.push(frame);
    }
    let from_c = from_a.split_off(4);
    let mut ia = from_a.into_iter();
    let mut ic = from_c.into_iter();
    loop {
        let (fa, fc) = (ia.next(), ic.next());
        if fa.is_none() && fc.is_none() {
            break;
        }
        for frame in fa.into_iter().chain(fc) {
            b.dispatcher.on_bytes(&frame).await;
        }
    }
    cluster.deliver_all().await;

    assert_eq!(std::fs::read(b.webapps.join("one.war")).unwrap(), one);
    assert_eq!(std::fs::read(b.webapps.join("two.war")).unwrap(), two);
    assert!(b.is_running("/one"));
    assert!(b.is_running("/two"));
    assert!(b.sessions.is_empty().await);

    // Each origin also received the other's artifact.
    assert_eq!(std::fs::read(c.webapps.join("one.war")).unwrap(), one);
    assert_eq!(std::fs::read(a.webapps.join("two.war")).unwrap(), two);
}

#[tokio::test]
async fn unsafe_file_names_are_refused() {
    let cluster = Cluster::new("unsafe", &["a", "b"]);
    let b = cluster.node("b");

    for name in ["../escape.war", "nested/app.war", ""] {
        let outcome = b.dispatcher.on_message(chunk(name, "/x", 0, b"x")).await;
        assert_eq!(outcome, DispatchOutcome::Ignored, "{name:?}");
    }
    assert!(b.sessions.is_empty().await);
    assert!(!b.root.join("escape.war").exists());
}
