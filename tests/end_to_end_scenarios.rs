//! End-to-end scenarios for the replicated queue service, built on
//! `LoopbackTransport` so a genuine two-node cluster runs inside one
//! test process (spec.md §8 "End-to-end scenarios").

use clustermq::client::Client;
use clustermq::error::QueueError;
use clustermq::ipc::local::LocalIpcChannel;
use clustermq::ipc::IpcResponse;
use clustermq::model::queue::{CreationAttrs, OpenFlags};
use clustermq::model::GroupPolicy;
use clustermq::node::Node;
use clustermq::transport::loopback::{LoopbackCluster, LoopbackTransport};
use clustermq::wire::{Message, Priority};
use std::sync::Arc;
use std::time::Duration;

/// Join `node_id` onto `cluster`, run its node loop in the background,
/// and return a connected client. A short settle delay lets the
/// membership-triggered sync round (empty, for a fresh node) complete
/// before the caller issues requests.
async fn spawn_node(cluster: Arc<LoopbackCluster>, node_id: u32) -> Client {
    let transport = LoopbackTransport::join(cluster, node_id);
    let channel = Arc::new(LocalIpcChannel::new(node_id));
    let (node, inbound, _timers) = Node::new(Box::new(transport), channel.clone());
    tokio::spawn(node.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    Client::connect(channel, inbound, node_id, 1)
}

fn attrs(retention: Duration) -> CreationAttrs {
    CreationAttrs {
        persistent: false,
        retention_time: retention,
        sizes: [100, 100, 100, 100],
    }
}

fn message(priority: u8, data: &[u8]) -> Message {
    Message::new(1, 1, Priority::new(priority).unwrap(), data.to_vec()).unwrap()
}

#[tokio::test]
async fn scenario_1_message_survives_close_reopen_within_retention() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster, 1).await;

    let queue_id = a
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .expect("create should succeed");

    a.message_send(false, "q1".into(), 1000, message(2, b"hello"))
        .await
        .expect("send should succeed");

    a.queue_close("q1".into(), queue_id).await.expect("close should succeed");

    let reopened = a
        .queue_open("q1".into(), None, OpenFlags::default(), 1000)
        .await
        .expect("reopen without CREATE should find the still-alive queue");
    assert_eq!(reopened, queue_id, "reopen within the retention window reuses the same id");

    let (received, _sender_id) = a
        .message_get("q1".into(), queue_id, 1000)
        .await
        .expect("the message queued before close should still be there");
    assert_eq!(received.data, b"hello");
}

#[tokio::test]
async fn scenario_2_queue_destroyed_after_retention_elapses() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster, 1).await;

    let queue_id = a
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_millis(100))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .expect("create should succeed");
    a.queue_close("q1".into(), queue_id).await.expect("close should succeed");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let err = a
        .queue_open("q1".into(), None, OpenFlags::default(), 1000)
        .await
        .expect_err("queue should have been destroyed by the retention timer");
    assert_eq!(err, QueueError::NotExist);
}

#[tokio::test]
async fn scenario_3_empty_flag_drains_the_queue_on_open() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster, 1).await;

    let queue_id = a
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .expect("create should succeed");
    a.message_send(false, "q1".into(), 1000, message(0, b"stale"))
        .await
        .expect("send should succeed");
    a.queue_close("q1".into(), queue_id).await.expect("close should succeed");

    a.queue_open(
        "q1".into(),
        None,
        OpenFlags { empty: true, ..Default::default() },
        1000,
    )
    .await
    .expect("reopen with EMPTY should succeed");

    let err = a
        .message_get("q1".into(), queue_id, 100)
        .await
        .expect_err("EMPTY should have drained the previously queued message");
    assert_eq!(err, QueueError::Timeout);
}

#[tokio::test]
async fn scenario_4_group_send_round_robins_across_members() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster.clone(), 1).await;
    let b = spawn_node(cluster, 2).await;

    let q1 = a
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .unwrap();
    let q2 = a
        .queue_open(
            "q2".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .unwrap();

    b.queue_group_create("g".into(), GroupPolicy::RoundRobin).await.unwrap();
    b.queue_group_insert("g".into(), "q1".into()).await.unwrap();
    b.queue_group_insert("g".into(), "q2".into()).await.unwrap();

    for _ in 0..3 {
        a.message_send(true, "g".into(), 1000, message(0, b"x")).await.unwrap();
    }

    let (_, _) = a.message_get("q1".into(), q1, 100).await.expect("first send lands on q1");
    let (_, _) = a.message_get("q2".into(), q2, 100).await.expect("second send lands on q2");
    let (_, _) = a.message_get("q1".into(), q1, 100).await.expect("third send lands back on q1");
}

#[tokio::test]
async fn scenario_5_pending_receive_is_fulfilled_by_a_send_from_another_node() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster.clone(), 1).await;
    let b = spawn_node(cluster, 2).await;

    let queue_id = a
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .unwrap();

    let get = tokio::spawn({
        let a = a;
        async move { a.message_get("q1".into(), queue_id, 1000).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    b.message_send(false, "q1".into(), 1000, message(1, b"late"))
        .await
        .expect("send from the other node should reach the pending receiver");

    let (received, _) = get
        .await
        .unwrap()
        .expect("the pending get should be fulfilled, not time out");
    assert_eq!(received.data, b"late");
}

#[tokio::test]
async fn scenario_6_send_receive_reply_round_trips_across_nodes() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster.clone(), 1).await;
    let b = spawn_node(cluster, 2).await;

    let queue_id = b
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .unwrap();

    let call = tokio::spawn({
        let a = a;
        async move {
            a.message_send_receive(false, "q1".into(), 2000, 10, message(0, b"ping"))
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (received, sender_id) = b
        .message_get("q1".into(), queue_id, 1000)
        .await
        .expect("q1 should have the ping waiting");
    assert_eq!(received.data, b"ping");
    let sender_id = sender_id.expect("a send-receive message carries its sender_id");

    b.message_reply(message(0, b"pong"), sender_id, 1000)
        .await
        .expect("reply should succeed");

    let reply = call.await.unwrap().expect("the original caller should get the reply");
    assert_eq!(reply.data, b"pong");
}

#[tokio::test]
async fn scenario_7_disconnecting_without_explicit_close_still_releases_the_queue() {
    let cluster = LoopbackCluster::new();
    let transport = LoopbackTransport::join(cluster, 1);
    let channel = Arc::new(LocalIpcChannel::new(1));
    let (node, inbound, _timers) = Node::new(Box::new(transport), channel.clone());
    tokio::spawn(node.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let a = Client::connect(channel.clone(), inbound.clone(), 1, 1);
    let queue_id = a
        .queue_open(
            "q1".into(),
            Some(attrs(Duration::from_secs(5))),
            OpenFlags { create: true, ..Default::default() },
            1000,
        )
        .await
        .expect("create should succeed");

    // Drop without ever calling queue_close: the node should still emit
    // the implicit close via the connection's CleanupEntry.
    drop(a);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let b = Client::connect(channel, inbound, 1, 2);
    let reopened = b
        .queue_open("q1".into(), None, OpenFlags::default(), 1000)
        .await
        .expect("disconnect without explicit close should still have released the refcount");
    assert_eq!(reopened, queue_id, "reopen finds the same still-retained queue");
}

#[tokio::test]
async fn queue_status_get_reports_persistence_and_priority_usage() {
    let cluster = LoopbackCluster::new();
    let a = spawn_node(cluster, 1).await;

    a.queue_open(
        "q1".into(),
        Some(attrs(Duration::from_secs(5))),
        OpenFlags { create: true, ..Default::default() },
        1000,
    )
    .await
    .unwrap();

    match a.queue_status_get("q1".into()).await.unwrap() {
        IpcResponse::QueueStatus { persistent, priority_usage, .. } => {
            assert!(!persistent);
            assert_eq!(priority_usage[0].1, 100);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}
