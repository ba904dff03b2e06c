//! Node tests over turmoil's simulated network.
//!
//! Same `Node` code as production, with `SimTransport` underneath:
//! - Broadcast and replies across three hosts
//! - Message latency with a fixed seed (no reordering)
//! - Held links (delivery resumes in order after release)
//! - Listener stop/restart with the log surviving

use std::time::Duration;

use cloak_core::{Ed25519Authenticator, NetworkEvent, NodeId};
use cloak_harness::{SimTransport, keyring};
use cloak_server::{Node, NodeConfig};
use tokio::sync::mpsc;

type SimNode = Node<SimTransport, Ed25519Authenticator>;

const HUB_ADDR: &str = "hub:7000";

/// Node `id` on the simulated network.
fn sim_node(id: u32, authenticator: Ed25519Authenticator) -> (SimNode, mpsc::Receiver<NetworkEvent>) {
    Node::new(SimTransport, authenticator, NodeConfig::new(NodeId(id), "0.0.0.0:7000"))
}

/// Dial the hub, retrying while it is not listening yet.
async fn dial(node: &SimNode) -> Result<NodeId, Box<dyn std::error::Error>> {
    let mut attempts = 0;
    loop {
        match node.connect(HUB_ADDR).await {
            Ok(peer) => return Ok(peer),
            Err(e) if attempts < 50 => {
                attempts += 1;
                tracing::debug!(error = %e, attempts, "hub not ready");
                tokio::time::sleep(Duration::from_millis(20)).await;
            },
            Err(e) => return Err(e.into()),
        }
    }
}

/// Wait until every event in `expected` has been seen, in any order.
async fn expect_all(
    events: &mut mpsc::Receiver<NetworkEvent>,
    expected: &[NetworkEvent],
) -> turmoil::Result {
    let mut remaining = expected.to_vec();
    while !remaining.is_empty() {
        let event = events.recv().await.ok_or("event channel closed")?;
        remaining.retain(|e| *e != event);
    }
    Ok(())
}

/// Wait for one event, skipping others.
async fn expect(events: &mut mpsc::Receiver<NetworkEvent>, expected: NetworkEvent) -> turmoil::Result {
    expect_all(events, &[expected]).await
}

#[test]
fn broadcast_and_replies_across_hosts() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(30)).build();
    let mut ring = keyring(7, 3).into_iter();
    let hub_auth = ring.next().unwrap();

    sim.client("hub", async move {
        let (node, mut events) = sim_node(1, hub_auth);
        node.start_incoming().await?;

        let connected = [NetworkEvent::Connected(NodeId(2)), NetworkEvent::Connected(NodeId(3))];
        expect_all(&mut events, &connected).await?;
        assert_eq!(node.broadcast(b"round-1"), 2);

        let replies = [NetworkEvent::ReadyRead(NodeId(2)), NetworkEvent::ReadyRead(NodeId(3))];
        expect_all(&mut events, &replies).await?;
        assert_eq!(node.read(NodeId(2)).as_deref(), Some(&b"ack-2"[..]));
        assert_eq!(node.read(NodeId(3)).as_deref(), Some(&b"ack-3"[..]));

        let stats = node.log().stats();
        assert_eq!((stats.sent, stats.received_valid, stats.received_invalid), (2, 2, 0));

        node.stop_incoming().await;
        Ok(())
    });

    for (name, id) in [("b", 2), ("c", 3)] {
        let authenticator = ring.next().unwrap();
        sim.client(name, async move {
            let (node, mut events) = sim_node(id, authenticator);
            assert_eq!(dial(&node).await?, NodeId(1));

            expect(&mut events, NetworkEvent::ReadyRead(NodeId(1))).await?;
            assert_eq!(node.read(NodeId(1)).as_deref(), Some(&b"round-1"[..]));
            node.send(NodeId(1), format!("ack-{id}").as_bytes())?;

            // Hub hangs up once it has both replies
            expect(&mut events, NetworkEvent::Disconnected(NodeId(1))).await?;
            Ok(())
        });
    }

    sim.run().expect("simulation should complete");
}

#[test]
fn variable_latency_keeps_per_sender_order() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(1))
        .max_message_latency(Duration::from_millis(80))
        .rng_seed(12345)
        .build();
    let mut ring = keyring(21, 2).into_iter();
    let hub_auth = ring.next().unwrap();
    let peer_auth = ring.next().unwrap();

    sim.client("hub", async move {
        let (node, mut events) = sim_node(1, hub_auth);
        node.start_incoming().await?;
        expect(&mut events, NetworkEvent::Connected(NodeId(2))).await?;

        for round in 0..50u32 {
            node.send(NodeId(2), &round.to_be_bytes())?;
            if round % 10 == 9 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        expect(&mut events, NetworkEvent::Disconnected(NodeId(2))).await?;
        assert_eq!(node.log().len(), 50);
        Ok(())
    });

    sim.client("peer", async move {
        let (node, mut events) = sim_node(2, peer_auth);
        dial(&node).await?;

        for round in 0..50u32 {
            expect(&mut events, NetworkEvent::ReadyRead(NodeId(1))).await?;
            let message = node.read(NodeId(1)).ok_or("ready without message")?;
            assert_eq!(message.as_ref(), round.to_be_bytes());
        }

        let log = node.log();
        assert_eq!(log.len(), 50);
        assert!(log.iter().all(|entry| entry.valid));

        node.stop_incoming().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");
}

#[test]
fn held_link_delivers_in_order_after_release() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(30)).build();
    let mut ring = keyring(5, 2).into_iter();
    let hub_auth = ring.next().unwrap();
    let peer_auth = ring.next().unwrap();

    sim.client("hub", async move {
        let (node, mut events) = sim_node(1, hub_auth);
        node.start_incoming().await?;
        expect(&mut events, NetworkEvent::Connected(NodeId(2))).await?;

        // Let our hello reach the peer before the link is held
        tokio::time::sleep(Duration::from_millis(200)).await;
        turmoil::hold("hub", "peer");
        for message in [&b"one"[..], b"two", b"three"] {
            node.send(NodeId(2), message)?;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        turmoil::release("hub", "peer");

        expect(&mut events, NetworkEvent::Disconnected(NodeId(2))).await?;
        Ok(())
    });

    sim.client("peer", async move {
        let (node, mut events) = sim_node(2, peer_auth);
        dial(&node).await?;
        let connected_at = tokio::time::Instant::now();

        for expected in [&b"one"[..], b"two", b"three"] {
            expect(&mut events, NetworkEvent::ReadyRead(NodeId(1))).await?;
            assert_eq!(node.read(NodeId(1)).as_deref(), Some(expected));
        }
        assert!(connected_at.elapsed() >= Duration::from_millis(900));

        node.stop_incoming().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");
}

#[test]
fn restarted_listener_accepts_again_and_keeps_log() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(30)).build();
    let mut ring = keyring(9, 2).into_iter();
    let hub_auth = ring.next().unwrap();
    let peer_auth = ring.next().unwrap();

    sim.client("hub", async move {
        let (node, mut events) = sim_node(1, hub_auth);
        node.start_incoming().await?;
        expect(&mut events, NetworkEvent::ReadyRead(NodeId(2))).await?;
        let before = node.log();
        assert_eq!(before.len(), 1);

        node.stop_incoming().await;
        assert_eq!(node.log(), before);
        assert!(node.send(NodeId(2), b"gone").is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        node.start_incoming().await?;
        expect(&mut events, NetworkEvent::ReadyRead(NodeId(2))).await?;

        assert_eq!(node.read(NodeId(2)).as_deref(), Some(&b"first session"[..]));
        assert_eq!(node.read(NodeId(2)).as_deref(), Some(&b"second session"[..]));
        assert_eq!(node.log().len(), 2);

        node.stop_incoming().await;
        Ok(())
    });

    sim.client("peer", async move {
        let (node, mut events) = sim_node(2, peer_auth);
        dial(&node).await?;
        node.send(NodeId(1), b"first session")?;
        expect(&mut events, NetworkEvent::Disconnected(NodeId(1))).await?;

        dial(&node).await?;
        node.send(NodeId(1), b"second session")?;
        expect(&mut events, NetworkEvent::Disconnected(NodeId(1))).await?;
        Ok(())
    });

    sim.run().expect("simulation should complete");
}
