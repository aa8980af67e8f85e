use smartc_core::config::MeshConfig;
use smartc_core::{ConnectionId, SessionId};
use smartc_mesh::{AdaptiveMesh, PeerCapabilities, RoutingStrategy};
use std::sync::Arc;

fn populate(mesh: &AdaptiveMesh, session: &str, count: usize, relay_capable: usize) -> Vec<ConnectionId> {
    (0..count)
        .map(|i| {
            let id = ConnectionId::from(format!("{session}-{i:03}"));
            let caps = PeerCapabilities {
                can_relay: i < relay_capable,
                ..Default::default()
            };
            mesh.add_peer(id.clone(), session.into(), caps);
            id
        })
        .collect()
}

#[test]
fn test_twenty_peers_stay_full_mesh() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    populate(&mesh, "room", 20, 20);

    let stats = mesh.topology_stats(&"room".into()).unwrap();
    assert_eq!(stats.strategy, RoutingStrategy::FullMesh);
    assert_eq!(stats.relay_nodes, 0);
}

#[test]
fn test_twenty_one_peers_become_hybrid_with_two_relays() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    populate(&mesh, "room", 21, 21);

    let stats = mesh.topology_stats(&"room".into()).unwrap();
    assert_eq!(stats.strategy, RoutingStrategy::Hybrid);
    assert_eq!(stats.relay_nodes, 2);
}

#[test]
fn test_hybrid_relays_limited_to_opted_in_peers() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    populate(&mesh, "room", 21, 1);

    assert_eq!(mesh.relay_nodes(&"room".into()), vec![ConnectionId::from("room-000")]);
}

#[test]
fn test_fifty_one_peers_become_relay_based_with_six_relays() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    populate(&mesh, "room", 51, 8);

    let stats = mesh.topology_stats(&"room".into()).unwrap();
    assert_eq!(stats.strategy, RoutingStrategy::RelayBased);
    assert_eq!(stats.relay_nodes, 6);
}

#[test]
fn test_shrinking_back_clears_relays() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    let peers = populate(&mesh, "room", 21, 21);
    assert_eq!(mesh.relay_nodes(&"room".into()).len(), 2);

    let removal = mesh.remove_peer(&peers[20]).unwrap();
    assert!(removal.relay_nodes.is_empty());
    assert_eq!(mesh.strategy(&"room".into()), Some(RoutingStrategy::FullMesh));
}

#[test]
fn test_withdrawn_relay_is_never_reelected() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    let peers = populate(&mesh, "room", 51, 10);

    // make the first peer the best candidate by far
    let best = peers[0].clone();
    mesh.add_peer(
        best.clone(),
        "room".into(),
        PeerCapabilities {
            can_relay: true,
            bandwidth_mbps: 1000.0,
            cpu_score: 8.0,
            has_stable_connection: true,
        },
    );
    assert_eq!(mesh.relay_nodes(&"room".into())[0], best);

    let relays = mesh.set_relay_capability(&best, false).unwrap();
    assert!(!relays.contains(&best));
    assert_eq!(relays.len(), 6);

    let relays = mesh.recalculate_topology(&"room".into()).unwrap();
    assert!(!relays.contains(&best));
}

#[test]
fn test_removing_relay_triggers_reelection() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    populate(&mesh, "room", 51, 10);
    let relays = mesh.relay_nodes(&"room".into());

    let removal = mesh.remove_peer(&relays[0]).unwrap();
    assert!(removal.was_relay);
    assert!(!removal.relay_nodes.contains(&relays[0]));
    // 50 peers: hybrid, ceil(2.5) = 3
    assert_eq!(removal.relay_nodes.len(), 3);
}

#[test]
fn test_routing_path_respects_strategy_limits() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    let peers = populate(&mesh, "room", 60, 10);
    let source = &peers[30];

    let path = mesh.routing_path(source).unwrap();
    assert_eq!(path.strategy, RoutingStrategy::RelayBased);
    assert_eq!(path.direct_peers.len(), 2);
    assert_eq!(path.relay_nodes.len(), 3);
    assert!(!path.direct_peers.contains(source));

    let hybrid = AdaptiveMesh::new(MeshConfig::default());
    let peers = populate(&hybrid, "room", 30, 5);
    let path = hybrid.routing_path(&peers[29]).unwrap();
    assert_eq!(path.strategy, RoutingStrategy::Hybrid);
    assert_eq!(path.direct_peers.len(), 4);
    assert_eq!(path.relay_nodes.len(), 2);
}

#[test]
fn test_sessions_are_independent() {
    let mesh = AdaptiveMesh::new(MeshConfig::default());
    populate(&mesh, "big", 25, 25);
    populate(&mesh, "small", 3, 3);

    assert_eq!(mesh.strategy(&"big".into()), Some(RoutingStrategy::Hybrid));
    assert_eq!(mesh.strategy(&"small".into()), Some(RoutingStrategy::FullMesh));
    assert!(mesh.relay_nodes(&"small".into()).is_empty());
    assert_eq!(mesh.session_count(), 2);
}

#[test]
fn test_concurrent_churn_keeps_relays_within_membership() {
    let mesh = Arc::new(AdaptiveMesh::new(MeshConfig::default()));
    let session = SessionId::from("churn");

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let mesh = Arc::clone(&mesh);
            let session = session.clone();
            scope.spawn(move || {
                for round in 0..50 {
                    let id = ConnectionId::from(format!("w{worker}-{round}"));
                    mesh.add_peer(id.clone(), session.clone(), PeerCapabilities::relay_capable());
                    if round % 3 == 0 {
                        mesh.remove_peer(&id);
                    }
                }
            });
        }
    });

    let stats = mesh.topology_stats(&session).unwrap();
    let relays = mesh.relay_nodes(&session);
    assert_eq!(stats.total_nodes, mesh.peer_count());
    for relay in &relays {
        assert_eq!(mesh.session_of(relay), Some(session.clone()));
    }
    // 4 workers x 33 survivors
    assert_eq!(stats.total_nodes, 132);
    assert_eq!(stats.strategy, RoutingStrategy::RelayBased);
    assert_eq!(relays.len(), 14);
}
