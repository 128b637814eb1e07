/*
    Publish/subscribe between managers on one mesh

    Covers events, identifier updates, forward-only relaying and the
    Comm::* status events raised on peering.
*/

use peerbus_core::core_host::{Type, Val};
use peerbus_core::core_manager::{PEER_ADDED_EVENT, PEER_REMOVED_EVENT};
use peerbus_core::core_transport::MeshNetwork;
use peerbus_core::core_wire::Data;
use peerbus_core::test_utils::{pump, simulated_manager, TestManager};
use std::time::Duration;

fn connected_pair(network: &MeshNetwork) -> (TestManager, TestManager) {
    let mut a = simulated_manager(network);
    let mut b = simulated_manager(network);
    let port = b.listen("127.0.0.1", 0).unwrap();
    a.peer("127.0.0.1", port, Duration::from_secs(1)).unwrap();
    pump(&mut [&mut a, &mut b]);
    (a, b)
}

#[test]
fn test_event_reaches_subscriber() {
    let network = MeshNetwork::new();
    let (mut a, mut b) = connected_pair(&network);
    b.host_mut()
        .define_event("Notice::alarm", vec![Type::String, Type::Count]);
    b.subscribe("alerts/");

    a.publish_event("alerts/high", "Notice::alarm", vec![Data::from("scan"), Data::Count(3)])
        .unwrap();
    a.publish_event("other/x", "Notice::alarm", vec![Data::from("ignored"), Data::Count(0)])
        .unwrap();
    pump(&mut [&mut a, &mut b]);

    assert_eq!(
        b.host().raised("Notice::alarm"),
        vec![vec![Val::from("scan"), Val::Count(3)]]
    );
    assert_eq!(a.stats().num_events_outgoing, 2);
    assert_eq!(b.stats().num_events_incoming, 1);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let network = MeshNetwork::new();
    let (mut a, mut b) = connected_pair(&network);
    b.host_mut().define_event("tick", vec![]);
    b.subscribe("t/");

    a.publish_event("t/1", "tick", vec![]).unwrap();
    pump(&mut [&mut a, &mut b]);
    assert!(b.unsubscribe("t/"));
    a.publish_event("t/2", "tick", vec![]).unwrap();
    pump(&mut [&mut a, &mut b]);

    assert_eq!(b.host().raised("tick").len(), 1);
}

#[test]
fn test_forwarder_relays_without_raising() {
    let network = MeshNetwork::new();
    let mut a = simulated_manager(&network);
    let mut relay = simulated_manager(&network);
    let mut c = simulated_manager(&network);
    for m in [&mut a, &mut relay, &mut c] {
        m.host_mut().define_event("tick", vec![]);
    }

    let relay_port = relay.listen("127.0.0.1", 0).unwrap();
    a.peer("127.0.0.1", relay_port, Duration::from_secs(1)).unwrap();
    c.peer("127.0.0.1", relay_port, Duration::from_secs(1)).unwrap();
    relay.forward("t/");
    c.subscribe("t/");
    pump(&mut [&mut a, &mut relay, &mut c]);

    a.publish_event("t/x", "tick", vec![]).unwrap();
    pump(&mut [&mut a, &mut relay, &mut c]);

    assert!(relay.host().raised("tick").is_empty());
    assert_eq!(c.host().raised("tick").len(), 1);
}

#[test]
fn test_identifier_update_propagates() {
    let network = MeshNetwork::new();
    let (mut a, mut b) = connected_pair(&network);
    a.host_mut()
        .define_identifier("Scan::threshold", Type::Count, Some(Val::Count(25)));
    b.host_mut()
        .define_identifier("Scan::threshold", Type::Count, Some(Val::Count(10)));
    b.subscribe("ids/");

    a.publish_identifier("ids/scan", "Scan::threshold").unwrap();
    pump(&mut [&mut a, &mut b]);

    assert_eq!(b.host().identifier("Scan::threshold"), Some(&Val::Count(25)));
    assert_eq!(a.stats().num_ids_outgoing, 1);
    assert_eq!(b.stats().num_ids_incoming, 1);
}

#[test]
fn test_auto_published_event_after_init() {
    let network = MeshNetwork::new();
    let (mut a, mut b) = connected_pair(&network);
    a.host_mut().define_event("Conn::new", vec![Type::Count]);
    b.host_mut().define_event("Conn::new", vec![Type::Count]);
    b.subscribe("conn/");

    assert!(a.auto_publish_event("conn/events", "Conn::new"));
    a.init_done();
    assert_eq!(a.on_local_event("Conn::new", &[Val::Count(7)]), 1);
    pump(&mut [&mut a, &mut b]);

    assert_eq!(b.host().raised("Conn::new"), vec![vec![Val::Count(7)]]);
}

#[test]
fn test_unpeer_raises_removed() {
    let network = MeshNetwork::new();
    let (mut a, mut b) = connected_pair(&network);
    assert_eq!(a.host().raised(PEER_ADDED_EVENT).len(), 1);
    assert_eq!(b.host().raised(PEER_ADDED_EVENT).len(), 1);

    let port = a.peers()[0].port;
    a.unpeer("127.0.0.1", port).unwrap();
    pump(&mut [&mut a, &mut b]);

    assert_eq!(a.host().raised(PEER_REMOVED_EVENT).len(), 1);
    assert_eq!(a.stats().num_peers, 0);
    assert_eq!(b.stats().num_peers, 0);
    assert!(b.active());
}
