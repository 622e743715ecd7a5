use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;

use netplay::{
    Episodes, HaltReason, HandshakeState, MemoryTransport, NetConfig, PacketKind, Session,
    SystemClock, UdpTransport, memory_link,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn config(player: u16, name: &str, episodes: Episodes) -> NetConfig {
    NetConfig {
        player_number: player,
        player_name: name.to_string(),
        episodes,
        ..NetConfig::default()
    }
}

fn memory_pair(
    first: NetConfig,
    second: NetConfig,
) -> (
    Session<MemoryTransport, SystemClock>,
    Session<MemoryTransport, SystemClock>,
) {
    let (a, b) = memory_link();
    (
        Session::with_transport(a, SystemClock::new(), first).unwrap(),
        Session::with_transport(b, SystemClock::new(), second).unwrap(),
    )
}

#[test]
fn test_two_peers_connect_in_memory() {
    let (mut alice, mut bob) = memory_pair(
        config(1, "alice", Episodes::EPISODE_1 | Episodes::EPISODE_3),
        config(2, "bob", Episodes::EPISODE_3 | Episodes::EPISODE_4),
    );

    let handle = thread::spawn(move || {
        bob.connect().unwrap();
        bob
    });
    alice.connect().unwrap();
    let bob = handle.join().unwrap();

    assert_eq!(alice.connection().state, HandshakeState::Connected);
    assert_eq!(bob.connection().state, HandshakeState::Connected);
    assert_eq!(alice.connection().opponent_name, "bob");
    assert_eq!(bob.connection().opponent_name, "alice");
    assert_eq!(alice.connection().episodes, Episodes::EPISODE_3);
    assert_eq!(bob.connection().episodes, Episodes::EPISODE_3);
}

#[test]
fn test_delay_mismatch_halts_both_sides() {
    let mut slow = config(2, "bob", Episodes::all());
    slow.network_delay = 3;
    let (mut alice, mut bob) = memory_pair(config(1, "alice", Episodes::all()), slow);

    let handle = thread::spawn(move || bob.connect().unwrap_err().halt_reason());
    let ours = alice.connect().unwrap_err().halt_reason();
    let theirs = handle.join().unwrap();

    assert_eq!(ours, Some(HaltReason::DelayMismatch));
    assert_eq!(theirs, Some(HaltReason::DelayMismatch));
}

#[test]
fn test_player_conflict_halts() {
    let (mut alice, mut bob) = memory_pair(
        config(1, "alice", Episodes::all()),
        config(1, "bob", Episodes::all()),
    );

    let handle = thread::spawn(move || bob.connect().unwrap_err().halt_reason());
    let ours = alice.connect().unwrap_err().halt_reason();

    assert_eq!(ours, Some(HaltReason::PlayerConflict));
    assert_eq!(handle.join().unwrap(), Some(HaltReason::PlayerConflict));
}

#[test]
fn test_messages_flow_after_connect() {
    let (mut alice, mut bob) = memory_pair(
        config(1, "alice", Episodes::all()),
        config(2, "bob", Episodes::all()),
    );

    let handle = thread::spawn(move || {
        bob.connect().unwrap();
        loop {
            bob.check().unwrap();
            match bob.next_message() {
                Some(message) if message.kind() == Some(PacketKind::Details) => {
                    return message.payload().to_vec();
                }
                Some(_) | None => thread::yield_now(),
            }
        }
    });

    alice.connect().unwrap();
    let packet = alice.prepare(PacketKind::Details);
    packet.write_u16(4, 0xbeef);
    alice.send(6).unwrap();

    // keep servicing acks until the message is through
    while !handle.is_finished() {
        let _ = alice.check();
        thread::yield_now();
    }

    assert_eq!(handle.join().unwrap(), vec![0xbe, 0xef]);
}

#[test]
fn test_udp_peers_connect_and_quit() {
    let port = next_port();

    let mut alice_config = config(1, "alice", Episodes::all());
    alice_config.local_port = port;
    alice_config.opponent_host = "127.0.0.1".to_string();
    alice_config.opponent_port = port + 1;

    let mut bob_config = config(2, "bob", Episodes::all());
    bob_config.local_port = port + 1;
    bob_config.opponent_host = "127.0.0.1".to_string();
    bob_config.opponent_port = port;

    let mut alice = Session::open(alice_config).unwrap();
    let mut bob = Session::open(bob_config).unwrap();

    let handle = thread::spawn(move || {
        bob.connect().unwrap();
        loop {
            if let Err(e) = bob.check() {
                return e.halt_reason();
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
    });

    alice.connect().unwrap();
    assert!(alice.connection().opponent_addr.is_some());

    let err = alice.quit();
    assert_eq!(err.halt_reason(), Some(HaltReason::LocalQuit));
    assert_eq!(handle.join().unwrap(), Some(HaltReason::PeerQuit));
}

#[test]
fn test_udp_transport_binds_requested_port() {
    let port = next_port();
    let transport = UdpTransport::open(port).unwrap();
    assert_eq!(transport.local_addr().port(), port);
}
