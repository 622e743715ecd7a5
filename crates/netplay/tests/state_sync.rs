use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use netplay::{
    Clock, LossyTransport, ManualClock, MemoryTransport, NET_RESEND, NetConfig, PacketKind,
    PacketLossSimulation, STATE_PAYLOAD_LEN, Session, Transport, memory_link,
};

fn config(player: u16, delay: u16) -> NetConfig {
    NetConfig {
        player_number: player,
        network_delay: delay,
        ..NetConfig::default()
    }
}

fn send_tick<T: Transport>(session: &mut Session<T, ManualClock>, tick: u8) {
    let payload = session.state_prepare();
    payload[0] = tick;
    payload[STATE_PAYLOAD_LEN - 1] = !tick;
    session.state_send().unwrap();
}

/// Services `session` on its own thread until the returned flag is raised.
fn serve_in_background(
    mut session: Session<MemoryTransport, ManualClock>,
) -> (Arc<AtomicBool>, thread::JoinHandle<Session<MemoryTransport, ManualClock>>) {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        while !flag.load(Ordering::SeqCst) {
            let _ = session.check();
            thread::yield_now();
        }
        session
    });
    (stop, handle)
}

#[test]
fn test_lost_group_is_resent_on_request() {
    let (a, b) = memory_link();
    let clock = ManualClock::starting_at(1);
    let mut alice = Session::with_transport(a, clock.clone(), config(1, 2)).unwrap();
    let mut bob = Session::with_transport(b, clock, config(2, 2)).unwrap();

    // both states of the group {2, 3} are lost the first time
    let mut lost = HashSet::new();
    alice.transport_mut().set_loss_filter(move |d| {
        let sequence = u16::from_be_bytes([d[2], d[3]]);
        d[1] == PacketKind::State.as_u16() as u8
            && (sequence == 2 || sequence == 3)
            && lost.insert(sequence)
    });

    for tick in 0..6 {
        send_tick(&mut alice, tick);
        send_tick(&mut bob, tick);
    }

    let (stop, handle) = serve_in_background(alice);

    for tick in 0..6 {
        assert!(bob.state_update().unwrap());
        let payload = bob.state_payload().unwrap();
        assert_eq!(payload[0], tick);
        assert_eq!(payload[STATE_PAYLOAD_LEN - 1], !tick);
    }

    stop.store(true, Ordering::SeqCst);
    let alice = handle.join().unwrap();

    let requests = bob.transport().sent_log().sequences_of(PacketKind::StateResend);
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|&sequence| sequence == 2));
    assert!(alice.stats().resends_served >= 1);
    assert_eq!(bob.stats().reconstructions, 1);
}

#[test]
fn test_two_losses_in_one_group_wait_for_resend() {
    let (a, b) = memory_link();
    let clock = ManualClock::starting_at(1);
    let mut alice = Session::with_transport(a, clock.clone(), config(1, 4)).unwrap();
    let mut bob = Session::with_transport(b, clock, config(2, 4)).unwrap();

    let mut lost = HashSet::new();
    alice.transport_mut().set_loss_filter(move |d| {
        let sequence = u16::from_be_bytes([d[2], d[3]]);
        d[1] == PacketKind::State.as_u16() as u8
            && (sequence == 1 || sequence == 2)
            && lost.insert(sequence)
    });

    for tick in 0..8 {
        send_tick(&mut alice, tick);
        send_tick(&mut bob, tick);
    }

    let (stop, handle) = serve_in_background(alice);

    for tick in 0..8 {
        assert!(bob.state_update().unwrap());
        assert_eq!(bob.state_payload().unwrap()[0], tick);
    }

    stop.store(true, Ordering::SeqCst);
    handle.join().unwrap();

    let requests = bob.transport().sent_log().sequences_of(PacketKind::StateResend);
    assert_eq!(requests.first(), Some(&1));
    assert!(requests.iter().all(|&sequence| sequence == 1 || sequence == 2));
}

#[test]
fn test_resend_requests_are_rate_limited_while_stalled() {
    const STALL: u32 = 3200;

    let (a, b) = memory_link();
    let clock = ManualClock::starting_at(1);
    let mut alice = Session::with_transport(a, clock.clone(), config(1, 2)).unwrap();
    let mut bob = Session::with_transport(b, clock.clone(), config(2, 2)).unwrap();

    let mut lost = HashSet::new();
    alice.transport_mut().set_loss_filter(move |d| {
        let sequence = u16::from_be_bytes([d[2], d[3]]);
        d[1] == PacketKind::State.as_u16() as u8
            && (sequence == 2 || sequence == 3)
            && lost.insert(sequence)
    });

    for tick in 0..4 {
        send_tick(&mut alice, tick);
        send_tick(&mut bob, tick);
    }
    for tick in 0..2 {
        assert!(bob.state_update().unwrap());
        assert_eq!(bob.state_payload().unwrap()[0], tick);
    }

    // alice stays silent until bob's waiting has moved the clock past the stall
    let start = clock.ticks();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let stop = Arc::clone(&stop);
        let clock = clock.clone();
        thread::spawn(move || {
            while clock.elapsed_since(start) < STALL {
                thread::yield_now();
            }
            while !stop.load(Ordering::SeqCst) {
                let _ = alice.check();
                thread::yield_now();
            }
        })
    };

    assert!(bob.state_update().unwrap());
    assert_eq!(bob.state_payload().unwrap()[0], 2);
    let stalled = clock.elapsed_since(start);

    stop.store(true, Ordering::SeqCst);
    handle.join().unwrap();

    let requests = bob.transport().sent_log().count_of(PacketKind::StateResend) as u32;
    assert!(stalled >= STALL);
    assert!(requests >= STALL / (2 * NET_RESEND));
    assert!(requests <= stalled / NET_RESEND + 1);
    assert_eq!(bob.stats().resend_requests, requests as u64);
}

#[test]
fn test_lost_xor_falls_back_to_resend() {
    let (a, b) = memory_link();
    let clock = ManualClock::starting_at(1);
    let mut alice = Session::with_transport(a, clock.clone(), config(1, 3)).unwrap();
    let mut bob = Session::with_transport(b, clock, config(2, 3)).unwrap();

    let mut lost = HashSet::new();
    alice.transport_mut().set_loss_filter(move |d| {
        let kind = u16::from_be_bytes([d[0], d[1]]);
        let sequence = u16::from_be_bytes([d[2], d[3]]);
        let doomed = (kind == PacketKind::State.as_u16() && sequence == 1)
            || kind == PacketKind::StateXor.as_u16();
        doomed && lost.insert((kind, sequence))
    });

    for tick in 0..6 {
        send_tick(&mut alice, tick);
        send_tick(&mut bob, tick);
    }

    let (stop, handle) = serve_in_background(alice);

    for tick in 0..6 {
        assert!(bob.state_update().unwrap());
        assert_eq!(bob.state_payload().unwrap()[0], tick);
    }

    stop.store(true, Ordering::SeqCst);
    handle.join().unwrap();

    assert_eq!(bob.stats().reconstructions, 0);
    assert!(
        bob.transport()
            .sent_log()
            .sequences_of(PacketKind::StateResend)
            .contains(&1)
    );
}

fn lockstep_peer<T: Transport>(
    mut session: Session<T, ManualClock>,
    ticks: u8,
    finished: Arc<AtomicUsize>,
) -> Vec<u8> {
    let mut seen = Vec::new();
    for tick in 0..ticks {
        send_tick(&mut session, tick);
        if session.state_update().unwrap() {
            seen.push(session.state_payload().unwrap()[0]);
        }
    }

    // the other side may still be waiting on resends from us
    finished.fetch_add(1, Ordering::SeqCst);
    while finished.load(Ordering::SeqCst) < 2 {
        let _ = session.check();
        thread::yield_now();
    }
    seen
}

#[test]
fn test_lockstep_survives_random_loss() {
    const TICKS: u8 = 60;
    const DELAY: u16 = 3;

    let (a, b) = memory_link();
    let clock = ManualClock::starting_at(1);
    let lossy = |inner, seed| {
        LossyTransport::new(
            inner,
            PacketLossSimulation {
                seed: Some(seed),
                ..PacketLossSimulation::with_loss(10.0)
            },
        )
    };

    let alice =
        Session::with_transport(lossy(a, 11), clock.clone(), config(1, DELAY)).unwrap();
    let bob = Session::with_transport(lossy(b, 29), clock, config(2, DELAY)).unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let theirs = {
        let finished = Arc::clone(&finished);
        thread::spawn(move || lockstep_peer(bob, TICKS, finished))
    };
    let ours = lockstep_peer(alice, TICKS, finished);
    let theirs = theirs.join().unwrap();

    let expected: Vec<u8> = (0..TICKS - DELAY as u8 + 1).collect();
    assert_eq!(ours, expected);
    assert_eq!(theirs, expected);
}
