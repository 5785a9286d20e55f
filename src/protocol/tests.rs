// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::DispatchMode;
use crate::core::packet::Packet;
use crate::error::ProtocolError;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::opcodes::{self, PING, PONG, RESERVED};
use crate::transport::session::Session;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn session() -> (Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<Packet>) {
    let (session, rx) = Session::detached("127.0.0.1:1447".parse().unwrap());
    (Arc::new(session), rx)
}

#[test]
fn test_registered_handler_runs_once() {
    let dispatcher = Dispatcher::with_mode(DispatchMode::Sequential);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    dispatcher
        .register(PING, move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let (session, _rx) = session();
    dispatcher.dispatch(&session, Packet::new(PING)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unknown_type_is_dropped_without_closing() {
    let dispatcher = Dispatcher::with_mode(DispatchMode::Sequential);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    dispatcher
        .register(PING, move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let (session, _rx) = session();
    let err = dispatcher.dispatch(&session, Packet::new(PONG)).unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownPacketType(PONG)));
    assert!(!err.is_connection_fatal());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!session.is_closed());
}

#[test]
fn test_reregistration_replaces_handler() {
    let dispatcher = Dispatcher::with_mode(DispatchMode::Sequential);
    let last = Arc::new(Mutex::new(""));
    let first = Arc::clone(&last);
    dispatcher
        .register(PING, move |_, _| {
            *first.lock().unwrap() = "first";
            Ok(())
        })
        .unwrap();
    let second = Arc::clone(&last);
    dispatcher
        .register(PING, move |_, _| {
            *second.lock().unwrap() = "second";
            Ok(())
        })
        .unwrap();

    assert_eq!(dispatcher.len(), 1);
    let (session, _rx) = session();
    dispatcher.dispatch(&session, Packet::new(PING)).unwrap();
    assert_eq!(*last.lock().unwrap(), "second");
}

#[test]
fn test_reserved_type_cannot_be_registered() {
    let dispatcher = Dispatcher::new();
    assert!(dispatcher.register(RESERVED, |_, _| Ok(())).is_err());
    assert!(dispatcher.is_empty());
    assert!(!dispatcher.handles(RESERVED));
}

#[test]
fn test_handler_error_keeps_session_open() {
    let dispatcher = Dispatcher::with_mode(DispatchMode::Sequential);
    dispatcher
        .register(PING, |_, _| Err(ProtocolError::Custom("rejected".into())))
        .unwrap();
    let (session, _rx) = session();
    assert!(dispatcher.dispatch(&session, Packet::new(PING)).is_ok());
    assert!(!session.is_closed());
}

#[test]
fn test_handler_can_reply_through_session() {
    let dispatcher = Dispatcher::with_mode(DispatchMode::Sequential);
    dispatcher
        .register(PING, |session, mut packet| {
            let text = packet.read_string()?;
            let mut reply = Packet::new(PONG);
            reply.write_string(&text);
            session.send(reply)
        })
        .unwrap();

    let (session, mut rx) = session();
    let mut ping = Packet::new(PING);
    ping.write_string("ping");
    dispatcher.dispatch(&session, ping).unwrap();

    let mut reply = rx.try_recv().unwrap();
    assert_eq!(reply.packet_type(), PONG);
    assert_eq!(reply.read_string().unwrap(), "ping");
}

#[tokio::test]
async fn test_concurrent_mode_spawns_handler() {
    let dispatcher = Dispatcher::new();
    assert_eq!(dispatcher.mode(), DispatchMode::Concurrent);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    dispatcher
        .register(PING, move |session, _| {
            tx.send(session.id().clone()).unwrap();
            Ok(())
        })
        .unwrap();

    let (session, _out) = session();
    dispatcher.dispatch(&session, Packet::new(PING)).unwrap();
    let id = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("handler ran")
        .unwrap();
    assert_eq!(&id, session.id());
}

#[test]
fn test_opcode_names() {
    assert_eq!(opcodes::name(PING), "PING");
    assert_eq!(opcodes::name(0x7777), "APPLICATION");
}
