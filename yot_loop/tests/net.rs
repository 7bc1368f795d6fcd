//! Readiness waits and TCP resources over loopback.

mod common;

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use common::{Log, init_test_logging};
use yot_loop::{EventLoop, TcpListener, TcpStream};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn echo_over_loopback() {
    init_test_logging();
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let listener = TcpListener::bind(&handle, loopback()).unwrap();
    let addr = listener.local_addr().unwrap();

    event_loop.add_task(async move {
        let (stream, _) = listener.accept().await.unwrap();
        loop {
            let data = stream.recv(1024).await.unwrap();
            if data.is_empty() {
                break;
            }
            stream.send_all(&data).await.unwrap();
        }
    });

    let echoed = event_loop
        .block_on(async move {
            let stream = TcpStream::connect(&handle, addr).await.unwrap();
            assert_eq!(stream.peer_addr().unwrap(), addr);
            stream.send_all(b"hello, loop").await.unwrap();

            let mut echoed = Vec::new();
            while echoed.len() < b"hello, loop".len() {
                let chunk = stream.recv(64).await.unwrap();
                assert!(!chunk.is_empty(), "server closed early");
                echoed.extend(chunk);
            }
            echoed
        })
        .unwrap();

    assert_eq!(echoed, b"hello, loop");
    assert!(event_loop.take_faults().is_empty());
    assert_eq!(event_loop.suspended_tasks(), 0);
    assert!(event_loop.stats().io_wakeups > 0);
}

#[test]
fn accept_blocks_until_a_peer_connects() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let listener = TcpListener::bind(&handle, loopback()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let mut stream = std::net::TcpStream::connect(addr)?;
        stream.write_all(b"ping")?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply)?;
        Ok::<_, io::Error>(reply)
    });

    let start = Instant::now();
    let peer = event_loop
        .block_on(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let request = stream.recv(16).await.unwrap();
            assert_eq!(request, b"ping");
            stream.send_all(b"pong").await.unwrap();
            peer
        })
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(peer.ip().is_loopback());
    assert_eq!(client.join().unwrap().unwrap(), b"pong");
}

#[test]
fn io_only_wait_blocks_instead_of_spinning() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let listener = TcpListener::bind(&handle, loopback()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        std::net::TcpStream::connect(addr).map(drop)
    });

    let start = Instant::now();
    event_loop
        .block_on(async move {
            listener.accept().await.unwrap();
        })
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(100));
    // No timers are pending, so each poll blocks until the socket is ready.
    let polls = event_loop.stats().polls;
    assert!((1..=5).contains(&polls), "{polls} polls for one accept");
    client.join().unwrap().unwrap();
}

#[test]
fn connect_to_a_closed_port_fails() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    // Bind and drop to find a port with nothing listening.
    let addr = std::net::TcpListener::bind(loopback())
        .unwrap()
        .local_addr()
        .unwrap();

    let result = event_loop
        .block_on(async move { TcpStream::connect(&handle, addr).await.map(|_| ()) })
        .unwrap();
    assert!(result.is_err());
}

#[test]
fn readable_callback_runs_once_a_connection_is_pending() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let listener = TcpListener::bind(&handle, loopback()).unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Log::new();

    let wait = {
        let log = log.clone();
        handle
            .on_readable(&listener, move || log.push("readable"))
            .unwrap()
    };
    let client = thread::spawn(move || std::net::TcpStream::connect(addr).map(drop));
    event_loop.run();

    assert_eq!(log.entries(), vec!["readable"]);
    assert!(wait.has_fired());
    client.join().unwrap().unwrap();
}

#[test]
fn second_waiter_in_the_same_direction_is_rejected() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let listener = TcpListener::bind(&handle, loopback()).unwrap();

    let first = handle.on_readable(&listener, || {}).unwrap();
    let err = handle.on_readable(&listener, || {}).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

    // Once the slot is released a new waiter is accepted.
    assert!(first.cancel());
    let second = handle.on_readable(&listener, || {}).unwrap();
    assert!(second.cancel());
}

#[test]
fn cancelled_wait_does_not_hold_the_loop() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let listener = TcpListener::bind(&handle, loopback()).unwrap();
    let log = Log::new();

    let wait = {
        let log = log.clone();
        handle
            .on_readable(&listener, move || log.push("readable"))
            .unwrap()
    };
    assert!(wait.cancel());

    let start = Instant::now();
    event_loop.run();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(log.entries().is_empty());
}
