//! Tasks and callbacks sharing one loop.
//!
//! A producer and a consumer talk over an `AsyncQueue` while two callback
//! chains count up and down on timers. Set `YOT_DEMO_PORT` to also run an
//! echo server on that port (it keeps the loop alive until interrupted):
//!
//! ```text
//! RUST_LOG=info YOT_DEMO_PORT=30001 cargo run --example demo
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yot_loop::{AsyncQueue, Handle, QueueClosed, TcpListener, TcpStream};

const SLEEP_TIME: Duration = Duration::from_millis(100);

async fn producer(handle: Handle, queue: AsyncQueue<u32>, count: u32) {
    for item in 0..count {
        handle.sleep(SLEEP_TIME).await;
        info!(item, "produced");
        if queue.put(item).is_err() {
            break;
        }
    }
    queue.close();
}

async fn consumer(queue: AsyncQueue<u32>) {
    loop {
        match queue.get().await {
            Ok(item) => info!(item, "consumed"),
            Err(QueueClosed) => {
                info!("queue closed, consumer done");
                break;
            }
        }
    }
}

fn count_down(handle: Handle, current: i32) {
    if current < 0 {
        return;
    }
    info!(current, "down");
    let next = handle.clone();
    handle.call_later(SLEEP_TIME * 2, move || count_down(next, current - 1));
}

fn count_up(handle: Handle, current: u32, stop: u32) {
    if current > stop {
        return;
    }
    info!(current, "up");
    let next = handle.clone();
    handle.call_later(SLEEP_TIME, move || count_up(next, current + 1, stop));
}

async fn echo_server(handle: Handle, addr: SocketAddr) {
    let listener = match TcpListener::bind(&handle, addr) {
        Ok(listener) => listener,
        Err(e) => {
            warn!(%addr, error = %e, "could not start echo server");
            return;
        }
    };
    info!(%addr, "echo server listening");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "connection accepted");
                handle.add_task(echo_handler(stream));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn echo_handler(stream: TcpStream) {
    loop {
        let data = match stream.recv(10_000).await {
            Ok(data) if data.is_empty() => break,
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "recv failed");
                break;
            }
        };
        let mut reply = b"Got: ".to_vec();
        reply.extend_from_slice(&data);
        if let Err(e) = stream.send_all(&reply).await {
            warn!(error = %e, "send failed");
            break;
        }
    }
    info!("connection closed");
}

#[yot_loop::main]
async fn main(handle: Handle) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let queue = AsyncQueue::new(&handle);
    handle.add_task(producer(handle.clone(), queue.clone(), 10));
    handle.add_task(consumer(queue));

    let down = handle.clone();
    handle.call_soon(move || count_down(down, 10));
    let up = handle.clone();
    handle.call_soon(move || count_up(up, 0, 10));

    if let Ok(port) = std::env::var("YOT_DEMO_PORT") {
        match port.parse::<u16>() {
            Ok(port) => {
                let addr = SocketAddr::from(([0, 0, 0, 0], port));
                handle.add_task(echo_server(handle.clone(), addr));
            }
            Err(e) => warn!(%port, error = %e, "ignoring invalid YOT_DEMO_PORT"),
        }
    }
}
