// Echo over a loopback link: the remote announces "rpmsg-echo", the host binds
// to it and streams messages, checking each echo against a precomputed digest.
//
//   cargo run --example echo -- <num_messages> [--auto-exit]
//   RUST_LOG=rpmsg_virtio=debug cargo run --example echo -- 100

use parking_lot::Mutex;
use rpmsg_virtio::Core::io::IoRegion;
use rpmsg_virtio::Core::pool::SharedMemPool;
use rpmsg_virtio::Core::HeapSharedMemory;
use rpmsg_virtio::RPMsg::Buffer::RxBuffer;
use rpmsg_virtio::Virtio::device::VIRTIO_RPMSG_F_NS;
use rpmsg_virtio::Virtio::{LoopbackDevice, LoopbackLink};
use rpmsg_virtio::{Endpoint, EndpointCallback, RpmsgVirtioConfig, TransportBuilder, RPMSG_ADDR_ANY};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const NUM_DESC: u16 = 32;
const SHM_PHYS_BASE: u64 = 0x3ed0_0000;
const SERVICE: &str = "rpmsg-echo";

fn spawn_poller(dev: Arc<LoopbackDevice>, running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            if dev.poll() == 0 {
                dev.wait_for_kick(Duration::from_millis(10));
            }
        }
    })
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let num_messages: usize = match args.get(1).map(|s| s.parse()) {
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            eprintln!("Usage: {} <num_messages> [--auto-exit]", args[0]);
            std::process::exit(1);
        }
        None => 1000,
    };
    let auto_exit = args.get(2).map(|s| s == "--auto-exit").unwrap_or(false);

    println!("Echo: Precomputing {} digests...", num_messages);
    let digests: Arc<Vec<[u8; 32]>> = Arc::new(
        (0..num_messages)
            .map(|i| Sha256::digest(format!("message_{}", i).as_bytes()).into())
            .collect(),
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    // One region, mapped by both sides
    let config = RpmsgVirtioConfig::default();
    let size = NUM_DESC as usize * (config.h2r_buf_size + config.r2h_buf_size) as usize;
    let io = Arc::new(IoRegion::new(Box::new(HeapSharedMemory::new(size)?), SHM_PHYS_BASE));
    let pool = SharedMemPool::new(0, size)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty shared memory pool"))?;
    let link = LoopbackLink::new(NUM_DESC, 1 << VIRTIO_RPMSG_F_NS);

    let matched = Arc::new(AtomicUsize::new(0));
    let mismatched = Arc::new(AtomicUsize::new(0));
    let host_cb: EndpointCallback = {
        let digests = digests.clone();
        let matched = matched.clone();
        let mismatched = mismatched.clone();
        Arc::new(move |_: &Endpoint, rx: &RxBuffer| -> rpmsg_virtio::Result<()> {
            let data = rx.payload()?;
            let index = std::str::from_utf8(&data)
                .ok()
                .and_then(|s| s.strip_prefix("message_"))
                .and_then(|s| s.parse::<usize>().ok());
            let ok = index
                .and_then(|i| digests.get(i))
                .map(|expected| Sha256::digest(&data).as_slice() == expected)
                .unwrap_or(false);
            if ok {
                matched.fetch_add(1, Ordering::SeqCst);
            } else {
                mismatched.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    };

    // The host learns the service address from the remote's announcement
    let bound: Arc<Mutex<Option<Endpoint>>> = Arc::new(Mutex::new(None));
    let host = {
        let bound = bound.clone();
        TransportBuilder::new(link.host(), io.clone())
            .with_config(config.clone())
            .with_shm_pool(pool)
            .on_ns_bind(move |rdev, name, dest| {
                if name != SERVICE {
                    return;
                }
                match rdev.create_endpoint(name, RPMSG_ADDR_ANY, dest, host_cb.clone(), None) {
                    Ok(ept) => *bound.lock() = Some(ept),
                    Err(e) => eprintln!("Host: failed to bind {}: {}", name, e),
                }
            })
            .build()?
    };
    let remote = TransportBuilder::new(link.remote(), io.clone()).with_config(config).build()?;

    let pollers = [
        spawn_poller(link.host(), running.clone()),
        spawn_poller(link.remote(), running.clone()),
    ];

    // Echo everything back to whoever sent it
    let echo: EndpointCallback = Arc::new(|ept: &Endpoint, rx: &RxBuffer| -> rpmsg_virtio::Result<()> {
        let data = rx.payload()?;
        ept.send_to(&data, rx.src())?;
        Ok(())
    });
    let service = remote.create_endpoint(SERVICE, RPMSG_ADDR_ANY, RPMSG_ADDR_ANY, echo, None)?;
    println!("Echo: Remote announced {} at {:#x}", SERVICE, service.addr());

    let deadline = Instant::now() + Duration::from_secs(5);
    let ept = loop {
        if let Some(ept) = bound.lock().clone() {
            break ept;
        }
        if Instant::now() > deadline || !running.load(Ordering::SeqCst) {
            eprintln!("Echo: Host never bound to {}", SERVICE);
            std::process::exit(1);
        }
        thread::sleep(Duration::from_millis(1));
    };
    println!("Echo: Host bound {:#x} -> {:#x}", ept.addr(), ept.dest_addr());

    let start_send = Instant::now();
    let mut sent = 0;
    for i in 0..num_messages {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match ept.send(format!("message_{}", i).as_bytes()) {
            Ok(_) => {
                sent += 1;
                if sent % 100 == 0 {
                    println!("Sent {} messages", sent);
                }
            }
            Err(e) => {
                eprintln!("Failed to send message {}: {}", i, e);
                break;
            }
        }
    }

    let send_time = start_send.elapsed();
    println!("Echo: Sent {} messages in {:.2?}", sent, send_time);
    println!(
        "Echo: Throughput: {:.2} messages/sec",
        sent as f64 / send_time.as_secs_f64()
    );

    // Wait for the echoes to drain
    let drain_deadline = Instant::now() + Duration::from_secs(5);
    while matched.load(Ordering::SeqCst) + mismatched.load(Ordering::SeqCst) < sent
        && Instant::now() < drain_deadline
    {
        thread::sleep(Duration::from_millis(1));
    }
    println!(
        "Echo: {} matched, {} mismatched, {} callback failures",
        matched.load(Ordering::SeqCst),
        mismatched.load(Ordering::SeqCst),
        remote.callback_failures() + host.callback_failures()
    );

    if !auto_exit {
        println!("Press Ctrl+C to exit...");
        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    println!("Echo: Shutting down");
    running.store(false, Ordering::SeqCst);
    for p in pollers {
        let _ = p.join();
    }
    remote.deinit();
    host.deinit();
    Ok(())
}
