// Transport tests over an in-process loopback link.
// Run with: cargo test --test transport -- --nocapture

mod common;

use common::*;
use parking_lot::Mutex;
use rpmsg_virtio::Core::pool::SharedMemPool;
use rpmsg_virtio::RPMsg::Buffer::{HeldRxBuffer, RxBuffer};
use rpmsg_virtio::RPMsg::Structs::RpmsgHeader;
use rpmsg_virtio::Virtio::device::{
    Role, VirtioDevice, VIRTIO_CONFIG_STATUS_ACK, VIRTIO_CONFIG_STATUS_DRIVER, VIRTIO_CONFIG_STATUS_DRIVER_OK,
    VIRTIO_CONFIG_STATUS_FAILED, VIRTIO_CONFIG_STATUS_FEATURES_OK,
};
use rpmsg_virtio::Virtio::queue::{Virtqueue, VqBuf};
use rpmsg_virtio::Virtio::LoopbackLink;
use rpmsg_virtio::{Endpoint, EndpointCallback, RpmsgError, RpmsgVirtioConfig, TransportBuilder, RPMSG_ADDR_ANY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const NUM_DESC: u16 = 8;

#[test]
fn test_init_negotiates_and_prepopulates() {
    init_tracing();
    let l = connect(NUM_DESC, NS);

    assert_eq!(
        l.link.status(),
        VIRTIO_CONFIG_STATUS_ACK
            | VIRTIO_CONFIG_STATUS_DRIVER
            | VIRTIO_CONFIG_STATUS_FEATURES_OK
            | VIRTIO_CONFIG_STATUS_DRIVER_OK
    );
    assert_eq!(l.host.role(), Role::Host);
    assert_eq!(l.remote.role(), Role::Remote);
    assert!(l.host.support_ns());
    assert!(l.remote.support_ns());

    // Name-service endpoint on both sides
    assert_eq!(l.host.endpoint_count(), 1);
    assert_eq!(l.remote.endpoint_count(), 1);
    assert!(l.host.endpoint_by_addr(rpmsg_virtio::RPMSG_NS_EPT_ADDR).is_some());

    // Every host RX descriptor is posted, none of the TX ones
    let host_queues = l.host_dev.queues();
    assert_eq!(host_queues[0].avail_len(), NUM_DESC as usize);
    assert_eq!(host_queues[1].avail_len(), 0);

    assert_eq!(l.host.get_tx_buffer_size(), 512 - 16);
    assert_eq!(l.host.get_rx_buffer_size(), 512 - 16);
    assert_eq!(l.remote.get_tx_buffer_size(), 512 - 16);
    println!("{:?}\n{:?}", l.host, l.remote);
}

#[test]
fn test_init_without_name_service() {
    let l = connect(NUM_DESC, 0);

    assert!(!l.host.support_ns());
    assert!(!l.remote.support_ns());
    assert_eq!(l.host.endpoint_count(), 0);

    // Named endpoints are not announced without the feature
    let _ept = l.host.create_endpoint("quiet", RPMSG_ADDR_ANY, RPMSG_ADDR_ANY, noop(), None).unwrap();
    assert_eq!(l.host_dev.queues()[1].avail_len(), 0);
}

#[test]
fn test_init_failures() {
    let config = quick_config();

    // Host without a pool
    let link = LoopbackLink::new(4, NS);
    let io = heap_region(4096);
    let err = TransportBuilder::new(link.host(), io.clone()).with_config(config.clone()).build().unwrap_err();
    assert!(matches!(err, RpmsgError::Param(_)));

    // Pool too small for the RX ring
    let link = LoopbackLink::new(4, NS);
    let err = TransportBuilder::new(link.host(), io.clone())
        .with_config(config.clone())
        .with_shm_pool(SharedMemPool::new(0, 1024).unwrap())
        .build()
        .unwrap_err();
    assert_eq!(err, RpmsgError::NoBuffer);

    // Invalid configuration
    let link = LoopbackLink::new(4, NS);
    let bad = RpmsgVirtioConfig {
        r2h_buf_size: 16,
        ..config.clone()
    };
    let err = TransportBuilder::new(link.host(), io.clone())
        .with_config(bad)
        .with_shm_pool(SharedMemPool::new(0, 4096).unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(err, RpmsgError::Param(_)));
}

#[test]
fn test_remote_waits_for_driver_ok() {
    let mut config = quick_config();
    config.ready_timeout_ms = 30;

    // Nobody ever brings the host up
    let link = LoopbackLink::new(4, NS);
    let start = Instant::now();
    let err = TransportBuilder::new(link.remote(), heap_region(4096))
        .with_config(config.clone())
        .build()
        .unwrap_err();
    assert_eq!(err, RpmsgError::DevState);
    assert!(start.elapsed() >= Duration::from_millis(30));

    // A failed device is reported without waiting out the timeout
    let link = LoopbackLink::new(4, NS);
    link.host().set_status(VIRTIO_CONFIG_STATUS_FAILED);
    let err = TransportBuilder::new(link.remote(), heap_region(4096))
        .with_config(config)
        .build()
        .unwrap_err();
    assert_eq!(err, RpmsgError::DevState);
}

#[test]
fn test_message_to_unknown_address_is_dropped() {
    init_tracing();
    let l = connect(NUM_DESC, NS);
    let (cb, host_inbox) = recorder();
    // No name: nothing announced
    let a = l.host.create_endpoint("", 0x10, RPMSG_ADDR_ANY, cb, None).unwrap();

    let payload = [0x5A; 64];
    assert_eq!(a.send_to(&payload, 0x20), Ok(64));
    let host_queues = l.host_dev.queues();
    let host_tx = &host_queues[1];
    assert_eq!(host_tx.avail_len(), 1);

    l.pump();

    // Returned to the host untouched, nobody called, nothing failed
    assert_eq!(host_tx.avail_len(), 0);
    assert_eq!(host_tx.used_len(), 1);
    assert_eq!(l.remote.callback_failures(), 0);
    assert!(host_inbox.lock().is_empty());

    // First host TX buffer sits right after the RX ring
    let offset = NUM_DESC as usize * 512;
    let mut raw = [0u8; 16];
    l.io.block_read(offset, &mut raw).unwrap();
    let header = RpmsgHeader::from_bytes(&raw);
    assert_eq!(({ header.src }, { header.dst }, { header.len }), (0x10, 0x20, 64));
    assert_eq!(l.io.read_bytes(offset + 16, 64).unwrap(), payload.to_vec());

    // The returned buffer is the next one handed out
    let tx = a.get_tx_payload_buffer(false).unwrap();
    assert_eq!(tx.offset(), offset);
    a.release_tx_buffer(tx).unwrap();
}

#[test]
fn test_name_service_bind_then_data() {
    init_tracing();
    let binds: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let bound: Arc<Mutex<Option<Endpoint>>> = Arc::new(Mutex::new(None));
    let (remote_cb, remote_inbox) = recorder();

    let l = {
        let binds = binds.clone();
        let bound = bound.clone();
        connect_with(NUM_DESC, NS, quick_config(), |b| b, move |b| {
            b.on_ns_bind(move |rdev, name, dest| {
                binds.lock().push((name.to_owned(), dest));
                let ept = rdev
                    .create_endpoint(name, RPMSG_ADDR_ANY, dest, remote_cb.clone(), None)
                    .unwrap();
                *bound.lock() = Some(ept);
            })
        })
    };

    let (host_cb, host_inbox) = recorder();
    let a = l.host.create_endpoint("chat", 0x30, RPMSG_ADDR_ANY, host_cb, None).unwrap();
    l.pump();

    assert_eq!(*binds.lock(), vec![("chat".to_owned(), 0x30)]);
    let b = bound.lock().clone().unwrap();
    assert_eq!(b.name(), "chat");
    assert_eq!(b.addr(), 1024);
    assert_eq!(b.dest_addr(), 0x30);
    assert!(b.is_ready());

    // Host to remote
    assert_eq!(a.send_to(b"hello remote", b.addr()), Ok(12));
    l.pump();
    assert_eq!(
        *remote_inbox.lock(),
        vec![Received {
            src: 0x30,
            dst: 1024,
            data: b"hello remote".to_vec()
        }]
    );

    // Remote to host; the host endpoint learns its peer on first contact
    assert!(!a.is_ready());
    assert_eq!(b.send(b"hi"), Ok(2));
    l.pump();
    assert_eq!(host_inbox.lock().len(), 1);
    assert_eq!(host_inbox.lock()[0].src, 1024);
    assert_eq!(a.dest_addr(), 1024);
    assert_eq!(a.send(b"now bound"), Ok(9));
    l.pump();
    assert_eq!(remote_inbox.lock().len(), 2);
}

#[test]
fn test_out_of_region_descriptor_does_not_stall_rx() {
    let l = connect(NUM_DESC, 0);
    let (cb, inbox) = recorder();
    let _r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();
    let a = l.host.create_endpoint("", 0x10, 0x20, noop(), None).unwrap();

    // A descriptor pointing below the shared region, queued ahead of real traffic
    let host_queues = l.host_dev.queues();
    let host_tx = &host_queues[1];
    host_tx.add_buffer(&[VqBuf { addr: 0x10, len: 64 }], 1, 0, 0x10).unwrap();
    assert_eq!(a.send(b"legit"), Ok(5));
    l.pump();

    assert_eq!(inbox.lock().len(), 1);
    assert_eq!(inbox.lock()[0].data, b"legit".to_vec());
    // Both descriptors went back to the host
    assert_eq!(host_tx.avail_len(), 0);
    assert_eq!(host_tx.used_len(), 2);

    // The host skips the bad one when it reaps TX buffers
    for i in 0..NUM_DESC as u32 * 2 {
        assert_eq!(a.try_send(&i.to_le_bytes()), Ok(4));
        l.pump();
    }
    assert_eq!(inbox.lock().len(), 1 + NUM_DESC as usize * 2);
}

#[test]
fn test_first_contact_binding_is_kept() {
    let l = connect(NUM_DESC, 0);
    let (remote_cb, remote_inbox) = recorder();
    let (first_cb, first_inbox) = recorder();
    let r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, remote_cb, None).unwrap();
    let first = l.host.create_endpoint("", 0x10, 0x20, first_cb, None).unwrap();
    let second = l.host.create_endpoint("", 0x11, 0x20, noop(), None).unwrap();

    first.send(b"one").unwrap();
    l.pump();
    assert_eq!(r.dest_addr(), 0x10);

    second.send(b"two").unwrap();
    l.pump();
    assert_eq!(r.dest_addr(), 0x10);
    let srcs: Vec<u32> = remote_inbox.lock().iter().map(|m| m.src).collect();
    assert_eq!(srcs, vec![0x10, 0x11]);

    // Replies still go to the first peer
    r.send(b"back").unwrap();
    l.pump();
    assert_eq!(first_inbox.lock().len(), 1);
    assert_eq!(first_inbox.lock()[0].dst, 0x10);
}

#[test]
fn test_remote_holds_rx_buffer() {
    let l = connect(NUM_DESC, 0);
    let held: Arc<Mutex<Vec<HeldRxBuffer>>> = Arc::new(Mutex::new(Vec::new()));
    let second_hold_refused = Arc::new(AtomicBool::new(false));

    let cb: EndpointCallback = {
        let held = held.clone();
        let refused = second_hold_refused.clone();
        Arc::new(move |ept: &Endpoint, rx: &RxBuffer| -> rpmsg_virtio::Result<()> {
            if let Some(h) = ept.hold_rx_buffer(rx) {
                held.lock().push(h);
            }
            refused.store(rx.hold().is_none() && rx.is_held(), Ordering::SeqCst);
            Ok(())
        })
    };
    let r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();
    let a = l.host.create_endpoint("", 0x10, RPMSG_ADDR_ANY, noop(), None).unwrap();

    a.send_to(b"keep me", 0x20).unwrap();
    l.pump();

    // Still owned by the remote
    let host_queues = l.host_dev.queues();
    let host_tx = &host_queues[1];
    assert_eq!(host_tx.used_len(), 0);
    assert!(second_hold_refused.load(Ordering::SeqCst));

    let buffer = held.lock().pop().unwrap();
    assert_eq!(buffer.payload().unwrap(), b"keep me".to_vec());
    assert_eq!(buffer.src(), 0x10);
    assert_eq!(buffer.len(), 7);

    r.release_rx_buffer(buffer).unwrap();
    assert_eq!(host_tx.used_len(), 1);
}

#[test]
fn test_host_holds_rx_buffer() {
    let l = connect(NUM_DESC, 0);
    let held: Arc<Mutex<Option<HeldRxBuffer>>> = Arc::new(Mutex::new(None));

    let cb: EndpointCallback = {
        let held = held.clone();
        Arc::new(move |_: &Endpoint, rx: &RxBuffer| -> rpmsg_virtio::Result<()> {
            *held.lock() = rx.hold();
            Ok(())
        })
    };
    let a = l.host.create_endpoint("", 0x10, RPMSG_ADDR_ANY, cb, None).unwrap();
    let r = l.remote.create_endpoint("", 0x20, 0x10, noop(), None).unwrap();

    let host_queues = l.host_dev.queues();

    let host_rx = &host_queues[0];
    r.send(b"from remote").unwrap();
    assert_eq!(host_rx.avail_len(), NUM_DESC as usize - 1);

    l.pump();
    assert_eq!(host_rx.avail_len(), NUM_DESC as usize - 1);

    let buffer = held.lock().take().unwrap();
    assert_eq!(buffer.dst(), 0x10);
    let mut out = [0u8; 4];
    assert_eq!(buffer.read(0, &mut out), Ok(4));
    assert_eq!(&out, b"from");

    a.release_rx_buffer(buffer).unwrap();
    assert_eq!(host_rx.avail_len(), NUM_DESC as usize);
}

#[test]
fn test_released_tx_buffer_is_reused() {
    let l = connect(NUM_DESC, 0);
    let a = l.host.create_endpoint("", 0x10, 0x20, noop(), None).unwrap();
    let r = l.remote.create_endpoint("", 0x20, 0x10, noop(), None).unwrap();

    let first = a.get_tx_payload_buffer(false).unwrap();
    let offset = first.offset();
    a.release_tx_buffer(first).unwrap();
    let again = a.get_tx_payload_buffer(true).unwrap();
    assert_eq!(again.offset(), offset);
    a.release_tx_buffer(again).unwrap();

    let first = r.get_tx_payload_buffer(false).unwrap();
    let (idx, offset) = (first.idx(), first.offset());
    r.release_tx_buffer(first).unwrap();
    let again = r.get_tx_payload_buffer(false).unwrap();
    assert_eq!((again.idx(), again.offset()), (idx, offset));

    // A reclaimed buffer still sends normally
    let mut again = again;
    again.write(0, b"recycled").unwrap();
    assert_eq!(r.send_nocopy(again, 8), Ok(8));
}

#[test]
fn test_send_nocopy() {
    let l = connect(NUM_DESC, 0);
    let (cb, inbox) = recorder();
    let _r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();
    let a = l.host.create_endpoint("", 0x10, RPMSG_ADDR_ANY, noop(), None).unwrap();

    let mut tx = a.get_tx_payload_buffer(true).unwrap();
    assert_eq!(tx.capacity(), 496);
    tx.write(0, b"zero").unwrap();
    tx.write(4, b"-copy").unwrap();
    assert!(tx.write(490, &[0; 7]).is_err());
    let mut back = [0u8; 9];
    tx.read(0, &mut back).unwrap();
    assert_eq!(&back, b"zero-copy");

    assert_eq!(a.send_to_nocopy(tx, 9, 0x20), Ok(9));
    l.pump();
    assert_eq!(inbox.lock()[0].data, b"zero-copy".to_vec());

    // Too long: rejected and the buffer goes back to the reclaimer
    let tx = a.get_tx_payload_buffer(true).unwrap();
    let offset = tx.offset();
    assert_eq!(
        a.send_to_nocopy(tx, 497, 0x20),
        Err(RpmsgError::BufferSize { len: 497, capacity: 496 })
    );
    let tx = a.get_tx_payload_buffer(false).unwrap();
    assert_eq!(tx.offset(), offset);

    // Unbound endpoint: nowhere to send
    assert_eq!(a.send_nocopy(tx, 1), Err(RpmsgError::Addr(RPMSG_ADDR_ANY)));
    assert_eq!(a.get_tx_payload_buffer(false).unwrap().offset(), offset);
}

#[test]
fn test_oversized_payload_is_truncated() {
    let l = connect(NUM_DESC, 0);
    let (cb, inbox) = recorder();
    let _r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();
    let a = l.host.create_endpoint("", 0x10, 0x20, noop(), None).unwrap();

    let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
    assert_eq!(a.send(&data), Ok(496));
    l.pump();
    assert_eq!(inbox.lock()[0].data, data[..496].to_vec());
}

#[test]
fn test_send_argument_errors() {
    let l = connect(NUM_DESC, 0);
    let a = l.host.create_endpoint("", 0x10, RPMSG_ADDR_ANY, noop(), None).unwrap();

    assert_eq!(a.send(b"x"), Err(RpmsgError::Addr(RPMSG_ADDR_ANY)));
    assert_eq!(a.try_send(b"x"), Err(RpmsgError::Addr(RPMSG_ADDR_ANY)));
    assert!(matches!(a.send_to(b"x", RPMSG_ADDR_ANY), Err(RpmsgError::Param(_))));
    assert!(matches!(
        l.host.send_offchannel_raw(0x10, RPMSG_ADDR_ANY, b"x", false),
        Err(RpmsgError::Param(_))
    ));

    // Explicit source address
    let (cb, inbox) = recorder();
    let _r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();
    assert_eq!(a.send_offchannel(0x77, 0x20, b"spoofed"), Ok(7));
    assert_eq!(a.try_send_offchannel(0x78, 0x20, b"again"), Ok(5));
    l.pump();
    let srcs: Vec<u32> = inbox.lock().iter().map(|m| m.src).collect();
    assert_eq!(srcs, vec![0x77, 0x78]);
}

#[test]
fn test_callback_errors_are_counted() {
    let l = connect(NUM_DESC, 0);
    let cb: EndpointCallback =
        Arc::new(|_: &Endpoint, _: &RxBuffer| -> rpmsg_virtio::Result<()> { Err(RpmsgError::Param("rejected")) });
    let _r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();
    let a = l.host.create_endpoint("", 0x10, 0x20, noop(), None).unwrap();

    a.send(b"one").unwrap();
    a.send(b"two").unwrap();
    l.pump();

    assert_eq!(l.remote.callback_failures(), 2);
    // Buffers still went back
    assert_eq!(l.host_dev.queues()[1].used_len(), 2);
}

#[test]
fn test_remote_send_times_out_when_host_stalls() {
    init_tracing();
    let l = connect(4, 0);
    let r = l.remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, noop(), None).unwrap();

    // The host never services its RX ring, so the remote runs dry
    for i in 0..4u8 {
        assert_eq!(r.try_send_to(&[i], 0x10), Ok(1));
    }
    assert_eq!(r.try_send_to(b"x", 0x10), Err(RpmsgError::NoBuffer));

    let start = Instant::now();
    assert_eq!(r.send_to(b"x", 0x10), Err(RpmsgError::NoBuffer));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(200), "gave up after {:?}", waited);
    assert!(waited < Duration::from_secs(5), "waited {:?}", waited);

    // Once the host drains its ring, buffers flow again
    l.pump();
    assert_eq!(r.try_send_to(b"x", 0x10), Ok(1));
}

#[test]
fn test_host_send_times_out_when_remote_stalls() {
    let l = connect(4, 0);
    let a = l.host.create_endpoint("", 0x10, 0x20, noop(), None).unwrap();

    for _ in 0..4 {
        a.try_send(b"x").unwrap();
    }
    assert_eq!(a.try_send(b"x"), Err(RpmsgError::NoBuffer));
    let start = Instant::now();
    assert_eq!(a.send(b"x"), Err(RpmsgError::NoBuffer));
    assert!(start.elapsed() >= Duration::from_millis(200));

    l.pump();
    assert_eq!(a.try_send(b"x"), Ok(1));
}

#[test]
fn test_blocking_send_resumes_when_buffer_returns() {
    let mut config = quick_config();
    config.tx_timeout_ms = 5_000;
    let l = connect_with(2, 0, config, |b| b, |b| b);
    let a = l.host.create_endpoint("", 0x10, 0x20, noop(), None).unwrap();
    a.try_send(b"1").unwrap();
    a.try_send(b"2").unwrap();

    let remote_dev = l.remote_dev.clone();
    let drainer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        remote_dev.poll()
    });
    assert_eq!(a.send(b"3"), Ok(1));
    assert_eq!(drainer.join().unwrap(), 1);
}

#[test]
fn test_host_overcommitted_pool_buffers_report_no_buffer() {
    // Pool with room for more TX buffers than there are descriptors
    let config = quick_config();
    let link = LoopbackLink::new(2, 0);
    let size = region_size(2, &config) * 2;
    let io = heap_region(size);
    let remote_dev = link.remote();
    let host = TransportBuilder::new(link.host(), io.clone())
        .with_config(config.clone())
        .with_shm_pool(SharedMemPool::new(0, size).unwrap())
        .build()
        .unwrap();
    let remote = TransportBuilder::new(remote_dev.clone(), io).with_config(config).build().unwrap();
    let (cb, inbox) = recorder();
    let _r = remote.create_endpoint("", 0x20, RPMSG_ADDR_ANY, cb, None).unwrap();

    // Nothing is posted yet, so every acquisition sees free descriptors
    let bufs: Vec<_> = (0..3).map(|_| host.get_tx_payload_buffer(false).unwrap()).collect();
    let results: Vec<_> = bufs
        .into_iter()
        .map(|mut tx| {
            tx.write(0, b"x").unwrap();
            host.send_offchannel_nocopy(0x10, 0x20, tx, 1)
        })
        .collect();
    assert_eq!(results, vec![Ok(1), Ok(1), Err(RpmsgError::NoBuffer)]);

    // Once the remote returns buffers the reclaimed one goes out
    assert_eq!(remote_dev.poll(), 1);
    assert_eq!(inbox.lock().len(), 2);
    assert_eq!(host.send_offchannel_raw(0x10, 0x20, b"again", false), Ok(5));
    remote_dev.poll();
    assert_eq!(inbox.lock().len(), 3);
    assert_eq!(inbox.lock()[2].data, b"again".to_vec());
}

#[test]
fn test_deinit_tears_everything_down() {
    let destroyed: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let l = {
        let destroyed = destroyed.clone();
        connect_with(NUM_DESC, NS, quick_config(), |b| b, move |b| {
            b.on_ns_unbind(move |_, name, dest| destroyed.lock().push((name.to_owned(), dest)))
        })
    };
    let a = l.host.create_endpoint("svc", RPMSG_ADDR_ANY, RPMSG_ADDR_ANY, noop(), None).unwrap();
    assert_eq!(l.host.endpoint_count(), 2);

    l.host.deinit();
    l.pump();

    assert!(!l.host.is_active());
    assert_eq!(l.host.endpoint_count(), 0);
    assert_eq!(*destroyed.lock(), vec![("svc".to_owned(), 1024)]);

    // The endpoint handle is detached; the device refuses work
    assert_eq!(a.addr(), RPMSG_ADDR_ANY);
    assert!(a.device().is_none());
    assert!(matches!(a.send_to(b"x", 0x20), Err(RpmsgError::Param(_))));
    assert_eq!(l.host.send_offchannel_raw(0x10, 0x20, b"x", false), Err(RpmsgError::DevState));
    assert_eq!(l.host.get_tx_payload_buffer(false).unwrap_err(), RpmsgError::DevState);
    assert!(l
        .host
        .create_endpoint("late", RPMSG_ADDR_ANY, RPMSG_ADDR_ANY, noop(), None)
        .is_err());
}

#[test]
fn test_nocopy_send_after_deinit_is_refused() {
    let l = connect(NUM_DESC, 0);
    let host_queues = l.host_dev.queues();
    let tx = l.host.get_tx_payload_buffer(false).unwrap();
    let remote_tx = l.remote.get_tx_payload_buffer(false).unwrap();

    l.host.deinit();
    l.remote.deinit();

    assert_eq!(l.host.send_offchannel_nocopy(0x10, 0x20, tx, 1), Err(RpmsgError::DevState));
    assert_eq!(
        l.remote.send_offchannel_nocopy(0x20, 0x10, remote_tx, 1),
        Err(RpmsgError::DevState)
    );
    // Nothing reached either send queue
    assert_eq!(host_queues[1].avail_len(), 0);
    assert_eq!(host_queues[0].used_len(), 0);
}
