// Shared memory backend and I/O accessor tests
// Run with: cargo test --test shared_memory -- --nocapture

use rpmsg_virtio::Core::io::IoRegion;
use rpmsg_virtio::Core::{HeapSharedMemory, RawHandle, SharedMemoryBackend};
use rpmsg_virtio::RpmsgError;

#[test]
fn test_heap_region_is_zeroed_and_aligned() {
    let shm = HeapSharedMemory::new(4096).unwrap();

    assert_eq!(shm.size(), 4096);
    assert_eq!(shm.as_ptr() as usize % rpmsg_virtio::Core::SharedMemory::REGION_ALIGN, 0);
    assert_eq!(shm.raw_handle(), RawHandle::Heap);

    let io = IoRegion::new(Box::new(shm), 0);
    assert!(io.read_bytes(0, 4096).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn test_heap_region_rejects_zero_size() {
    let err = HeapSharedMemory::new(0).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_io_region_bounds() {
    let io = IoRegion::new(Box::new(HeapSharedMemory::new(256).unwrap()), 0x1000);

    io.block_write(250, &[1, 2, 3, 4, 5, 6]).unwrap();
    let mut back = [0u8; 6];
    io.block_read(250, &mut back).unwrap();
    assert_eq!(back, [1, 2, 3, 4, 5, 6]);

    // One byte past the end
    assert_eq!(
        io.block_write(251, &[0; 6]),
        Err(RpmsgError::OutOfRange { offset: 251, len: 6 })
    );
    assert!(io.block_read(256, &mut [0u8; 1]).is_err());
    assert!(io.block_set(0, 0xAA, 257).is_err());
    // Offsets near usize::MAX must not wrap
    assert!(io.block_read(usize::MAX, &mut [0u8; 2]).is_err());

    io.block_set(16, 0xAA, 8).unwrap();
    assert_eq!(io.read_bytes(16, 8).unwrap(), vec![0xAA; 8]);
}

#[test]
fn test_io_region_address_translation() {
    let io = IoRegion::new(Box::new(HeapSharedMemory::new(512).unwrap()), 0x3ed0_0000);

    assert_eq!(io.offset_to_phys(0), Some(0x3ed0_0000));
    assert_eq!(io.offset_to_phys(511), Some(0x3ed0_01ff));
    assert_eq!(io.offset_to_phys(512), None);

    assert_eq!(io.phys_to_offset(0x3ed0_0040), Some(0x40));
    assert_eq!(io.phys_to_offset(0x3ecf_ffff), None);
    assert_eq!(io.phys_to_offset(0x3ed0_0200), None);
}

#[cfg(target_os = "linux")]
mod linux_tests {
    use rpmsg_virtio::Core::io::IoRegion;
    use rpmsg_virtio::Core::{attach_shared_memory, create_shared_memory, RawHandle, SharedMemoryBackend};

    #[test]
    #[serial_test::serial]
    fn test_create_shared_memory() {
        let size = 4096;
        let shm = create_shared_memory(size, Some("rpmsg_test_create")).unwrap();

        assert_eq!(shm.size(), size);
        assert!(!shm.as_ptr().is_null());

        match shm.raw_handle() {
            RawHandle::Fd(fd) => assert!(fd > 0, "File descriptor should be positive"),
            RawHandle::Heap => panic!("/dev/shm region reported a heap handle"),
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_attach_sees_peer_writes() {
        // Two mappings of one file stand in for the two processors
        let size = 8192;
        let host = IoRegion::new(create_shared_memory(size, Some("rpmsg_test_attach")).unwrap(), 0);
        let remote = IoRegion::new(attach_shared_memory("rpmsg_test_attach", size).unwrap(), 0);

        let pattern: Vec<u8> = (0..100).map(|i| (i % 256) as u8).collect();
        host.block_write(1024, &pattern).unwrap();
        host.flush(1024, pattern.len());

        remote.invalidate(1024, pattern.len());
        assert_eq!(remote.read_bytes(1024, pattern.len()).unwrap(), pattern);

        let _ = std::fs::remove_file("/dev/shm/rpmsg_test_attach");
    }

    #[test]
    #[serial_test::serial]
    fn test_attach_errors() {
        let err = attach_shared_memory("rpmsg_test_missing_region", 4096).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

        let _shm = create_shared_memory(1024, Some("rpmsg_test_small")).unwrap();
        let err = attach_shared_memory("rpmsg_test_small", 4096).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let _ = std::fs::remove_file("/dev/shm/rpmsg_test_small");
    }
}
