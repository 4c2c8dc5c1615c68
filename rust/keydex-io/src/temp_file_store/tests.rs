use std::io::{Read, Write};

use crate::temp_file_store::{TemporaryFileStore, create_file_based, create_in_memory};

fn check_write_read(store: &dyn TemporaryFileStore) {
    let mut temp_file = store.allocate_writable(None).unwrap();
    let const_buf = (0..100u8).collect::<Vec<_>>();
    for _ in 0..100 {
        temp_file.write_all(&const_buf).unwrap();
    }
    assert_eq!(temp_file.current_size(), 10000);

    let mut reader = temp_file.into_reader().unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).unwrap();
    assert_eq!(buf.len(), 10000);
    assert_eq!(&buf[..4], &[0, 1, 2, 3]);
    assert_eq!(&buf[9998..], &[98, 99]);
}

#[test]
fn test_file_based_write_read() {
    let store = create_file_based(None).unwrap();
    check_write_read(store.as_ref());
}

#[test]
fn test_in_memory_write_read() {
    let store = create_in_memory();
    check_write_read(store.as_ref());
}

#[test]
fn test_file_removed_when_reader_dropped() {
    let store = create_file_based(None).unwrap();
    let mut temp_file = store.allocate_writable(Some(16)).unwrap();
    temp_file.write_all(b"0123456789abcdef").unwrap();
    let path = temp_file.path().unwrap().to_path_buf();
    assert!(path.exists());

    let reader = temp_file.into_reader().unwrap();
    assert!(path.exists());
    drop(reader);
    assert!(!path.exists());
}

#[test]
fn test_sync_all() {
    let store = create_file_based(None).unwrap();
    let mut temp_file = store.allocate_writable(None).unwrap();
    temp_file.write_all(b"durable").unwrap();
    temp_file.sync_all().unwrap();
    let mut reader = temp_file.into_reader().unwrap();
    let mut buf = String::new();
    reader.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "durable");
}
