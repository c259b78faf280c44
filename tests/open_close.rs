//! Open flags, initial sizing, and close behavior.

use mmap_handles::{create, open_ro, open_rw, Access, MapOptions, Mapping, MmapError};
use std::fs;
use std::path::PathBuf;

fn tmp_path(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("mmap_handles_open_{}_{}", name, std::process::id()));
    p
}

#[test]
fn new_file_is_one_zeroed_page() {
    let path = tmp_path("new_file_is_one_zeroed_page");
    let _ = fs::remove_file(&path);

    let map = open_rw(&path).expect("open rw");
    assert_eq!(map.len(), map.page_size());
    assert_eq!(fs::metadata(&path).expect("stat").len(), map.page_size() as u64);
    assert_eq!(map.page_count(), (1, 0));

    let view = map.direct().expect("direct");
    assert!(view.bytes().expect("bytes").iter().all(|&b| b == 0));
    view.release();

    map.close().expect("close");
    fs::remove_file(&path).expect("delete");
}

#[test]
fn write_close_reopen_read() {
    let path = tmp_path("write_close_reopen_read");
    let _ = fs::remove_file(&path);

    let map = MapOptions::new()
        .write(true)
        .create(true)
        .open(&path)
        .expect("open");

    let writer = map.writer().expect("writer");
    assert_eq!(writer.write_at(&[1, 2, 3, 4], 0).expect("write_at"), 4);
    writer.close();

    let reader = map.reader().expect("reader");
    let mut buf = [0u8; 4];
    assert_eq!(reader.read_at(&mut buf, 0).expect("read_at"), 4);
    assert_eq!(buf, [1, 2, 3, 4]);
    reader.close();
    map.close().expect("close");

    // The bytes reached the file.
    let ro = open_ro(&path).expect("open ro");
    let reader = ro.reader().expect("reader");
    let mut buf = [0u8; 4];
    reader.read_at(&mut buf, 0).expect("read_at");
    assert_eq!(buf, [1, 2, 3, 4]);
    drop(reader);
    drop(ro);

    fs::remove_file(&path).expect("delete");
}

#[test]
fn existing_file_keeps_its_size() {
    let path = tmp_path("existing_file_keeps_its_size");
    fs::write(&path, b"0123456789").expect("seed");

    let map = open_rw(&path).expect("open rw");
    assert_eq!(map.len(), 10);
    let reader = map.reader().expect("reader");
    assert_eq!(reader.peek(9).expect("peek"), b'9');
    drop(reader);
    drop(map);

    fs::remove_file(&path).expect("delete");
}

#[test]
fn truncate_on_open_zeroes_existing_content() {
    let path = tmp_path("truncate_on_open_zeroes_existing_content");
    fs::write(&path, vec![0xFF; 10_000]).expect("seed");

    let map = MapOptions::new()
        .write(true)
        .truncate(true)
        .page_size(4096)
        .open(&path)
        .expect("open trunc");
    assert_eq!(map.len(), 4096);

    let view = map.direct().expect("direct");
    assert!(view.bytes().expect("bytes").iter().all(|&b| b == 0));
    drop(view);
    map.close().expect("close");

    let on_disk = fs::read(&path).expect("read back");
    assert_eq!(on_disk.len(), 4096);
    assert!(on_disk.iter().all(|&b| b == 0));

    fs::remove_file(&path).expect("delete");
}

#[test]
fn create_helper_resets_file() {
    let path = tmp_path("create_helper_resets_file");
    fs::write(&path, b"stale").expect("seed");

    let map = create(&path).expect("create");
    assert_eq!(map.len(), map.page_size());
    assert_eq!(map.reader().expect("reader").peek(0).expect("peek"), 0);
    drop(map);

    fs::remove_file(&path).expect("delete");
}

#[test]
fn unsupported_and_inconsistent_flags() {
    let path = tmp_path("unsupported_and_inconsistent_flags");
    let _ = fs::remove_file(&path);

    let cases = [
        MapOptions::new().access(Access::WriteOnly),
        MapOptions::new().write(true).append(true),
    ];
    for opts in cases {
        assert!(matches!(opts.open(&path), Err(MmapError::UnsupportedFlag(_))));
    }

    let cases = [
        MapOptions::new().create(true),
        MapOptions::new().write(true).create_new(true),
        MapOptions::new().sync(true),
        MapOptions::new().truncate(true),
    ];
    for opts in cases {
        assert!(matches!(opts.open(&path), Err(MmapError::InvalidFlags(_))));
    }
    assert!(!path.exists());
}

#[test]
fn create_new_fails_on_existing_file() {
    let path = tmp_path("create_new_fails_on_existing_file");
    fs::write(&path, b"x").expect("seed");

    let err = MapOptions::new()
        .write(true)
        .create(true)
        .create_new(true)
        .open(&path)
        .unwrap_err();
    match err {
        MmapError::Io { name, source, .. } => {
            assert_eq!(name, path);
            assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
        }
        other => panic!("expected Io error, got {other:?}"),
    }

    fs::remove_file(&path).expect("delete");
}

#[test]
fn missing_file_read_only_is_io_error() {
    let path = tmp_path("missing_file_read_only_is_io_error");
    let _ = fs::remove_file(&path);

    let err = open_ro(&path).unwrap_err();
    assert!(matches!(err, MmapError::Io { .. }));
    assert!(err.to_string().contains("could not open file"));
}

#[test]
fn empty_file_read_only_is_rejected() {
    let path = tmp_path("empty_file_read_only_is_rejected");
    fs::write(&path, b"").expect("seed");

    assert!(matches!(open_ro(&path), Err(MmapError::EmptyFile(p)) if p == path));

    fs::remove_file(&path).expect("delete");
}

#[cfg(unix)]
#[test]
fn raw_flags_open() {
    let path = tmp_path("raw_flags_open");
    let _ = fs::remove_file(&path);

    let map = MapOptions::from_flags(libc::O_RDWR | libc::O_CREAT, 0o600)
        .open(&path)
        .expect("open from flags");
    assert!(map.is_writable());
    assert!(!map.is_write_sync());
    drop(map);

    assert!(matches!(
        MapOptions::from_flags(libc::O_WRONLY, 0o600).open(&path),
        Err(MmapError::UnsupportedFlag(_))
    ));

    fs::remove_file(&path).expect("delete");
}

#[test]
fn read_only_mapping_refuses_writes() {
    let path = tmp_path("read_only_mapping_refuses_writes");
    fs::write(&path, b"read only").expect("seed");

    let map = open_ro(&path).expect("open ro");
    assert!(!map.is_writable());
    assert!(matches!(map.writer(), Err(MmapError::ReadOnly)));
    assert!(matches!(map.sync(true), Err(MmapError::ReadOnly)));
    assert!(matches!(map.truncate(100), Err(MmapError::ReadOnly)));
    assert!(matches!(map.add_pages(1), Err(MmapError::ReadOnly)));

    let mut view = map.direct().expect("direct");
    assert_eq!(&*view.bytes().expect("bytes"), b"read only");
    assert!(matches!(view.bytes_mut(), Err(MmapError::ReadOnly)));
    map.free(&mut view).expect("free");

    // Readers still work.
    let reader = map.reader().expect("reader");
    assert_eq!(reader.peek(0).expect("peek"), b'r');
    drop(reader);
    drop(map);

    fs::remove_file(&path).expect("delete");
}

#[test]
fn close_invalidates_everything_and_is_idempotent() {
    let path = tmp_path("close_invalidates_everything");
    let _ = fs::remove_file(&path);

    let map = open_rw(&path).expect("open");
    let reader = map.reader().expect("reader");
    let writer = map.writer().expect("writer");
    assert_eq!(map.open_handles(), (0, 1, 1));

    map.close().expect("close");
    assert!(map.is_closed());
    assert_eq!(map.len(), 0);
    assert_eq!(map.open_handles(), (0, 0, 0));
    assert!(reader.is_closed());
    assert!(writer.is_closed());

    let mut buf = [0u8; 4];
    assert!(matches!(reader.read(&mut buf), Err(MmapError::Closed)));
    assert!(matches!(reader.peek(0), Err(MmapError::Closed)));
    assert!(matches!(reader.len(), Err(MmapError::Closed)));
    assert!(matches!(writer.write(b"x"), Err(MmapError::Closed)));
    assert!(matches!(writer.poke(1, 0), Err(MmapError::Closed)));
    assert!(matches!(map.reader(), Err(MmapError::Closed)));
    assert!(matches!(map.writer(), Err(MmapError::Closed)));
    assert!(matches!(map.direct(), Err(MmapError::Closed)));
    assert!(matches!(map.sync(true), Err(MmapError::Closed)));
    assert!(matches!(map.truncate(10), Err(MmapError::Closed)));
    assert!(matches!(map.add_pages(1), Err(MmapError::Closed)));

    // Closing a stale cursor and the mapping again are no-ops.
    reader.close();
    writer.close();
    map.close().expect("second close");

    fs::remove_file(&path).expect("delete");
}

#[test]
fn close_releases_direct_views() {
    let path = tmp_path("close_releases_direct_views");
    let _ = fs::remove_file(&path);

    let map = open_rw(&path).expect("open");
    let mut whole = map.direct().expect("direct");
    let part = map.direct_at(0, 16).expect("direct_at");
    assert_eq!(map.open_handles(), (2, 0, 0));

    map.close().expect("close");
    assert!(whole.is_released());
    assert!(part.is_released());
    assert!(matches!(whole.bytes(), Err(MmapError::Closed)));
    assert!(matches!(part.bytes(), Err(MmapError::Closed)));

    // Freeing after the cascade is a no-op.
    map.free(&mut whole).expect("free after close");

    fs::remove_file(&path).expect("delete");
}

#[test]
fn dropping_mapping_closes_handles() {
    let path = tmp_path("dropping_mapping_closes_handles");
    let _ = fs::remove_file(&path);

    let map = open_rw(&path).expect("open");
    let reader = map.reader().expect("reader");
    drop(map);

    assert!(reader.is_closed());
    assert!(matches!(reader.read_byte(), Err(MmapError::Closed)));

    fs::remove_file(&path).expect("delete");
}

#[test]
fn sync_flushes_writable_mapping() {
    let path = tmp_path("sync_flushes_writable_mapping");
    let _ = fs::remove_file(&path);

    let map = Mapping::options()
        .write(true)
        .create(true)
        .open(&path)
        .expect("open");
    let writer = map.writer().expect("writer");
    writer.write(b"persist").expect("write");
    writer.close();

    map.sync(false).expect("async sync");
    map.sync(true).expect("sync");

    let on_disk = fs::read(&path).expect("read back");
    assert_eq!(&on_disk[..7], b"persist");

    drop(map);
    fs::remove_file(&path).expect("delete");
}
