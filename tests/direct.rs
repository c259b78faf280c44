//! Direct views and their exclusion with cursors.

use mmap_handles::{open_rw, MmapError};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn tmp_path(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("mmap_handles_direct_{}_{}", name, std::process::id()));
    p
}

/// Run `f` on its own thread and fail instead of hanging if it blocks.
fn within_deadline<F: FnOnce() + Send + 'static>(what: &str, f: F) {
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(()) => worker.join().expect("worker panicked"),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            worker.join().expect("worker panicked");
        }
        Err(mpsc::RecvTimeoutError::Timeout) => panic!("{what} blocked"),
    }
}

#[test]
fn cursors_block_direct_views() {
    let path = tmp_path("cursors_block_direct_views");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    let reader = map.reader().expect("reader");
    assert!(matches!(map.direct(), Err(MmapError::HandlesOpen)));
    assert!(matches!(map.direct_at(0, 1), Err(MmapError::HandlesOpen)));
    reader.close();

    let writer = map.writer().expect("writer");
    assert!(matches!(map.direct(), Err(MmapError::HandlesOpen)));
    writer.close();

    assert!(map.direct().is_ok());

    drop(map);
    fs::remove_file(&path).expect("delete");
}

#[test]
fn direct_views_block_cursors() {
    let path = tmp_path("direct_views_block_cursors");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    let mut a = map.direct().expect("direct");
    let b = map.direct_at(8, 8).expect("direct_at");
    assert!(matches!(map.reader(), Err(MmapError::DirectOpen)));
    assert!(matches!(map.writer(), Err(MmapError::DirectOpen)));

    map.free(&mut a).expect("free");
    assert!(matches!(map.reader(), Err(MmapError::DirectOpen)));

    drop(b);
    assert_eq!(map.open_handles(), (0, 0, 0));
    assert!(map.reader().is_ok());

    drop(map);
    fs::remove_file(&path).expect("delete");
}

#[test]
fn direct_at_bounds() {
    let path = tmp_path("direct_at_bounds");
    fs::write(&path, [0u8; 100]).expect("seed");
    let map = open_rw(&path).expect("open");

    let view = map.direct_at(99, 1).expect("last byte");
    assert_eq!((view.offset(), view.len()), (99, 1));
    assert!(!view.is_empty());
    drop(view);

    assert!(matches!(
        map.direct_at(100, 1),
        Err(MmapError::OutOfRange { what: "offset", value: 100, limit: 100 })
    ));
    assert!(matches!(
        map.direct_at(90, 11),
        Err(MmapError::OutOfRange { what: "end", value: 101, limit: 100 })
    ));
    assert!(matches!(map.direct_at(10, 0), Err(MmapError::InvalidSize(0))));
    assert_eq!(map.open_handles(), (0, 0, 0));

    drop(map);
    fs::remove_file(&path).expect("delete");
}

#[test]
fn writes_through_view_are_visible_to_cursors() {
    let path = tmp_path("writes_through_view_are_visible_to_cursors");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    {
        let mut view = map.direct_at(100, 5).expect("direct_at");
        view.bytes_mut().expect("bytes_mut").copy_from_slice(b"hello");
        let whole = map.direct().expect("direct");
        assert_eq!(&whole.bytes().expect("bytes")[100..105], b"hello");
    }

    let reader = map.reader().expect("reader");
    let mut buf = [0u8; 5];
    reader.read_at(&mut buf, 100).expect("read_at");
    assert_eq!(&buf, b"hello");

    drop(reader);
    drop(map);
    fs::remove_file(&path).expect("delete");
}

#[test]
fn free_is_idempotent_and_rejects_foreign_views() {
    let path_a = tmp_path("free_foreign_a");
    let path_b = tmp_path("free_foreign_b");
    let _ = fs::remove_file(&path_a);
    let _ = fs::remove_file(&path_b);
    let map_a = open_rw(&path_a).expect("open a");
    let map_b = open_rw(&path_b).expect("open b");

    let mut view = map_a.direct().expect("direct");
    assert!(matches!(map_b.free(&mut view), Err(MmapError::InvalidHandle)));
    assert!(!view.is_released());

    map_a.free(&mut view).expect("free");
    assert!(view.is_released());
    map_a.free(&mut view).expect("free again");
    // An already released view is inert regardless of which mapping is asked.
    map_b.free(&mut view).expect("free released view");

    assert!(matches!(view.bytes(), Err(MmapError::Closed)));
    assert!(matches!(view.bytes_mut(), Err(MmapError::Closed)));

    drop(map_a);
    drop(map_b);
    fs::remove_file(&path_a).expect("delete a");
    fs::remove_file(&path_b).expect("delete b");
}

#[test]
fn stale_view_stays_dead_after_resize() {
    let path = tmp_path("stale_view_stays_dead_after_resize");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    let mut stale = map.direct().expect("direct");
    map.truncate(8192).expect("truncate");
    assert!(stale.is_released());

    // A fresh view after the resize does not revive the old one.
    let fresh = map.direct().expect("direct");
    assert_eq!(fresh.len(), 8192);
    assert!(matches!(stale.bytes(), Err(MmapError::Closed)));
    map.free(&mut stale).expect("free stale");
    assert_eq!(map.open_handles(), (1, 0, 0));

    drop(fresh);
    drop(map);
    fs::remove_file(&path).expect("delete");
}

#[test]
fn copy_between_disjoint_views() {
    let path = tmp_path("copy_between_disjoint_views");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    let moved = path.clone();
    within_deadline("copy between disjoint views", move || {
        let mut src = map.direct_at(0, 16).expect("src");
        let mut dst = map.direct_at(16, 16).expect("dst");
        src.bytes_mut().expect("src bytes_mut").copy_from_slice(b"0123456789abcdef");

        {
            let from = src.bytes().expect("src bytes");
            let mut to = dst.bytes_mut().expect("dst bytes_mut");
            to.copy_from_slice(&from);
        }
        assert_eq!(&*dst.bytes().expect("dst bytes"), b"0123456789abcdef");

        drop(src);
        drop(dst);
        let reader = map.reader().expect("reader");
        let mut buf = [0u8; 32];
        reader.read_at(&mut buf, 0).expect("read_at");
        assert_eq!(&buf[..16], &buf[16..]);
        drop(reader);
        drop(map);
        let _ = fs::remove_file(&moved);
    });
}

#[test]
fn other_views_can_be_dropped_while_one_is_borrowed() {
    let path = tmp_path("other_views_can_be_dropped_while_one_is_borrowed");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    let moved = path.clone();
    within_deadline("dropping another view", move || {
        let a = map.direct_at(0, 8).expect("a");
        let b = map.direct_at(8, 8).expect("b");
        let mut c = map.direct_at(16, 8).expect("c");

        let held = a.bytes().expect("a bytes");
        drop(b);
        map.free(&mut c).expect("free c");
        assert!(c.is_released());
        assert!(!a.is_released());
        assert_eq!(map.open_handles(), (1, 0, 0));
        assert_eq!(held.len(), 8);
        drop(held);

        drop(a);
        drop(map);
        let _ = fs::remove_file(&moved);
    });
}

#[test]
fn overlapping_borrows_follow_shared_xor_mutable() {
    let path = tmp_path("overlapping_borrows_follow_shared_xor_mutable");
    let _ = fs::remove_file(&path);
    let map = open_rw(&path).expect("open");

    let whole = map.direct().expect("whole");
    let mut part = map.direct_at(32, 8).expect("part");
    let mut apart = map.direct_at(64, 8).expect("apart");

    {
        let all = whole.bytes().expect("whole bytes");
        // Shared borrows of overlapping views coexist.
        assert_eq!(&*part.bytes().expect("part bytes"), &all[32..40]);
        assert!(matches!(part.bytes_mut(), Err(MmapError::Borrowed)));
    }

    {
        let mut inner = part.bytes_mut().expect("part bytes_mut");
        inner.fill(9);
        assert!(matches!(whole.bytes(), Err(MmapError::Borrowed)));
        // A view elsewhere in the region is unaffected.
        apart.bytes_mut().expect("apart bytes_mut").fill(1);
    }

    let all = whole.bytes().expect("whole bytes after release");
    assert!(all[32..40].iter().all(|&b| b == 9));
    assert!(all[64..72].iter().all(|&b| b == 1));
    drop(all);

    drop(whole);
    drop(part);
    drop(apart);
    drop(map);
    fs::remove_file(&path).expect("delete");
}
