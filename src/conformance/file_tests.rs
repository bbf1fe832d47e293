//! Open-handle conformance tests and their concurrent variants.

use std::io::SeekFrom;
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use super::{want, SubTest, TestCase, TestResult};
use crate::error::ErrorKind;
use crate::fs::{File, OpenFlags};
use crate::mode::{FileMode, FileType};
use crate::ops;

pub(super) const FILE_TESTS: &[SubTest] = &[
    ("base.file_close", test_close),
    ("file.read", test_read),
    ("file.read_at", test_read_at),
    ("file.seek", test_seek),
    ("file.write", test_write),
    ("file.write_at", test_write_at),
    ("file.read_dir", test_read_dir),
    ("file.stat", test_stat),
    ("file.sync", test_sync),
    ("file.truncate", test_truncate),
    ("file_concurrent.read", test_concurrent_read),
    ("file_concurrent.write", test_concurrent_write),
    ("file_concurrent.stat", test_concurrent_stat),
];

fn test_close(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "foo", b"data", FileMode(0o644)),
    )?;
    let fs = commit();

    let mut file = want("open", ops::open(&*fs, "foo"))?;
    file.close().unwrap();
    assert_eq!(file.close().unwrap_err().kind(), ErrorKind::Closed);

    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut buf).unwrap_err().kind(), ErrorKind::Closed);
    assert_eq!(file.stat().unwrap_err().kind(), ErrorKind::Closed);
    Ok(())
}

fn test_read(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "foo", b"hello world", FileMode(0o644)),
    )?;
    let fs = commit();

    let mut file = want("open", ops::open(&*fs, "foo"))?;
    let mut buf = [0u8; 5];
    assert_eq!(want("read", file.read(&mut buf))?, 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(file.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf, b" worl");
    assert_eq!(file.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'd');
    // End of file reads as zero, repeatedly.
    assert_eq!(file.read(&mut buf).unwrap(), 0);
    assert_eq!(file.read(&mut buf).unwrap(), 0);
    file.close().unwrap();
    Ok(())
}

fn test_read_at(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "foo", b"0123456789", FileMode(0o644)),
    )?;
    let fs = commit();

    let mut file = want("open", ops::open(&*fs, "foo"))?;
    let mut buf = [0u8; 4];
    assert_eq!(want("read_at", file.read_at(&mut buf, 3))?, 4);
    assert_eq!(&buf, b"3456");

    // Positional reads leave the cursor alone.
    let mut cursor_buf = [0u8; 2];
    assert_eq!(file.read(&mut cursor_buf).unwrap(), 2);
    assert_eq!(&cursor_buf, b"01");

    assert_eq!(file.read_at(&mut buf, 8).unwrap(), 2);
    assert_eq!(&buf[..2], b"89");
    assert_eq!(file.read_at(&mut buf, 100).unwrap(), 0);
    file.close().unwrap();
    Ok(())
}

fn test_seek(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "foo", b"0123456789", FileMode(0o644)),
    )?;
    let fs = commit();

    let mut file = want("open", ops::open(&*fs, "foo"))?;
    assert_eq!(want("seek", file.seek(SeekFrom::Start(6)))?, 6);
    let mut buf = [0u8; 2];
    file.read(&mut buf).unwrap();
    assert_eq!(&buf, b"67");

    assert_eq!(file.seek(SeekFrom::Current(-4)).unwrap(), 4);
    file.read(&mut buf).unwrap();
    assert_eq!(&buf, b"45");

    assert_eq!(file.seek(SeekFrom::End(-2)).unwrap(), 8);
    file.read(&mut buf).unwrap();
    assert_eq!(&buf, b"89");

    assert_eq!(
        file.seek(SeekFrom::Current(-100)).unwrap_err().kind(),
        ErrorKind::Invalid
    );
    file.close().unwrap();
    Ok(())
}

fn test_write(c: &TestCase) -> TestResult {
    let fs = c.fs();
    let mut file = want("create", ops::create(&*fs, "foo"))?;
    assert_eq!(want("write", file.write(b"hello"))?, 5);
    assert_eq!(file.write(b" world").unwrap(), 6);
    file.close().unwrap();
    assert_eq!(ops::read_file(&*fs, "foo").unwrap(), b"hello world");

    // Writing mid-file after a seek overlays in place.
    let mut file = ops::open_file(&*fs, "foo", OpenFlags::READ_WRITE, FileMode(0)).unwrap();
    file.seek(SeekFrom::Start(6)).unwrap();
    file.write(b"there").unwrap();
    file.close().unwrap();
    assert_eq!(ops::read_file(&*fs, "foo").unwrap(), b"hello there");

    // Writing past the end zero-fills the gap.
    let mut file = ops::open_file(&*fs, "foo", OpenFlags::READ_WRITE, FileMode(0)).unwrap();
    file.seek(SeekFrom::Start(13)).unwrap();
    file.write(b"x").unwrap();
    file.close().unwrap();
    assert_eq!(ops::read_file(&*fs, "foo").unwrap(), b"hello there\0\0x");
    Ok(())
}

fn test_write_at(c: &TestCase) -> TestResult {
    let fs = c.fs();
    want(
        "write_file",
        ops::write_file(&*fs, "f", b"0123456789", FileMode(0o644)),
    )?;
    let file = want(
        "open_file",
        ops::open_file(&*fs, "f", OpenFlags::READ_WRITE, FileMode(0)),
    )?;
    assert_eq!(want("write_at", file.write_at(b"ABC", 3))?, 3);
    let mut buf = [0u8; 16];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"012ABC6789");
    drop(file);
    assert_eq!(ops::read_file(&*fs, "f").unwrap(), b"012ABC6789");

    // Extending via write_at grows the file.
    let file = ops::open_file(&*fs, "f", OpenFlags::READ_WRITE, FileMode(0)).unwrap();
    assert_eq!(file.write_at(b"end", 10).unwrap(), 3);
    drop(file);
    assert_eq!(ops::read_file(&*fs, "f").unwrap(), b"012ABC6789end");
    Ok(())
}

fn test_read_dir(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want("mkdir", ops::mkdir(&*setup, "dir", FileMode(0o755)))?;
    for name in ["a", "b", "c", "d", "e"] {
        want(
            "write_file",
            ops::write_file(&*setup, &format!("dir/{name}"), b"x", FileMode(0o644)),
        )?;
    }
    let fs = commit();

    let mut dir = want("open", ops::open(&*fs, "dir"))?;
    let first = want("file read_dir", dir.read_dir(2))?;
    let names: Vec<&str> = first.iter().map(|e| e.name()).collect();
    assert_eq!(names, ["a", "b"]);

    let second = dir.read_dir(2).unwrap();
    let names: Vec<&str> = second.iter().map(|e| e.name()).collect();
    assert_eq!(names, ["c", "d"]);

    // Zero drains the remainder; an exhausted cursor yields nothing.
    let rest = dir.read_dir(0).unwrap();
    let names: Vec<&str> = rest.iter().map(|e| e.name()).collect();
    assert_eq!(names, ["e"]);
    assert!(dir.read_dir(0).unwrap().is_empty());
    dir.close().unwrap();

    // Not a directory.
    let mut file = ops::open(&*fs, "dir/a").unwrap();
    assert_eq!(file.read_dir(0).unwrap_err().kind(), ErrorKind::NotDir);
    file.close().unwrap();
    Ok(())
}

fn test_stat(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "dir-less", b"12345", FileMode(0o644)),
    )?;
    let fs = commit();

    let mut file = want("open", ops::open(&*fs, "dir-less"))?;
    let info = want("file stat", file.stat())?;
    assert_eq!(info.name(), "dir-less");
    assert_eq!(info.size(), 5);
    assert_eq!(info.mode().file_type(), FileType::Regular);
    file.close().unwrap();
    Ok(())
}

fn test_sync(c: &TestCase) -> TestResult {
    let fs = c.fs();
    let mut file = want("create", ops::create(&*fs, "foo"))?;
    file.write(b"data").unwrap();
    want("sync", file.sync())?;
    file.close().unwrap();
    Ok(())
}

fn test_truncate(c: &TestCase) -> TestResult {
    let fs = c.fs();
    want(
        "write_file",
        ops::write_file(&*fs, "f", b"0123456789", FileMode(0o644)),
    )?;
    let mut file = want(
        "open_file",
        ops::open_file(&*fs, "f", OpenFlags::READ_WRITE, FileMode(0)),
    )?;
    want("truncate", file.truncate(4))?;
    assert_eq!(file.stat().unwrap().size(), 4);
    file.close().unwrap();
    assert_eq!(ops::read_file(&*fs, "f").unwrap(), b"0123");

    // Extending truncate zero-fills.
    let mut file = ops::open_file(&*fs, "f", OpenFlags::READ_WRITE, FileMode(0)).unwrap();
    file.truncate(6).unwrap();
    file.close().unwrap();
    assert_eq!(ops::read_file(&*fs, "f").unwrap(), b"0123\0\0");
    Ok(())
}

/// Positional reads on one shared handle are safe from many threads.
fn test_concurrent_read(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "foo", b"abcdefgh", FileMode(0o644)),
    )?;
    let fs = commit();

    let file: Arc<dyn File> = Arc::from(want("open", ops::open(&*fs, "foo"))?);
    {
        let mut probe = [0u8; 1];
        want("read_at", file.read_at(&mut probe, 0))?;
    }

    let barrier = Barrier::new(4);
    let failures = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for i in 0..4usize {
            let file = file.clone();
            let barrier = &barrier;
            let failures = &failures;
            scope.spawn(move || {
                barrier.wait();
                let mut buf = [0u8; 2];
                for _ in 0..32 {
                    let offset = (i % 4) as u64 * 2;
                    match file.read_at(&mut buf, offset) {
                        Ok(2) if buf[0] == b'a' + (offset as u8) => {}
                        other => failures.lock().push(format!("read_at: {other:?}")),
                    }
                }
            });
        }
    });
    assert!(failures.into_inner().is_empty());
    Ok(())
}

/// Positional writes to disjoint ranges from many threads all land.
fn test_concurrent_write(c: &TestCase) -> TestResult {
    let fs = c.fs();
    want(
        "write_file",
        ops::write_file(&*fs, "f", &vec![b'.'; 8], FileMode(0o644)),
    )?;
    let file: Arc<dyn File> = Arc::from(want(
        "open_file",
        ops::open_file(&*fs, "f", OpenFlags::READ_WRITE, FileMode(0)),
    )?);
    want("write_at", file.write_at(b".", 0))?;

    let barrier = Barrier::new(4);
    std::thread::scope(|scope| {
        for i in 0..4u8 {
            let file = file.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                let data = [b'0' + i; 2];
                file.write_at(&data, (i as u64) * 2).unwrap();
            });
        }
    });
    drop(file);
    assert_eq!(ops::read_file(&*fs, "f").unwrap(), b"00112233");
    Ok(())
}

fn test_concurrent_stat(c: &TestCase) -> TestResult {
    let (setup, commit) = c.setup();
    want(
        "write_file",
        ops::write_file(&*setup, "foo", b"sizes", FileMode(0o644)),
    )?;
    let fs = commit();

    let file: Arc<dyn File> = Arc::from(want("open", ops::open(&*fs, "foo"))?);
    want("file stat", file.stat())?;

    let barrier = Barrier::new(4);
    let failures = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let file = file.clone();
            let barrier = &barrier;
            let failures = &failures;
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..32 {
                    match file.stat() {
                        Ok(info) if info.size() == 5 && info.name() == "foo" => {}
                        other => failures.lock().push(format!("stat: {other:?}")),
                    }
                }
            });
        }
    });
    assert!(failures.into_inner().is_empty());
    Ok(())
}
