//! Stream handle state machine tests.

mod common;

use common::{assert_file_content, assert_kind, test_config, TestDrive};
use drivefs_core::testing::MemoryDrive;
use drivefs_core::{DriveError, ErrorKind, FileHandle, RemoteError};
use std::io::SeekFrom;

async fn drive_with_file(data: &[u8]) -> TestDrive {
    let drive = MemoryDrive::new();
    drive.add_file(&drive.root_id(), "f.txt", data);
    TestDrive::with_drive(drive, test_config()).await
}

async fn open_file(t: &TestDrive, path: &str) -> FileHandle {
    t.fs.open(path)
        .await
        .unwrap()
        .into_file()
        .expect("expected a file handle")
}

async fn read_string(file: &mut FileHandle) -> String {
    String::from_utf8(file.read_to_end().await.unwrap()).unwrap()
}

#[tokio::test]
async fn test_read_after_write_fails_without_io() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;

    file.write(b"new").await.unwrap();
    let mut buf = [0u8; 4];
    let err = assert_kind(file.read(&mut buf).await, ErrorKind::InvalidArgument);
    assert!(matches!(err, DriveError::WrongState { state: "writing", .. }));
    assert_eq!(t.drive.calls("download"), 0);

    file.close().await.unwrap();
    assert_file_content(&t.fs, "/f.txt", b"new").await;
}

#[tokio::test]
async fn test_write_after_read_fails() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;

    let mut buf = [0u8; 2];
    file.read(&mut buf).await.unwrap();
    assert_kind(file.write(b"x").await, ErrorKind::InvalidArgument);
    assert_eq!(t.drive.calls("update_node"), 0);
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_handle_rejects_io() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;
    file.close().await.unwrap();

    let mut buf = [0u8; 2];
    assert_kind(file.read(&mut buf).await, ErrorKind::InvalidArgument);
    assert_kind(file.write(b"x").await, ErrorKind::InvalidArgument);
    assert_kind(file.seek(SeekFrom::Start(0)).await, ErrorKind::InvalidArgument);
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_seek_past_end_keeps_offset() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;

    let mut buf = [0u8; 1];
    assert_eq!(file.read(&mut buf).await.unwrap(), 1);
    let err = assert_kind(file.seek(SeekFrom::Start(6)).await, ErrorKind::InvalidArgument);
    assert!(matches!(err, DriveError::OutOfRange { offset: 6, size: 5, .. }));
    assert_eq!(file.offset(), 1);
    assert_kind(file.seek(SeekFrom::Current(-2)).await, ErrorKind::InvalidArgument);
    assert_eq!(file.offset(), 1);
    assert_eq!(read_string(&mut file).await, "ello");
}

#[tokio::test]
async fn test_seek_while_reading() {
    let t = drive_with_file(b"hello world").await;
    let mut file = open_file(&t, "/f.txt").await;

    let mut buf = [0u8; 1];
    file.read(&mut buf).await.unwrap();
    assert_eq!(file.seek(SeekFrom::Current(5)).await.unwrap(), 6);
    assert_eq!(t.drive.calls("download"), 1);
    assert_eq!(read_string(&mut file).await, "world");

    assert_eq!(file.seek(SeekFrom::End(-5)).await.unwrap(), 6);
    assert_eq!(read_string(&mut file).await, "world");

    assert_eq!(file.seek(SeekFrom::Current(-5)).await.unwrap(), 6);
    assert_eq!(read_string(&mut file).await, "world");

    assert_eq!(file.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(read_string(&mut file).await, "hello world");
    assert_eq!(t.drive.calls("download"), 4);

    assert_eq!(file.seek(SeekFrom::End(0)).await.unwrap(), 11);
    assert_eq!(read_string(&mut file).await, "");
}

#[tokio::test]
async fn test_seek_before_first_read() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;
    t.drive.reset_calls();

    assert_eq!(file.seek(SeekFrom::Start(2)).await.unwrap(), 2);
    assert_eq!(file.seek(SeekFrom::Current(1)).await.unwrap(), 3);
    assert_eq!(t.drive.total_calls(), 0);
    assert_kind(file.seek(SeekFrom::End(0)).await, ErrorKind::InvalidArgument);
    assert_kind(file.seek(SeekFrom::Start(6)).await, ErrorKind::InvalidArgument);
    assert_eq!(file.offset(), 3);

    assert_eq!(read_string(&mut file).await, "lo");
}

#[tokio::test]
async fn test_seek_at_end_reads_nothing() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;

    file.seek(SeekFrom::Start(5)).await.unwrap();
    assert_eq!(read_string(&mut file).await, "");
    assert_eq!(t.drive.calls("download"), 0);
}

#[tokio::test]
async fn test_seek_while_writing_pads_with_zeroes() {
    let t = TestDrive::new().await;
    let mut file = t.fs.create("/pad.bin").await.unwrap();

    file.write(b"ab").await.unwrap();
    assert_eq!(file.seek(SeekFrom::Current(3)).await.unwrap(), 5);
    file.write(b"c").await.unwrap();
    assert_kind(file.seek(SeekFrom::Start(0)).await, ErrorKind::InvalidArgument);
    assert_kind(file.seek(SeekFrom::Current(-1)).await, ErrorKind::InvalidArgument);
    assert_kind(file.seek(SeekFrom::End(0)).await, ErrorKind::InvalidArgument);
    file.close().await.unwrap();

    assert_file_content(&t.fs, "/pad.bin", b"ab\0\0\0c").await;
}

#[tokio::test]
async fn test_preset_offset_is_padded_on_write() {
    let t = TestDrive::new().await;
    let mut file = t.fs.create("/gap.bin").await.unwrap();

    file.seek(SeekFrom::Start(2)).await.unwrap();
    file.write(b"x").await.unwrap();
    assert_eq!(file.offset(), 3);
    file.close().await.unwrap();

    assert_file_content(&t.fs, "/gap.bin", b"\0\0x").await;
}

#[tokio::test]
async fn test_write_at_requires_contiguous_offset() {
    let t = TestDrive::new().await;
    let mut file = t.fs.create("/seq.txt").await.unwrap();

    file.write_at(0, b"ab").await.unwrap();
    let err = assert_kind(file.write_at(5, b"zz").await, ErrorKind::InvalidArgument);
    assert!(matches!(
        err,
        DriveError::NonContiguousWrite {
            offset: 5,
            expected: 2,
            ..
        }
    ));
    file.write_at(2, b"cd").await.unwrap();
    file.close().await.unwrap();

    assert_file_content(&t.fs, "/seq.txt", b"abcd").await;
}

#[tokio::test]
async fn test_large_write_streams_through_small_pipe() {
    let config = test_config().upload_buffer(16);
    let t = TestDrive::with_config(config).await;
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let mut file = t.fs.create("/big.bin").await.unwrap();
    for chunk in data.chunks(1000) {
        file.write(chunk).await.unwrap();
    }
    file.close().await.unwrap();

    assert_eq!(file.stat().unwrap().len(), 10_000);
    assert_file_content(&t.fs, "/big.bin", &data).await;
}

#[tokio::test]
async fn test_copy_helpers() {
    let t = TestDrive::new().await;

    let mut file = t.fs.create("/copy.txt").await.unwrap();
    let mut source: &[u8] = b"streamed content";
    assert_eq!(file.copy_from(&mut source).await.unwrap(), 16);
    file.close().await.unwrap();

    let mut file = open_file(&t, "/copy.txt").await;
    let mut sink = Vec::new();
    assert_eq!(file.copy_to(&mut sink).await.unwrap(), 16);
    assert_eq!(sink, b"streamed content");
}

#[tokio::test]
async fn test_read_before_create_is_not_found() {
    let t = TestDrive::new().await;
    let mut file = t.fs.create("/new.txt").await.unwrap();
    let mut buf = [0u8; 1];
    assert_kind(file.read(&mut buf).await, ErrorKind::NotFound);
    assert!(file.stat().is_err());
}

#[tokio::test]
async fn test_upload_failure_surfaces() {
    let t = drive_with_file(b"old").await;
    t.drive.fail_next(
        "update_node",
        RemoteError::Status {
            code: 403,
            message: "forbidden".into(),
        },
    );
    let mut file = open_file(&t, "/f.txt").await;

    let write = file.write(b"new").await;
    let close = file.close().await;
    let err = write.err().or(close.err()).expect("upload failure was lost");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(matches!(err, DriveError::Remote { attempts: 1, .. }));

    assert_file_content(&t.fs, "/f.txt", b"old").await;
}

#[tokio::test]
async fn test_download_is_retried() {
    let t = drive_with_file(b"hello").await;
    t.drive.fail_next(
        "download",
        RemoteError::GoAway {
            debug: "max streams".into(),
        },
    );

    assert_file_content(&t.fs, "/f.txt", b"hello").await;
    assert_eq!(t.drive.calls("download"), 2);
}

#[tokio::test]
async fn test_handle_stat_after_close() {
    let t = TestDrive::new().await;
    let mut file = t.fs.create("/s.txt").await.unwrap();
    file.write(b"1234").await.unwrap();
    file.close().await.unwrap();

    let meta = file.stat().unwrap();
    assert_eq!(meta.len(), 4);
    assert_eq!(file.path(), "s.txt");
    assert_eq!(file.node().unwrap().name, "s.txt");
}

#[tokio::test]
async fn test_failed_reopen_keeps_position() {
    let t = drive_with_file(b"hello").await;
    let mut file = open_file(&t, "/f.txt").await;

    let mut buf = [0u8; 1];
    assert_eq!(file.read(&mut buf).await.unwrap(), 1);
    t.drive.fail_next(
        "download",
        RemoteError::Status {
            code: 400,
            message: "bad range".into(),
        },
    );

    assert_kind(file.seek(SeekFrom::Start(0)).await, ErrorKind::InvalidArgument);
    assert_eq!(file.offset(), 1);
    assert_eq!(read_string(&mut file).await, "ello");
}

#[tokio::test]
async fn test_create_over_existing_seek_ignores_old_size() {
    let t = drive_with_file(b"abc").await;
    let mut file = t.fs.create("/f.txt").await.unwrap();

    assert_eq!(file.seek(SeekFrom::Start(10)).await.unwrap(), 10);
    file.write(b"z").await.unwrap();
    file.close().await.unwrap();

    let mut expected = vec![0u8; 10];
    expected.push(b'z');
    assert_file_content(&t.fs, "/f.txt", &expected).await;
}

#[tokio::test]
async fn test_dropped_writer_keeps_old_content() {
    let t = drive_with_file(b"old content").await;
    let mut file = open_file(&t, "/f.txt").await;

    file.write(b"partial").await.unwrap();
    drop(file);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_file_content(&t.fs, "/f.txt", b"old content").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handle_moves_across_tasks() {
    let t = drive_with_file(b"hello world").await;
    let mut file = open_file(&t, "/f.txt").await;

    let task = tokio::spawn(async move {
        file.seek(SeekFrom::Start(6)).await.unwrap();
        let tail = read_string(&mut file).await;
        file.seek(SeekFrom::Start(0)).await.unwrap();
        let head = read_string(&mut file).await;
        file.close().await.unwrap();
        (head, tail)
    });

    let (head, tail) = task.await.unwrap();
    assert_eq!(tail, "world");
    assert_eq!(head, "hello world");
}
