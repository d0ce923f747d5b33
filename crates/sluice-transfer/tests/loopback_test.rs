/// Integration tests: full transfers against the in-process remote.
///
/// Every download is checked byte-for-byte against the served file; every
/// upload against what the remote ended up holding.

use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use sluice_transfer::loopback::LOOPBACK_HANDLE;
use sluice_transfer::{
    Direction, LoopbackRemote, NoProgress, RemoteFile, ReplyOrder, Response, SharedProgress,
    StatusCode, TransferConfig, TransferDriver, TransferError, TransferEvent, TransferLog,
    TransferLogger, TransferState, download, download_file, spawn_loopback_server, upload,
    upload_file,
};

const SIZE: usize = 100_000;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn config() -> TransferConfig {
    TransferConfig::new().without_logger()
}

fn remote_file(remote: &LoopbackRemote, size: usize) -> RemoteFile {
    RemoteFile::new(remote.handle().clone(), size as u64)
}

#[test]
fn four_requests_cover_the_file_in_any_reply_order() {
    let data = pattern(SIZE);
    for order in [
        ReplyOrder::Fifo,
        ReplyOrder::Lifo,
        ReplyOrder::Shuffled { seed: 1 },
        ReplyOrder::Shuffled { seed: 99 },
    ] {
        let mut remote = LoopbackRemote::new(data.clone(), order);
        let file = remote_file(&remote, SIZE);
        let mut sink = Vec::new();
        let n = download(&mut remote, &file, &mut sink, &config(), &mut NoProgress).unwrap();

        assert_eq!(n, SIZE as u64);
        assert_eq!(sink, data, "{:?}", order);
        let ranges: Vec<_> = remote.requests().iter().map(|r| (r.offset, r.len)).collect();
        assert_eq!(
            ranges,
            vec![(0, 32768), (32768, 32768), (65536, 32768), (98304, 1696)]
        );
        assert_eq!(remote.max_outstanding(), 4);
    }
}

#[test]
fn lifo_replies_flush_in_one_burst() {
    let data = pattern(SIZE);
    let mut remote = LoopbackRemote::new(data.clone(), ReplyOrder::Lifo);
    let mut driver =
        TransferDriver::new(Direction::Download, remote.handle().clone(), SIZE as u64, &config())
            .unwrap();
    let mut sink = Vec::new();

    let mut committed = Vec::new();
    loop {
        let state = driver
            .step_download(&mut remote, &mut sink, &mut NoProgress)
            .unwrap();
        committed.push(driver.session().committed());
        if state.is_terminal() {
            break;
        }
    }
    assert_eq!(committed, vec![0, 0, 0, SIZE as u64]);
    assert_eq!(remote.replies(), &[98304, 65536, 32768, 0]);
    assert_eq!(sink, data);
}

#[test]
fn short_data_reply_fails_before_anything_commits() {
    let mut remote = LoopbackRemote::new(pattern(SIZE), ReplyOrder::Fifo).short_reply_at(0, 100);
    let mut driver =
        TransferDriver::new(Direction::Download, remote.handle().clone(), SIZE as u64, &config())
            .unwrap();
    let mut sink = Vec::new();

    let err = driver
        .run_download(&mut remote, &mut sink, &mut NoProgress)
        .unwrap_err();
    assert!(matches!(err, TransferError::Protocol { committed: 0, .. }));
    assert!(!err.is_resumable());
    assert_eq!(driver.state(), TransferState::Failed);
    assert!(sink.is_empty());
}

#[test]
fn connection_loss_reports_committed_prefix() {
    let data = pattern(SIZE);
    let mut remote = LoopbackRemote::new(data.clone(), ReplyOrder::Fifo).close_after(2);
    let file = remote_file(&remote, SIZE);
    let mut sink = Vec::new();

    let err = download(&mut remote, &file, &mut sink, &config(), &mut NoProgress).unwrap_err();
    assert!(matches!(err, TransferError::Transport { .. }));
    assert_eq!(err.committed(), 65536);
    assert!(err.is_resumable());
    assert_eq!(sink, &data[..65536]);
}

#[test]
fn server_status_is_raised_with_offset() {
    let mut remote = LoopbackRemote::new(pattern(SIZE), ReplyOrder::Fifo).fail_at(
        32768,
        StatusCode::Failure,
        "read error",
    );
    let file = remote_file(&remote, SIZE);
    let mut sink = Vec::new();

    let err = download(&mut remote, &file, &mut sink, &config(), &mut NoProgress).unwrap_err();
    match &err {
        TransferError::Status { committed, offset, code, message } => {
            assert_eq!(*committed, 32768);
            assert_eq!(*offset, 32768);
            assert_eq!(*code, StatusCode::Failure);
            assert_eq!(message, "read error");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(sink.len(), 32768);
}

#[test]
fn duplicate_and_stray_replies_are_ignored() {
    let data = pattern(SIZE);
    let mut remote = LoopbackRemote::new(data.clone(), ReplyOrder::Fifo).duplicate_replies();
    remote.inject(Response::Data {
        id: 4242,
        data: Bytes::from_static(b"junk"),
    });
    let mut driver =
        TransferDriver::new(Direction::Download, remote.handle().clone(), SIZE as u64, &config())
            .unwrap();
    let mut sink = Vec::new();

    driver
        .run_download(&mut remote, &mut sink, &mut NoProgress)
        .unwrap();
    assert_eq!(sink, data);
    // The injected reply plus a duplicate of each of the first three; the
    // last duplicate is never read because the transfer is already done.
    assert_eq!(driver.stray_replies(), 4);
}

#[test]
fn repeated_downloads_are_identical() {
    let data = pattern(SIZE);
    let digest = |seed| {
        let mut remote = LoopbackRemote::new(data.clone(), ReplyOrder::Shuffled { seed });
        let file = remote_file(&remote, SIZE);
        let mut sink = Vec::new();
        download(&mut remote, &file, &mut sink, &config(), &mut NoProgress).unwrap();
        Sha256::digest(&sink)
    };
    assert_eq!(digest(3), digest(4));
    assert_eq!(digest(3), Sha256::digest(&data));
}

#[test]
fn zero_size_file_sends_nothing() {
    let mut remote = LoopbackRemote::new(Vec::new(), ReplyOrder::Fifo);
    let file = remote_file(&remote, 0);
    let mut sink = Vec::new();
    let n = download(&mut remote, &file, &mut sink, &config(), &mut NoProgress).unwrap();
    assert_eq!(n, 0);
    assert!(remote.requests().is_empty());

    let handle = remote.handle().clone();
    let n = upload(&mut remote, &mut std::io::empty(), 0, &handle, &config(), &mut NoProgress).unwrap();
    assert_eq!(n, 0);
    assert!(remote.requests().is_empty());
}

#[test]
fn upload_commits_only_acknowledged_prefix() {
    let data = pattern(SIZE);
    let mut remote = LoopbackRemote::new(Vec::new(), ReplyOrder::Fifo).fail_at(
        65536,
        StatusCode::PermissionDenied,
        "quota",
    );
    let handle = remote.handle().clone();

    let err = upload(
        &mut remote,
        &mut data.as_slice(),
        SIZE as u64,
        &handle,
        &config(),
        &mut NoProgress,
    )
    .unwrap_err();
    assert!(matches!(err, TransferError::Status { offset: 65536, .. }));
    assert_eq!(err.committed(), 65536);
}

#[test]
fn upload_acks_past_a_gap_do_not_count() {
    let data = pattern(SIZE);
    let mut remote =
        LoopbackRemote::new(Vec::new(), ReplyOrder::Lifo).fail_at(0, StatusCode::Failure, "io");
    let handle = remote.handle().clone();

    let err = upload(
        &mut remote,
        &mut data.as_slice(),
        SIZE as u64,
        &handle,
        &config(),
        &mut NoProgress,
    )
    .unwrap_err();
    assert_eq!(err.committed(), 0);
    assert_eq!(remote.replies(), &[98304, 65536, 32768, 0]);
}

#[test]
fn upload_lands_intact_in_any_reply_order() {
    let data = pattern(SIZE);
    for order in [ReplyOrder::Fifo, ReplyOrder::Lifo, ReplyOrder::Shuffled { seed: 7 }] {
        let mut remote = LoopbackRemote::new(Vec::new(), order);
        let handle = remote.handle().clone();
        let progress = SharedProgress::new(SIZE as u64);
        let mut reporter = progress.clone();
        let n = upload(
            &mut remote,
            &mut data.as_slice(),
            SIZE as u64,
            &handle,
            &config(),
            &mut reporter,
        )
        .unwrap();
        assert_eq!(n, SIZE as u64);
        assert_eq!(progress.bytes_done(), SIZE as u64);
        assert_eq!(progress.chunks_done(), 4);
        assert!(remote.requests().iter().all(|r| r.write));
        assert_eq!(remote.into_contents(), data);
    }
}

#[test]
fn small_window_never_exceeds_its_limit() {
    let data = pattern(SIZE);
    let mut remote = LoopbackRemote::new(data.clone(), ReplyOrder::Lifo);
    let file = remote_file(&remote, SIZE);
    let config = config().with_window(2).with_chunk_size(4096);
    let mut sink = Vec::new();
    download(&mut remote, &file, &mut sink, &config, &mut NoProgress).unwrap();
    assert_eq!(sink, data);
    assert!(remote.max_outstanding() <= 2);
    assert_eq!(remote.requests().len(), SIZE.div_ceil(4096));
}

#[test]
fn panicking_progress_reporter_does_not_abort_transfer() {
    let data = pattern(SIZE);
    let mut remote = LoopbackRemote::new(data.clone(), ReplyOrder::Fifo);
    let file = remote_file(&remote, SIZE);
    let mut sink = Vec::new();
    let mut calls = 0;
    let mut reporter = |_n: u64| {
        calls += 1;
        if calls == 2 {
            panic!("reporter bug");
        }
    };
    let n = download(&mut remote, &file, &mut sink, &config(), &mut reporter).unwrap();
    assert_eq!(n, SIZE as u64);
    assert_eq!(sink, data);
}

#[derive(Default)]
struct Collect(Mutex<Vec<TransferEvent>>);

impl TransferLogger for Collect {
    fn log(&self, entry: TransferLog) {
        self.0.lock().unwrap().push(entry.event);
    }
}

#[test]
fn lifecycle_is_logged() {
    let logger = Arc::new(Collect::default());
    let mut remote = LoopbackRemote::new(pattern(SIZE), ReplyOrder::Fifo);
    let file = remote_file(&remote, SIZE);
    let config = TransferConfig::new().with_logger(logger.clone());
    download(&mut remote, &file, &mut Vec::new(), &config, &mut NoProgress).unwrap();

    let events = logger.0.lock().unwrap();
    assert!(matches!(events.first(), Some(TransferEvent::Started { file_size: 100_000, .. })));
    assert!(matches!(events.last(), Some(TransferEvent::Complete { total_bytes: 100_000, requests: 4, .. })));
    let issued = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::RequestIssued { .. }))
        .count();
    let committed = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::ChunkCommitted { .. }))
        .count();
    assert_eq!((issued, committed), (4, 4));
}

#[cfg(unix)]
#[test]
fn download_file_checks_length_on_disk() {
    // Writes to /dev/null succeed but its length always reads back as 0.
    let mut remote = LoopbackRemote::new(vec![5; 1000], ReplyOrder::Fifo);
    let file = remote_file(&remote, 1000);
    let err = download_file(
        &mut remote,
        &file,
        std::path::Path::new("/dev/null"),
        &config(),
        &mut NoProgress,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        TransferError::SizeMismatch { expected: 1000, actual: 0 }
    ));
    assert_eq!(err.to_string(), "size mismatch: expected 1000 bytes, got 0");
}

#[test]
fn file_round_trip_through_threaded_server() {
    let dir = std::env::temp_dir().join(format!("sluice_loopback_test_{}", std::process::id()));
    let _ = fs::create_dir_all(&dir);
    let input = dir.join("input.bin");
    let output = dir.join("output.bin");
    let data = pattern(300_000);
    fs::File::create(&input)
        .unwrap()
        .write_all(&data)
        .unwrap();

    let config = config().with_window(8);
    let handle = Bytes::from_static(LOOPBACK_HANDLE);

    // Upload into an empty remote, then read the result back.
    let (mut conn, server) = spawn_loopback_server(Vec::new(), Duration::from_millis(1), 8);
    let sent = upload_file(&mut conn, &input, &handle, &config, &mut NoProgress).unwrap();
    drop(conn);
    let stored = server.join().unwrap();
    assert_eq!(sent, data.len() as u64);
    assert_eq!(stored, data);

    let (mut conn, server) = spawn_loopback_server(stored, Duration::from_millis(1), 8);
    let remote = RemoteFile::new(handle, data.len() as u64);
    let received = download_file(&mut conn, &remote, &output, &config, &mut NoProgress).unwrap();
    drop(conn);
    server.join().unwrap();

    assert_eq!(received, data.len() as u64);
    assert_eq!(fs::read(&output).unwrap(), data);
    let _ = fs::remove_dir_all(&dir);
}
