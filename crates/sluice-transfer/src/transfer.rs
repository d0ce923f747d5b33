/// One-call download and upload helpers.
///
/// Each call builds a fresh [`TransferDriver`], runs it to completion and
/// returns the committed byte count. Nothing survives between calls; a
/// resumed transfer is simply a new call.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytes::Bytes;

use crate::config::TransferConfig;
use crate::connection::{Connection, RemoteFile};
use crate::driver::{Direction, TransferDriver};
use crate::error::TransferError;
use crate::progress::ProgressReporter;

/// Stream `remote` into `sink`. Returns bytes written.
pub fn download<C, W, P>(
    conn: &mut C,
    remote: &RemoteFile,
    sink: &mut W,
    config: &TransferConfig,
    progress: &mut P,
) -> Result<u64, TransferError>
where
    C: Connection + ?Sized,
    W: Write + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let mut driver =
        TransferDriver::new(Direction::Download, remote.handle.clone(), remote.size, config)?;
    driver.run_download(conn, sink, progress)
}

/// Stream `source_len` bytes from `source` to the open remote `handle`.
/// Returns bytes acknowledged by the server.
pub fn upload<C, R, P>(
    conn: &mut C,
    source: &mut R,
    source_len: u64,
    handle: &Bytes,
    config: &TransferConfig,
    progress: &mut P,
) -> Result<u64, TransferError>
where
    C: Connection + ?Sized,
    R: Read + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let mut driver = TransferDriver::new(Direction::Upload, handle.clone(), source_len, config)?;
    driver.run_upload(conn, source, progress)
}

/// Download `remote` to a local file, creating or truncating it.
///
/// The file is flushed and its on-disk length checked against the remote
/// size before returning.
pub fn download_file<C, P>(
    conn: &mut C,
    remote: &RemoteFile,
    path: &Path,
    config: &TransferConfig,
    progress: &mut P,
) -> Result<u64, TransferError>
where
    C: Connection + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let file = File::create(path).map_err(|source| TransferError::LocalIo { committed: 0, source })?;
    let mut writer = BufWriter::new(file);
    let written = download(conn, remote, &mut writer, config, progress)?;
    writer
        .flush()
        .map_err(|source| TransferError::LocalIo { committed: written, source })?;

    let on_disk = writer
        .get_ref()
        .metadata()
        .map_err(|source| TransferError::LocalIo { committed: written, source })?
        .len();
    if on_disk != remote.size {
        return Err(TransferError::SizeMismatch {
            expected: remote.size,
            actual: on_disk,
        });
    }
    tracing::debug!(path = %path.display(), bytes = written, "download written to disk");
    Ok(written)
}

/// Upload a local file to the open remote `handle`.
pub fn upload_file<C, P>(
    conn: &mut C,
    path: &Path,
    handle: &Bytes,
    config: &TransferConfig,
    progress: &mut P,
) -> Result<u64, TransferError>
where
    C: Connection + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let file = File::open(path).map_err(|source| TransferError::LocalIo { committed: 0, source })?;
    let len = file
        .metadata()
        .map_err(|source| TransferError::LocalIo { committed: 0, source })?
        .len();
    let mut reader = BufReader::new(file);
    upload(conn, &mut reader, len, handle, config, progress)
}
