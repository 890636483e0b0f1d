//! Chunked file copies between the data root and the work directory.
//!
//! Datasets are copied in fixed-size chunks so that memory use stays bounded
//! by the chunk size no matter how large the file is.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StagingError;
use crate::scheduler::RawDataId;

/// 5 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Outcome of a completed chunked copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCopy {
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: usize,
}

/// Unique working-copy file name for a dataset inside `work_dir`.
pub fn working_copy_path(work_dir: &Path, raw_data_id: RawDataId) -> PathBuf {
    work_dir.join(format!("rawdata-{}-{}.work", raw_data_id, Uuid::new_v4()))
}

/// Copy `source` to `dest` chunk by chunk, replacing `dest` if it exists.
///
/// The copy is complete only if the number of bytes written equals the
/// source length observed when the copy started.
pub fn copy_chunked(
    source: &Path,
    dest: &Path,
    chunk_size: usize,
) -> Result<StagedCopy, StagingError> {
    if chunk_size == 0 {
        return Err(StagingError::ZeroChunkSize);
    }
    let source_err = |e| StagingError::Copy {
        path: source.to_path_buf(),
        source: e,
    };
    let dest_err = |e| StagingError::Copy {
        path: dest.to_path_buf(),
        source: e,
    };

    if !source.is_file() {
        return Err(StagingError::SourceNotFound(source.to_path_buf()));
    }
    let mut input = File::open(source).map_err(source_err)?;
    let expected = input.metadata().map_err(source_err)?.len();
    let mut output = BufWriter::new(File::create(dest).map_err(dest_err)?);

    let mut buffer = Vec::with_capacity(chunk_size);
    let mut written = 0u64;
    let mut chunks = 0usize;
    loop {
        buffer.clear();
        let read = (&mut input)
            .take(chunk_size as u64)
            .read_to_end(&mut buffer)
            .map_err(source_err)?;
        if read == 0 {
            break;
        }
        output.write_all(&buffer).map_err(dest_err)?;
        written += read as u64;
        chunks += 1;
    }

    output.flush().map_err(dest_err)?;
    output.get_ref().sync_all().map_err(dest_err)?;

    if written != expected {
        return Err(StagingError::ShortCopy {
            path: dest.to_path_buf(),
            expected,
            written,
        });
    }

    Ok(StagedCopy {
        path: dest.to_path_buf(),
        bytes: written,
        chunks,
    })
}

/// Stage `source` into `work_dir` as a fresh working copy.
///
/// On failure nothing is left behind in `work_dir`.
pub fn stage(
    source: &Path,
    work_dir: &Path,
    raw_data_id: RawDataId,
    chunk_size: usize,
) -> Result<StagedCopy, StagingError> {
    fs::create_dir_all(work_dir).map_err(|e| StagingError::Copy {
        path: work_dir.to_path_buf(),
        source: e,
    })?;

    let dest = working_copy_path(work_dir, raw_data_id);
    copy_chunked(source, &dest, chunk_size).inspect_err(|_| discard(&dest))
}

/// Replace `original` with the contents of `working_copy`.
///
/// The data is copied into a sibling file first and renamed over `original`
/// only once the copy is complete, so a failed save leaves `original` as it
/// was. `working_copy` is never touched.
pub fn write_back(
    working_copy: &Path,
    original: &Path,
    chunk_size: usize,
) -> Result<StagedCopy, StagingError> {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = original.with_file_name(format!(".{}.{}.saving", name, Uuid::new_v4()));

    let copied = copy_chunked(working_copy, &temp, chunk_size).inspect_err(|_| discard(&temp))?;
    if let Err(e) = fs::rename(&temp, original) {
        discard(&temp);
        return Err(StagingError::Copy {
            path: original.to_path_buf(),
            source: e,
        });
    }
    Ok(StagedCopy {
        path: original.to_path_buf(),
        ..copied
    })
}

/// Best-effort removal of a working copy.
pub fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed working copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove working copy"),
    }
}
