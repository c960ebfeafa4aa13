//! Write accepted attachments to disk.

use std::fs::{self, File, FileTimes};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::attachment::{AttachmentCandidate, SavedAttachment};

/// Persists attachment bodies under a single output directory.
#[derive(Debug, Clone)]
pub struct AttachmentWriter {
    output_dir: PathBuf,
}

impl AttachmentWriter {
    /// Create a writer for `output_dir`. Nothing is touched until [`prepare`](Self::prepare).
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Create the output directory (and parents). Owner-only on unix.
    pub fn prepare(&self) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.output_dir).map_err(|source| Error::OutputDir {
            path: self.output_dir.clone(),
            source,
        })
    }

    /// Write a candidate's decoded body to its destination path.
    pub fn write(
        &self,
        candidate: &AttachmentCandidate<'_>,
        timestamp: DateTime<Utc>,
    ) -> Result<SavedAttachment> {
        let saved = self.write_stream(&candidate.path, candidate.part.body, timestamp)?;
        info!(
            name = %candidate.filename,
            size = saved.size,
            "Saved attachment"
        );
        Ok(saved)
    }

    /// Stream `body` into `path`, replacing any existing file.
    ///
    /// Access and modification times are set to `timestamp` on a
    /// best-effort basis. If the copy or the final flush fails, the
    /// partially written file is removed.
    pub fn write_stream(
        &self,
        path: &Path,
        mut body: impl Read,
        timestamp: DateTime<Utc>,
    ) -> Result<SavedAttachment> {
        let mut file = File::create(path).map_err(|e| Error::write(path, e))?;

        let copied = io::copy(&mut body, &mut file).and_then(|n| file.sync_all().map(|()| n));
        let size = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                if let Err(rm) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %rm, "Failed to remove partial file");
                }
                return Err(Error::write(path, e));
            }
        };

        let when = SystemTime::from(timestamp);
        let times = FileTimes::new().set_accessed(when).set_modified(when);
        if let Err(e) = file.set_times(times) {
            warn!(path = %path.display(), error = %e, "Failed to set file times");
        }
        debug!(path = %path.display(), bytes = size, "Closed attachment file");

        Ok(SavedAttachment {
            path: path.to_path_buf(),
            original_timestamp: timestamp,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::model::attachment::MimePart;

    fn candidate<'a>(dir: &Path, name: &str, body: &'a [u8]) -> AttachmentCandidate<'a> {
        AttachmentCandidate {
            part: MimePart {
                index: 0,
                content_type: Some("application/pdf".into()),
                content_type_malformed: false,
                content_type_params: BTreeMap::new(),
                disposition_params: BTreeMap::new(),
                body,
            },
            filename: name.to_string(),
            path: dir.join(name),
        }
    }

    /// Yields some bytes, then fails.
    struct Broken(bool);

    impl Read for Broken {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0 {
                return Err(io::Error::other("connection reset"));
            }
            self.0 = true;
            buf[..4].copy_from_slice(b"%PDF");
            Ok(4)
        }
    }

    #[test]
    fn test_write_copies_body_and_sets_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = AttachmentWriter::new(tmp.path());
        let ts = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();

        let saved = writer
            .write(&candidate(tmp.path(), "a.pdf", b"%PDF-1.4 data"), ts)
            .unwrap();

        assert_eq!(saved.size, 13);
        assert_eq!(saved.original_timestamp, ts);
        assert_eq!(fs::read(&saved.path).unwrap(), b"%PDF-1.4 data");
        let mtime = fs::metadata(&saved.path).unwrap().modified().unwrap();
        assert_eq!(mtime, SystemTime::from(ts));
    }

    #[test]
    fn test_write_overwrites_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = AttachmentWriter::new(tmp.path());
        fs::write(tmp.path().join("a.pdf"), b"old content that is longer").unwrap();

        writer
            .write(&candidate(tmp.path(), "a.pdf", b"new"), Utc::now())
            .unwrap();
        assert_eq!(fs::read(tmp.path().join("a.pdf")).unwrap(), b"new");
    }

    #[test]
    fn test_failed_copy_removes_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = AttachmentWriter::new(tmp.path());
        let path = tmp.path().join("broken.pdf");

        let err = writer
            .write_stream(&path, Broken(false), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_create_failure_is_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = AttachmentWriter::new(tmp.path());
        let path = tmp.path().join("missing").join("a.pdf");
        let err = writer.write_stream(&path, &b"x"[..], Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
    }

    #[test]
    fn test_prepare_creates_nested_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");
        AttachmentWriter::new(&dir).prepare().unwrap();
        assert!(dir.is_dir());
    }
}
