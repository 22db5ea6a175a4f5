//! Output sinks.
//!
//! A [`Target`] only moves forward: `FileHandle -> FileStream -> WrittenFile`
//! for files and `ArrayBuffer -> PopulatedArrayBuffer` for memory.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use subforge_common::error::{SubforgeError, SubforgeResult};

/// Where the rendered file goes.
#[derive(Debug)]
pub enum Target {
    /// A path that still has to be opened.
    FileHandle(PathBuf),
    /// An open, writable file.
    FileStream { path: PathBuf, file: File },
    /// Accumulate the output in memory.
    ArrayBuffer(Vec<u8>),
    /// Finished in-memory output.
    PopulatedArrayBuffer { bytes: Vec<u8>, filename: String },
    /// Finished file output.
    WrittenFile { path: PathBuf, bytes_written: u64 },
}

impl Target {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::FileHandle(path.into())
    }

    pub fn memory() -> Self {
        Self::ArrayBuffer(Vec::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileHandle(_) => "file_handle",
            Self::FileStream { .. } => "file_stream",
            Self::ArrayBuffer(_) => "array_buffer",
            Self::PopulatedArrayBuffer { .. } => "populated_array_buffer",
            Self::WrittenFile { .. } => "written_file",
        }
    }

    /// Whether the render that produced this target has completed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PopulatedArrayBuffer { .. } | Self::WrittenFile { .. }
        )
    }

    /// Open a `FileHandle`; other variants are returned unchanged.
    pub fn open(self) -> SubforgeResult<Self> {
        match self {
            Self::FileHandle(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                tracing::debug!(path = %path.display(), "Output file opened");
                Ok(Self::FileStream { path, file })
            }
            other => Ok(other),
        }
    }

    /// Turn an open target into a muxer sink. `filename` names in-memory output.
    pub fn into_sink(self, filename: String) -> SubforgeResult<MuxSink> {
        match self.open()? {
            Self::FileStream { path, file } => Ok(MuxSink::File {
                path,
                writer: BufWriter::new(file),
            }),
            Self::ArrayBuffer(buffer) => Ok(MuxSink::Memory {
                cursor: Cursor::new(buffer),
                filename,
            }),
            terminal => Err(SubforgeError::mux(format!(
                "target '{}' has already been written",
                terminal.kind()
            ))),
        }
    }
}

/// Output name suggested for a render of `source`.
pub fn suggested_filename(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "video".to_string());
    format!("{stem}-subtitled.mp4")
}

/// Seekable byte sink the muxer writes into.
pub enum MuxSink {
    File {
        path: PathBuf,
        writer: BufWriter<File>,
    },
    Memory {
        cursor: Cursor<Vec<u8>>,
        filename: String,
    },
}

impl MuxSink {
    /// Flush and close, producing the terminal target.
    pub fn finish(self) -> SubforgeResult<Target> {
        match self {
            Self::File { path, writer } => {
                let file = writer
                    .into_inner()
                    .map_err(|e| SubforgeError::finalize(format!("flush failed: {}", e.error())))?;
                file.sync_all()
                    .map_err(|e| SubforgeError::finalize(format!("sync failed: {e}")))?;
                let bytes_written = file.metadata()?.len();
                tracing::info!(path = %path.display(), bytes_written, "Output file written");
                Ok(Target::WrittenFile {
                    path,
                    bytes_written,
                })
            }
            Self::Memory { cursor, filename } => {
                let bytes = cursor.into_inner();
                tracing::info!(filename = %filename, bytes = bytes.len(), "Output buffered in memory");
                Ok(Target::PopulatedArrayBuffer { bytes, filename })
            }
        }
    }
}

impl Write for MuxSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File { writer, .. } => writer.write(buf),
            Self::Memory { cursor, .. } => cursor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File { writer, .. } => writer.flush(),
            Self::Memory { cursor, .. } => cursor.flush(),
        }
    }
}

impl Seek for MuxSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File { writer, .. } => writer.seek(pos),
            Self::Memory { cursor, .. } => cursor.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("subforge-target-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_suggested_filename() {
        assert_eq!(
            suggested_filename(Path::new("/videos/talk.final.mov")),
            "talk.final-subtitled.mp4"
        );
        assert_eq!(suggested_filename(Path::new("")), "video-subtitled.mp4");
    }

    #[test]
    fn test_memory_target_populates() {
        let mut sink = Target::memory().into_sink("out.mp4".into()).unwrap();
        sink.write_all(b"abcdef").unwrap();
        sink.seek(SeekFrom::Start(1)).unwrap();
        sink.write_all(b"Z").unwrap();
        match sink.finish().unwrap() {
            Target::PopulatedArrayBuffer { bytes, filename } => {
                assert_eq!(bytes, b"aZcdef");
                assert_eq!(filename, "out.mp4");
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_file_target_transitions() {
        let path = temp_path("out.mp4");
        let target = Target::file(&path).open().unwrap();
        assert_eq!(target.kind(), "file_stream");
        assert!(!target.is_terminal());

        let mut sink = target.into_sink(String::new()).unwrap();
        sink.write_all(&[0u8; 100]).unwrap();
        let done = sink.finish().unwrap();
        assert!(done.is_terminal());
        match done {
            Target::WrittenFile {
                path: written,
                bytes_written,
            } => {
                assert_eq!(written, path);
                assert_eq!(bytes_written, 100);
            }
            other => panic!("unexpected target {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_terminal_target_rejected() {
        let done = Target::WrittenFile {
            path: PathBuf::from("/tmp/x.mp4"),
            bytes_written: 1,
        };
        assert!(done.into_sink(String::new()).is_err());
    }
}
