//! Log sinks: the rotating service log file and the fan-out writer that feeds
//! worker output to the console and that file.
use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
};

use tracing::{debug, warn};

use crate::constants::{LOG_BUFFER_SIZE, LOG_ROTATE_BYTES};

/// Append-mode log file that is truncated when it is opened above
/// [`LOG_ROTATE_BYTES`].
#[derive(Debug)]
pub struct RotatingLogFile {
    path: PathBuf,
    file: File,
}

impl RotatingLogFile {
    /// Opens `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_with_limit(path, LOG_ROTATE_BYTES)
    }

    fn open_with_limit(path: &Path, limit: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        if let Ok(metadata) = fs::metadata(path)
            && metadata.len() > limit
        {
            debug!(
                "Log file {} is {} bytes; truncating",
                path.display(),
                metadata.len()
            );
            File::create(path)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consumes the log, returning the open file handle.
    pub fn into_file(self) -> File {
        self.file
    }
}

impl Write for RotatingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// A byte sink that can be shared between threads. Each write holds the sink's
/// lock for the whole buffer so lines from different writers never interleave.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Sink writing to the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSink").finish_non_exhaustive()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| io::Error::other(err.to_string()))?;
        guard.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| io::Error::other(err.to_string()))?;
        guard.flush()
    }
}

/// Forwards every write to all of its sinks.
///
/// A failing sink does not stop the others from receiving the bytes; the first
/// error encountered is returned after every sink has been tried.
#[derive(Clone, Debug, Default)]
pub struct MultiWriter {
    sinks: Vec<SharedSink>,
}

impl MultiWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of underlying sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns `true` when no sink is attached.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.write_all(buf)
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush()
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Copies a child pipe into `sink` line by line on a background thread.
///
/// The thread ends when the pipe closes. Write failures are logged once and the
/// pipe keeps draining so the child never blocks on a full pipe.
pub fn spawn_log_writer<R>(
    label: &str,
    reader: R,
    mut sink: MultiWriter,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let label = label.to_string();
    thread::Builder::new()
        .name(format!("log-{label}"))
        .spawn(move || {
            let mut reader = BufReader::with_capacity(LOG_BUFFER_SIZE, reader);
            let mut line = Vec::with_capacity(256);
            let mut reported = false;

            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Err(err) = sink.write_all(&line).and_then(|_| sink.flush())
                            && !reported
                        {
                            warn!("Failed to forward {label} output: {err}");
                            reported = true;
                        }
                    }
                    Err(err) => {
                        warn!("Failed to read {label} output: {err}");
                        break;
                    }
                }
            }
        })
}
