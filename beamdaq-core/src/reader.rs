//! Sequential record stream reader and writer.
//!
//! Files are a plain concatenation of codec frames. The reader can skip
//! frames without decoding them, report the run number of the stream, and
//! tail a file that is still being written. A read blocked in tail mode can
//! be cancelled from another thread through an [`Interrupter`].

use crate::codec::{self, CodecError, CodecRegistry, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use crate::record::Record;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Result of a read request.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The next record.
    Record(Record),
    /// No more data (never returned in follow mode).
    EndOfStream,
    /// The read was cancelled through [`Interrupter::interrupt`].
    Interrupted,
}

/// Cancellation handle for a [`RecordReader`], cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    /// Makes pending and future reads return [`ReadOutcome::Interrupted`].
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

enum Fill {
    Complete,
    Eof,
    Interrupted,
}

/// Reads codec frames one after another from any byte source.
pub struct RecordReader<R> {
    inner: R,
    registry: CodecRegistry,
    interrupter: Interrupter,
    follow: Option<Duration>,
    run_number: Option<u32>,
    records_read: u64,
}

impl RecordReader<BufReader<File>> {
    /// Opens a record file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened record file");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> RecordReader<R> {
    /// Creates a reader using the built-in codec registry.
    pub fn new(inner: R) -> Self {
        Self::with_registry(inner, CodecRegistry::with_builtin())
    }

    pub fn with_registry(inner: R, registry: CodecRegistry) -> Self {
        Self {
            inner,
            registry,
            interrupter: Interrupter::default(),
            follow: None,
            run_number: None,
            records_read: 0,
        }
    }

    /// Waits for more data at end of stream, polling every `poll_interval`.
    pub fn follow(mut self, poll_interval: Duration) -> Self {
        self.follow = Some(poll_interval);
        self
    }

    /// Returns a handle that can cancel reads from another thread.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    pub fn interrupt(&self) {
        self.interrupter.interrupt();
    }

    /// Run number of the first record read, if any.
    pub fn run_number(&self) -> Option<u32> {
        self.run_number
    }

    /// Number of records decoded so far (skipped frames excluded).
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Skips `skip` frames, then reads and decodes the next one.
    pub fn next_record(&mut self, skip: usize) -> Result<ReadOutcome, CodecError> {
        for _ in 0..skip {
            match self.read_frame()? {
                FrameOutcome::Frame(record_type, body) => {
                    trace!(%record_type, bytes = body.len(), "skipped frame");
                }
                FrameOutcome::EndOfStream => return Ok(ReadOutcome::EndOfStream),
                FrameOutcome::Interrupted => return Ok(ReadOutcome::Interrupted),
            }
        }

        match self.read_frame()? {
            FrameOutcome::Frame(record_type, body) => {
                let record = self.registry.decode_body(record_type, &body)?;
                if self.run_number.is_none() {
                    self.run_number = Some(record.run_number());
                }
                self.records_read += 1;
                Ok(ReadOutcome::Record(record))
            }
            FrameOutcome::EndOfStream => Ok(ReadOutcome::EndOfStream),
            FrameOutcome::Interrupted => Ok(ReadOutcome::Interrupted),
        }
    }

    fn read_frame(&mut self) -> Result<FrameOutcome, CodecError> {
        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        match self.fill(&mut prefix, true)? {
            Fill::Complete => {}
            Fill::Eof => return Ok(FrameOutcome::EndOfStream),
            Fill::Interrupted => return Ok(FrameOutcome::Interrupted),
        }

        let (record_type, len) = codec::parse_frame_header(&prefix);
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::TooLarge {
                what: "frame body",
                len,
                limit: MAX_FRAME_SIZE,
            });
        }
        let mut body = vec![0u8; len];
        match self.fill(&mut body, false)? {
            Fill::Complete => Ok(FrameOutcome::Frame(record_type, body)),
            Fill::Eof => Err(CodecError::Truncated {
                needed: len,
                available: 0,
            }),
            Fill::Interrupted => Ok(FrameOutcome::Interrupted),
        }
    }

    /// Fills `buf` completely. A clean end of stream is only reported when
    /// nothing was read and `at_boundary` is set.
    fn fill(&mut self, buf: &mut [u8], at_boundary: bool) -> Result<Fill, CodecError> {
        let mut filled = 0;
        loop {
            if self.interrupter.is_interrupted() {
                return Ok(Fill::Interrupted);
            }
            if filled == buf.len() {
                return Ok(Fill::Complete);
            }
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => match self.follow {
                    Some(poll_interval) => thread::sleep(poll_interval),
                    None if filled == 0 && at_boundary => return Ok(Fill::Eof),
                    None => {
                        return Err(CodecError::Truncated {
                            needed: buf.len(),
                            available: filled,
                        })
                    }
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

enum FrameOutcome {
    Frame(crate::record::RecordType, Vec<u8>),
    EndOfStream,
    Interrupted,
}

/// Appends codec frames to any byte sink.
pub struct RecordWriter<W: Write> {
    inner: W,
    records_written: u64,
}

impl RecordWriter<BufWriter<File>> {
    /// Creates (or truncates) a record file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            records_written: 0,
        }
    }

    /// Writes one record.
    pub fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        self.inner.write_all(&codec::encode(record)?)?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
