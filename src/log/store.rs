use crate::config::DurabilityMode;
use crate::error::RelayError;
use crate::log::frame::{Frame, FrameError, FrameReader, encode_frame};
use parking_lot::{Condvar, Mutex};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const LOG_MAGIC: u32 = 0x5351_524C;
pub const LOG_HEADER_SIZE: usize = 32;
pub const LOG_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    pub magic: u32,
    pub format_version: u16,
    pub instance_id: u64,
    pub created_at_micros: u64,
}

impl LogHeader {
    fn new(instance_id: u64) -> Self {
        Self {
            magic: LOG_MAGIC,
            format_version: LOG_FORMAT_VERSION,
            instance_id,
            created_at_micros: now_micros(),
        }
    }

    pub fn to_bytes(&self) -> [u8; LOG_HEADER_SIZE] {
        let mut out = [0u8; LOG_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..6].copy_from_slice(&self.format_version.to_be_bytes());
        out[6..8].copy_from_slice(&0u16.to_be_bytes());
        out[8..16].copy_from_slice(&self.instance_id.to_be_bytes());
        out[16..24].copy_from_slice(&self.created_at_micros.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; LOG_HEADER_SIZE]) -> Result<Self, RelayError> {
        let magic = u32::from_be_bytes(bytes[0..4].try_into().map_err(io_slice)?);
        if magic != LOG_MAGIC {
            return Err(RelayError::MalformedRecord("invalid log magic".into()));
        }
        let format_version = u16::from_be_bytes(bytes[4..6].try_into().map_err(io_slice)?);
        if format_version != LOG_FORMAT_VERSION {
            return Err(RelayError::MalformedRecord(format!(
                "unsupported log format version {format_version}"
            )));
        }
        Ok(Self {
            magic,
            format_version,
            instance_id: u64::from_be_bytes(bytes[8..16].try_into().map_err(io_slice)?),
            created_at_micros: u64::from_be_bytes(bytes[16..24].try_into().map_err(io_slice)?),
        })
    }
}

fn io_slice<E>(_: E) -> RelayError {
    RelayError::MalformedRecord("short header slice".into())
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn frame_error(e: FrameError) -> RelayError {
    match e {
        FrameError::Truncation => RelayError::MalformedRecord("truncated frame".into()),
        FrameError::Corruption => RelayError::MalformedRecord("corrupt frame".into()),
        FrameError::Io(msg) => RelayError::Io(std::io::Error::other(msg)),
    }
}

struct LogState {
    file: Option<File>,
    /// Byte position of each committed frame; the record offset is the index.
    positions: Vec<u64>,
    end_pos: u64,
    closed: bool,
}

struct LogShared {
    path: PathBuf,
    header: LogHeader,
    durability: DurabilityMode,
    max_record_bytes: usize,
    state: Mutex<LogState>,
    readable: Condvar,
}

/// Append-only record log backed by a single file. Handles are cheap
/// clones sharing one write cursor; appends receive unique, strictly
/// increasing offsets, and tailers observe records in offset order.
#[derive(Clone)]
pub struct RecordLog {
    shared: Arc<LogShared>,
}

impl RecordLog {
    pub fn open(
        path: impl Into<PathBuf>,
        durability: DurabilityMode,
        max_record_bytes: usize,
    ) -> Result<Self, RelayError> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        let header = if len == 0 {
            let header = LogHeader::new(now_micros());
            file.write_all(&header.to_bytes())?;
            file.sync_data()?;
            header
        } else {
            if len < LOG_HEADER_SIZE as u64 {
                return Err(RelayError::MalformedRecord("truncated log header".into()));
            }
            let mut reader = File::open(&path)?;
            let mut bytes = [0u8; LOG_HEADER_SIZE];
            reader.read_exact(&mut bytes)?;
            LogHeader::from_bytes(&bytes)?
        };

        let (positions, end_pos) = scan_frames(&path)?;
        let file_len = file.metadata()?.len();
        if end_pos < file_len {
            // Torn final frame from an interrupted append; drop it so new
            // appends land on a clean boundary.
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - end_pos,
                "truncating torn log tail"
            );
            file.set_len(end_pos)?;
            file.sync_data()?;
        }

        info!(
            path = %path.display(),
            records = positions.len(),
            "record log opened"
        );
        Ok(Self {
            shared: Arc::new(LogShared {
                path,
                header,
                durability,
                max_record_bytes,
                state: Mutex::new(LogState {
                    file: Some(file),
                    positions,
                    end_pos,
                    closed: false,
                }),
                readable: Condvar::new(),
            }),
        })
    }

    pub fn header(&self) -> &LogHeader {
        &self.shared.header
    }

    pub fn path(&self) -> &std::path::Path {
        &self.shared.path
    }

    pub fn record_count(&self) -> u64 {
        self.shared.state.lock().positions.len() as u64
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Appends one record and returns its offset. The offset is durable per
    /// the configured durability mode once this returns.
    pub fn append(&self, kind: u8, payload: &[u8]) -> Result<u64, RelayError> {
        if payload.len() > self.shared.max_record_bytes {
            return Err(RelayError::LogAppend(format!(
                "record of {} bytes exceeds limit {}",
                payload.len(),
                self.shared.max_record_bytes
            )));
        }
        let mut guard = self.shared.state.lock();
        if guard.closed {
            return Err(RelayError::LogClosed);
        }
        let state = &mut *guard;
        let Some(file) = state.file.as_mut() else {
            return Err(RelayError::LogClosed);
        };

        let offset = state.positions.len() as u64;
        let bytes = encode_frame(offset, now_micros(), kind, payload)
            .map_err(|e| RelayError::LogAppend(e.to_string()))?;
        file.write_all(&bytes)
            .map_err(|e| RelayError::LogAppend(e.to_string()))?;
        if self.shared.durability == DurabilityMode::Full {
            file.sync_data()
                .map_err(|e| RelayError::LogAppend(e.to_string()))?;
        }

        let pos = state.end_pos;
        state.positions.push(pos);
        state.end_pos += bytes.len() as u64;
        drop(guard);
        self.shared.readable.notify_all();
        debug!(offset, kind, "record appended");
        Ok(offset)
    }

    pub fn sync(&self) -> Result<(), RelayError> {
        let mut state = self.shared.state.lock();
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Stops accepting appends and wakes every blocked tailer. Records
    /// already committed stay readable. Idempotent.
    pub fn close(&self) -> Result<(), RelayError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Ok(());
        }
        if let Some(mut file) = state.file.take() {
            file.flush()?;
            file.sync_data()?;
        }
        state.closed = true;
        drop(state);
        self.shared.readable.notify_all();
        info!(path = %self.shared.path.display(), "record log closed");
        Ok(())
    }

    /// Opens an independent read cursor starting at `offset`. Offsets past
    /// the current end are allowed; the tailer waits for them.
    pub fn tail_from(&self, offset: u64) -> Result<LogTailer, RelayError> {
        let file = File::open(&self.shared.path)?;
        Ok(LogTailer {
            shared: Arc::clone(&self.shared),
            file,
            next_offset: offset,
        })
    }

    /// Human-readable rendering of every committed record, with the payload
    /// summarized by `describe`.
    pub fn dump(&self, describe: &dyn Fn(u8, &[u8]) -> String) -> Result<String, RelayError> {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "log {} format_version={} records={}",
            self.shared.path.display(),
            self.shared.header.format_version,
            self.record_count()
        );
        let mut tailer = self.tail_from(0)?;
        while let Some(frame) = tailer.try_next()? {
            let _ = writeln!(
                out,
                "#{} ts={} {}",
                frame.offset,
                frame.timestamp_micros,
                describe(frame.kind, &frame.payload)
            );
        }
        Ok(out)
    }
}

/// Recovers the committed frame positions from an existing log file.
/// A torn final frame ends the scan; corruption below the torn tail is an
/// integrity error because skipping records risks silent data loss.
fn scan_frames(path: &std::path::Path) -> Result<(Vec<u64>, u64), RelayError> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut header = [0u8; LOG_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let mut positions = Vec::new();
    let mut pos = LOG_HEADER_SIZE as u64;
    let mut frames = FrameReader::new(reader);
    loop {
        match frames.next_frame() {
            Ok(Some(frame)) => {
                if frame.offset != positions.len() as u64 {
                    return Err(RelayError::MalformedRecord(format!(
                        "non-monotonic record offset {} at position {pos}",
                        frame.offset
                    )));
                }
                positions.push(pos);
                pos += frame.encoded_len();
            }
            Ok(None) => break,
            Err(FrameError::Truncation) => break,
            Err(e) => return Err(frame_error(e)),
        }
    }
    Ok((positions, pos))
}

#[derive(Debug, PartialEq, Eq)]
pub enum TailPoll {
    Record(Frame),
    TimedOut,
    Closed,
}

/// Independent read cursor over a [`RecordLog`]. Multiple tailers may
/// follow the same log without interference.
pub struct LogTailer {
    shared: Arc<LogShared>,
    file: File,
    next_offset: u64,
}

impl LogTailer {
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Returns the next committed record without blocking, or `None` when
    /// the cursor is at the end.
    pub fn try_next(&mut self) -> Result<Option<Frame>, RelayError> {
        match self.pending_position() {
            Some(pos) => Ok(Some(self.read_at(pos)?)),
            None => Ok(None),
        }
    }

    /// Waits up to `timeout` for the next record.
    pub fn poll_next(&mut self, timeout: Duration) -> Result<TailPoll, RelayError> {
        let deadline = Instant::now() + timeout;
        let pos = {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(pos) = position_of(&state, self.next_offset) {
                    break Some(pos);
                }
                if state.closed {
                    break None;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(TailPoll::TimedOut);
                }
                let _ = self.shared.readable.wait_for(&mut state, deadline - now);
            }
        };
        match pos {
            Some(pos) => Ok(TailPoll::Record(self.read_at(pos)?)),
            None => Ok(TailPoll::Closed),
        }
    }

    /// Blocks until the next record is committed. `None` means the log was
    /// closed and every committed record before the cursor was consumed.
    pub fn next_blocking(&mut self) -> Result<Option<Frame>, RelayError> {
        let pos = {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(pos) = position_of(&state, self.next_offset) {
                    break Some(pos);
                }
                if state.closed {
                    break None;
                }
                self.shared.readable.wait(&mut state);
            }
        };
        match pos {
            Some(pos) => Ok(Some(self.read_at(pos)?)),
            None => Ok(None),
        }
    }

    fn pending_position(&self) -> Option<u64> {
        let state = self.shared.state.lock();
        position_of(&state, self.next_offset)
    }

    fn read_at(&mut self, pos: u64) -> Result<Frame, RelayError> {
        self.file.seek(SeekFrom::Start(pos))?;
        let mut frames = FrameReader::new(&mut self.file);
        let frame = match frames.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(RelayError::MalformedRecord(
                    "log ended beneath a committed record".into(),
                ));
            }
            Err(e) => return Err(frame_error(e)),
        };
        if frame.offset != self.next_offset {
            return Err(RelayError::MalformedRecord(format!(
                "expected record offset {}, found {}",
                self.next_offset, frame.offset
            )));
        }
        self.next_offset += 1;
        Ok(frame)
    }
}

fn position_of(state: &LogState, offset: u64) -> Option<u64> {
    state.positions.get(usize::try_from(offset).ok()?).copied()
}
