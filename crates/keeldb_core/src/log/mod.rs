//! Append-only, indexed log of entries.
//!
//! A [`Log`] stores one entry per line (see [`line`] for the format) on top of
//! any [`Backend`]. Opening a log replays every existing line to rebuild the
//! in-memory index before new appends are accepted.
//!
//! ## Load policy
//!
//! Every problem found while loading is fatal:
//!
//! - a line that does not parse, or an entry that does not deserialize
//! - an index that does not follow its predecessor
//! - a timestamp lower than its predecessor's
//! - a directive other than a leading `#signature`
//! - a trailing line without its newline
//!
//! ## Invariants
//!
//! - Indexes are dense and start at 0
//! - Entry timestamps never decrease
//! - Lines are never rewritten
//! - After a failed write the log refuses every further append

pub mod line;

use crate::clock::Micros;
use crate::config::LogConfig;
use crate::error::{CoreError, CoreResult};
use crate::mutation::LogEntry;
use crate::types::IndexAndTimestamp;
use keeldb_backend::{Backend, FileBackend, InMemoryBackend};
use line::Line;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

struct Stored<E> {
    us: Micros,
    entry: Arc<E>,
    offset: u64,
    len: usize,
}

/// An append-only log of entries of type `E`.
pub struct Log<E> {
    backend: Box<dyn Backend>,
    config: LogConfig,
    signature: Option<String>,
    entries: Vec<Stored<E>>,
    head: Micros,
    poisoned: bool,
}

impl<E: LogEntry> Log<E> {
    /// Creates an empty, non-durable log.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(InMemoryBackend::new()),
            config: LogConfig::default().sync_on_append(false),
            signature: None,
            entries: Vec::new(),
            head: 0,
            poisoned: false,
        }
    }

    /// Opens (or creates) a log file, taking an exclusive lock on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or locked, or if its
    /// content does not load cleanly.
    pub fn open_file(path: &Path, config: LogConfig) -> CoreResult<Self> {
        let backend = if config.create_dirs {
            FileBackend::open_with_create_dirs(path)?
        } else {
            FileBackend::open(path)?
        };
        Self::open(Box::new(backend), config)
    }

    /// Opens a log file for reading only, without locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not load cleanly.
    pub fn open_read_only(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)?;
        Self::open(Box::new(backend), LogConfig::default().sync_on_append(false))
    }

    /// Opens a log over an arbitrary backend, replaying its content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content does not load cleanly or the
    /// signature line cannot be written.
    pub fn open(backend: Box<dyn Backend>, config: LogConfig) -> CoreResult<Self> {
        let mut log = Self {
            backend,
            config,
            signature: None,
            entries: Vec::new(),
            head: 0,
            poisoned: false,
        };
        log.load()?;

        if let Some(expected) = log.config.signature.clone() {
            match &log.signature {
                Some(found) if *found != expected => {
                    return Err(CoreError::SignatureMismatch {
                        expected,
                        found: found.clone(),
                    });
                }
                Some(_) => {}
                None if log.backend.size()? == 0 => {
                    let directive = line::encode_directive(line::SIGNATURE_DIRECTIVE, &expected);
                    log.write(directive.as_bytes())?;
                    log.signature = Some(expected);
                }
                None => {
                    return Err(CoreError::SignatureMismatch {
                        expected,
                        found: String::new(),
                    });
                }
            }
        }

        tracing::debug!(entries = log.entries.len(), head = log.head, "log opened");
        Ok(log)
    }

    fn load(&mut self) -> CoreResult<()> {
        let data = self.backend.read_all()?;
        let text = std::str::from_utf8(&data)
            .map_err(|e| CoreError::malformed_log(0, format!("invalid UTF-8: {e}")))?;

        let mut offset = 0u64;
        let mut rest = text;
        let mut line_no = 0usize;
        while !rest.is_empty() {
            line_no += 1;
            let Some(end) = rest.find('\n') else {
                return Err(CoreError::malformed_log(line_no, "unterminated line"));
            };
            let raw = &rest[..=end];
            rest = &rest[end + 1..];

            match line::parse(raw).map_err(|m| CoreError::malformed_log(line_no, m))? {
                Line::Directive { name, value }
                    if name == line::SIGNATURE_DIRECTIVE && line_no == 1 =>
                {
                    self.signature = Some(value.to_string());
                }
                Line::Directive { name, .. } => {
                    return Err(CoreError::malformed_log(
                        line_no,
                        format!("unexpected directive #{name}"),
                    ));
                }
                Line::Entry { position, payload } => {
                    let expected = self.entries.len() as u64;
                    if position.index != expected {
                        return Err(CoreError::malformed_log(
                            line_no,
                            format!("expected index {expected}, found {}", position.index),
                        ));
                    }
                    if position.us < self.head {
                        return Err(CoreError::malformed_log(
                            line_no,
                            format!("timestamp {} precedes {}", position.us, self.head),
                        ));
                    }
                    let entry: E = serde_json::from_str(payload)
                        .map_err(|e| CoreError::malformed_log(line_no, e.to_string()))?;
                    self.entries.push(Stored {
                        us: position.us,
                        entry: Arc::new(entry),
                        offset,
                        len: raw.len(),
                    });
                    self.head = position.us;
                }
            }
            offset += raw.len() as u64;
        }
        Ok(())
    }

    /// Appends an entry stamped `us` and returns its position.
    ///
    /// # Errors
    ///
    /// Returns `TimestampRegression` if `us` is below the head, `LogPoisoned`
    /// after an earlier write failure, or the write error itself.
    pub fn append(&mut self, entry: E, us: Micros) -> CoreResult<IndexAndTimestamp> {
        self.check_writable(us)?;
        let position = IndexAndTimestamp::new(self.entries.len() as u64, us);
        let encoded = line::encode_entry(position, &entry)?;
        let offset = self.write(encoded.as_bytes())?;
        self.entries.push(Stored {
            us,
            entry: Arc::new(entry),
            offset,
            len: encoded.len(),
        });
        self.head = us;
        tracing::trace!(%position, "log append");
        Ok(position)
    }

    /// Appends a line received from another log, byte for byte.
    ///
    /// The line must carry the next index and a timestamp not below the head.
    /// A missing trailing newline is added.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLog` for lines that do not parse, `IndexMismatch`,
    /// `TimestampRegression`, `LogPoisoned`, or the write error itself.
    pub fn append_raw(&mut self, raw: &str) -> CoreResult<IndexAndTimestamp> {
        let next = self.entries.len() as u64;
        let (position, payload) = match line::parse(raw) {
            Ok(Line::Entry { position, payload }) => (position, payload),
            Ok(Line::Directive { name, .. }) => {
                return Err(CoreError::malformed_log(
                    0,
                    format!("directive #{name} is not an entry"),
                ));
            }
            Err(message) => return Err(CoreError::malformed_log(0, message)),
        };
        if position.index != next {
            return Err(CoreError::IndexMismatch {
                expected: next,
                actual: position.index,
            });
        }
        self.check_writable(position.us)?;
        let entry: E = serde_json::from_str(payload)?;

        let mut bytes = raw.strip_suffix('\n').unwrap_or(raw).to_string();
        bytes.push('\n');
        let offset = self.write(bytes.as_bytes())?;
        self.entries.push(Stored {
            us: position.us,
            entry: Arc::new(entry),
            offset,
            len: bytes.len(),
        });
        self.head = position.us;
        Ok(position)
    }

    fn check_writable(&self, us: Micros) -> CoreResult<()> {
        if self.poisoned {
            return Err(CoreError::LogPoisoned);
        }
        if us < self.head {
            return Err(CoreError::TimestampRegression {
                head: self.head,
                us,
            });
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> CoreResult<u64> {
        let result = self.backend.append(bytes).and_then(|offset| {
            self.backend.flush()?;
            if self.config.sync_on_append {
                self.backend.sync()?;
            }
            Ok(offset)
        });
        result.map_err(|e| {
            tracing::error!(error = %e, "log write failed, refusing further appends");
            self.poisoned = true;
            CoreError::from(e)
        })
    }

    /// Advances the head without appending. Lower values are ignored.
    ///
    /// The head is not written to the backend. A reopened log starts from
    /// its last entry's timestamp, which may be earlier than a head reached
    /// before closing.
    pub fn update_head(&mut self, us: Micros) {
        self.head = self.head.max(us);
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Returns true if the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest of the last entry's timestamp and the last head update.
    ///
    /// Head updates live in memory only; see [`Log::update_head`].
    #[must_use]
    pub fn head(&self) -> Micros {
        self.head
    }

    /// Position of the last entry.
    #[must_use]
    pub fn last_position(&self) -> Option<IndexAndTimestamp> {
        let index = self.entries.len().checked_sub(1)?;
        Some(IndexAndTimestamp::new(index as u64, self.entries[index].us))
    }

    /// Signature found in or written to the log.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Returns true once a write has failed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the entry at `index`.
    #[must_use]
    pub fn get(&self, index: u64) -> Option<(IndexAndTimestamp, Arc<E>)> {
        let stored = self.entries.get(usize::try_from(index).ok()?)?;
        Some((
            IndexAndTimestamp::new(index, stored.us),
            Arc::clone(&stored.entry),
        ))
    }

    /// Returns the persisted line of the entry at `index`, newline included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn raw_line(&self, index: u64) -> CoreResult<Option<String>> {
        let Some(stored) = usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
        else {
            return Ok(None);
        };
        let bytes = self.backend.read_at(stored.offset, stored.len)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| CoreError::malformed_log(index as usize + 1, e.to_string()))
    }

    /// Iterates over entries starting at `from`.
    pub fn iter_from(
        &self,
        from: u64,
    ) -> impl Iterator<Item = (IndexAndTimestamp, Arc<E>)> + '_ {
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        self.entries
            .iter()
            .enumerate()
            .skip(start)
            .map(|(i, stored)| {
                (
                    IndexAndTimestamp::new(i as u64, stored.us),
                    Arc::clone(&stored.entry),
                )
            })
    }
}

impl<E> fmt::Debug for Log<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("size", &self.entries.len())
            .field("head", &self.head)
            .field("signature", &self.signature)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn in_memory_append_and_get() {
        let mut log: Log<Value> = Log::in_memory();
        assert!(log.is_empty());

        let p0 = log.append(json!({"a": 1}), 10).unwrap();
        let p1 = log.append(json!({"a": 2}), 10).unwrap();
        assert_eq!(p0, IndexAndTimestamp::new(0, 10));
        assert_eq!(p1.index, 1);
        assert_eq!(log.size(), 2);
        assert_eq!(log.head(), 10);
        assert_eq!(*log.get(1).unwrap().1, json!({"a": 2}));
        assert!(log.get(2).is_none());
        assert_eq!(
            log.raw_line(0).unwrap().as_deref(),
            Some("{\"index\":0,\"us\":10}\t{\"a\":1}\n")
        );
    }

    #[test]
    fn timestamp_regression_rejected() {
        let mut log: Log<Value> = Log::in_memory();
        log.append(json!(1), 100).unwrap();
        let err = log.append(json!(2), 99).unwrap_err();
        assert!(matches!(err, CoreError::TimestampRegression { head: 100, us: 99 }));
        assert_eq!(log.size(), 1);
    }

    #[test]
    fn update_head_only_moves_forward() {
        let mut log: Log<Value> = Log::in_memory();
        log.append(json!(1), 100).unwrap();
        log.update_head(150);
        log.update_head(120);
        assert_eq!(log.head(), 150);
        assert!(log.append(json!(2), 140).is_err());
        log.append(json!(2), 150).unwrap();
        assert_eq!(log.last_position(), Some(IndexAndTimestamp::new(1, 150)));
    }

    #[test]
    fn iter_from_is_restartable() {
        let mut log: Log<Value> = Log::in_memory();
        for i in 0..5 {
            log.append(json!(i), i).unwrap();
        }
        let tail: Vec<u64> = log.iter_from(3).map(|(p, _)| p.index).collect();
        assert_eq!(tail, vec![3, 4]);
        assert_eq!(log.iter_from(0).count(), 5);
        assert_eq!(log.iter_from(9).count(), 0);
    }

    #[test]
    fn file_log_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("log.jsonl");
        {
            let mut log: Log<Value> = Log::open_file(&path, LogConfig::default()).unwrap();
            log.append(json!({"x": 1}), 5).unwrap();
            log.append(json!({"x": 2}), 6).unwrap();
        }
        let log: Log<Value> = Log::open_file(&path, LogConfig::default()).unwrap();
        assert_eq!(log.size(), 2);
        assert_eq!(log.head(), 6);
        assert_eq!(*log.get(0).unwrap().1, json!({"x": 1}));
    }

    #[test]
    fn signature_written_and_checked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        {
            let mut log: Log<Value> =
                Log::open_file(&path, LogConfig::new().signature("v1")).unwrap();
            log.append(json!(1), 1).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("#signature\tv1\n"));

        let log: Log<Value> = Log::open_file(&path, LogConfig::new().signature("v1")).unwrap();
        assert_eq!(log.signature(), Some("v1"));
        assert_eq!(log.size(), 1);
        drop(log);

        let err = Log::<Value>::open_file(&path, LogConfig::new().signature("v2")).unwrap_err();
        assert!(matches!(err, CoreError::SignatureMismatch { .. }));
    }

    fn load(content: &str) -> CoreResult<Log<Value>> {
        Log::open(
            Box::new(InMemoryBackend::with_data(content.as_bytes().to_vec())),
            LogConfig::default(),
        )
    }

    #[test]
    fn malformed_content_is_fatal() {
        assert!(load("{\"index\":0,\"us\":1}\t1\n").is_ok());
        for bad in [
            "garbage\n",
            "{\"index\":1,\"us\":1}\t1\n",
            "{\"index\":0,\"us\":5}\t1\n{\"index\":1,\"us\":4}\t2\n",
            "{\"index\":0,\"us\":1}\t1",
            "{\"index\":0,\"us\":1}\t1\n#head\t9\n",
            "{\"index\":0,\"us\":1}\tnot json\n",
        ] {
            let err = load(bad).unwrap_err();
            assert!(matches!(err, CoreError::MalformedLog { .. }), "{bad:?}: {err}");
        }
    }

    #[test]
    fn append_raw_copies_bytes() {
        let mut source: Log<Value> = Log::in_memory();
        source.append(json!({"k": "v"}), 7).unwrap();
        source.append(json!([1, 2, 3]), 8).unwrap();

        let mut replica: Log<Value> = Log::in_memory();
        for i in 0..source.size() {
            let raw = source.raw_line(i).unwrap().unwrap();
            replica.append_raw(&raw).unwrap();
        }
        for i in 0..source.size() {
            assert_eq!(source.raw_line(i).unwrap(), replica.raw_line(i).unwrap());
        }

        let err = replica
            .append_raw("{\"index\":5,\"us\":9}\t1")
            .unwrap_err();
        assert!(matches!(err, CoreError::IndexMismatch { expected: 2, actual: 5 }));
        let err = replica
            .append_raw("{\"index\":2,\"us\":1}\t1")
            .unwrap_err();
        assert!(matches!(err, CoreError::TimestampRegression { .. }));
        replica.append_raw("{\"index\":2,\"us\":9}\t1").unwrap();
        assert_eq!(
            replica.raw_line(2).unwrap().as_deref(),
            Some("{\"index\":2,\"us\":9}\t1\n")
        );
    }

    #[test]
    fn write_failure_poisons_log() {
        let disk = InMemoryBackend::new();
        let mut log: Log<Value> = Log::open(Box::new(disk.clone()), LogConfig::default()).unwrap();
        log.append(json!("fits"), 1).unwrap();
        disk.set_capacity(Some(disk.size().unwrap() + 5));

        assert!(matches!(
            log.append(json!("does not fit"), 2).unwrap_err(),
            CoreError::Backend(_)
        ));
        assert!(log.is_poisoned());
        disk.set_capacity(None);
        assert!(matches!(
            log.append(json!(1), 3).unwrap_err(),
            CoreError::LogPoisoned
        ));
        assert_eq!(log.size(), 1);
        drop(log);

        // The torn line is still there and fails the next load.
        assert!(!disk.text().ends_with('\n'));
        let err = Log::<Value>::open(Box::new(disk), LogConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::MalformedLog { line: 2, .. }), "{err}");
    }

    #[test]
    fn durable_appends_sync_each_line() {
        let disk = InMemoryBackend::new();
        let mut log: Log<Value> = Log::open(Box::new(disk.clone()), LogConfig::default()).unwrap();
        log.append(json!(1), 1).unwrap();
        log.append(json!(2), 2).unwrap();
        assert_eq!(disk.sync_count(), 2);

        let mut quick: Log<Value> =
            Log::open(Box::new(disk.clone()), LogConfig::default().sync_on_append(false)).unwrap();
        quick.append(json!(3), 3).unwrap();
        assert_eq!(disk.sync_count(), 2);
        assert_eq!(disk.text().lines().count(), 3);
    }

    #[test]
    fn head_updates_are_not_persisted() {
        let disk = InMemoryBackend::new();
        let before = disk.clone();
        {
            let mut log: Log<Value> = Log::open(Box::new(disk.clone()), LogConfig::default()).unwrap();
            log.append(json!("a"), 40).unwrap();
            log.update_head(90);
            assert_eq!(log.head(), 90);
        }
        assert_eq!(before.text().lines().count(), 1);

        let reopened: Log<Value> = Log::open(Box::new(disk), LogConfig::default()).unwrap();
        assert_eq!(reopened.head(), 40);
        assert_eq!(reopened.last_position(), Some(IndexAndTimestamp::new(0, 40)));
    }
}
