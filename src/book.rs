//! Ledger - durable keyed record store
//!
//! `FileBook` is an append-only JSON-lines journal: every add or update
//! appends one line and syncs before returning, so the in-memory working
//! sets of the scheduler and broker can always be rebuilt from disk after
//! a crash. `MemBook` backs tests and embedders that bring their own
//! durability.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{Book, Error, Record, Result};

/// In-memory ledger.
#[derive(Default)]
pub struct MemBook {
    entries: BTreeMap<u64, Record>,
    next_seq: u64,
}

impl MemBook {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 1,
        }
    }
}

impl Book for MemBook {
    fn add_entry(&mut self, record: &Record) -> Result<u64> {
        let seq = self.next_seq.max(1);
        self.next_seq = seq + 1;
        self.entries.insert(seq, record.clone());
        Ok(seq)
    }

    fn update_entry(&mut self, seq: u64, record: &Record, upsert: bool) -> Result<bool> {
        if !upsert && !self.entries.contains_key(&seq) {
            return Ok(false);
        }
        self.entries.insert(seq, record.clone());
        if seq >= self.next_seq {
            self.next_seq = seq + 1;
        }
        Ok(true)
    }

    fn get_entry(&self, seq: u64) -> Result<Option<Record>> {
        Ok(self.entries.get(&seq).cloned())
    }

    fn each_entry(&self, f: &mut dyn FnMut(u64, &Record) -> bool) -> Result<()> {
        for (seq, record) in &self.entries {
            if !f(*seq, record) {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JournalLineRef<'a> {
    seq: u64,
    record: &'a Record,
}

#[derive(Deserialize)]
struct JournalLine {
    seq: u64,
    record: Record,
}

/// File-backed ledger: append-only JSON-lines journal, last write per
/// sequence id wins on replay.
pub struct FileBook {
    path: PathBuf,
    file: File,
    entries: BTreeMap<u64, Record>,
    next_seq: u64,
}

impl FileBook {
    /// Open (or create) a journal, replaying any existing entries.
    ///
    /// A torn trailing line, as left by a crash mid-append, ends the
    /// replay with a warning; everything before it is intact because
    /// completed appends were synced.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = BTreeMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Fatal(format!("ledger read {}: {}", path.display(), e)))?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalLine>(line) {
                    Ok(entry) => {
                        entries.insert(entry.seq, entry.record);
                    }
                    Err(e) => {
                        warn!(
                            "ledger journal {} torn at line {}: {}",
                            path.display(),
                            lineno + 1,
                            e
                        );
                        break;
                    }
                }
            }
        }

        let next_seq = entries.keys().next_back().map(|s| s + 1).unwrap_or(1);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Fatal(format!("ledger open {}: {}", path.display(), e)))?;

        debug!(
            "opened ledger {} with {} entries",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            file,
            entries,
            next_seq,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn append(&mut self, seq: u64, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(&JournalLineRef { seq, record })?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .map_err(|e| Error::Fatal(format!("ledger append: {}", e)))?;
        self.file
            .sync_data()
            .map_err(|e| Error::Fatal(format!("ledger sync: {}", e)))?;
        Ok(())
    }
}

impl Book for FileBook {
    fn add_entry(&mut self, record: &Record) -> Result<u64> {
        let seq = self.next_seq.max(1);
        self.append(seq, record)?;
        self.next_seq = seq + 1;
        self.entries.insert(seq, record.clone());
        Ok(seq)
    }

    fn update_entry(&mut self, seq: u64, record: &Record, upsert: bool) -> Result<bool> {
        if !upsert && !self.entries.contains_key(&seq) {
            return Ok(false);
        }
        self.append(seq, record)?;
        self.entries.insert(seq, record.clone());
        if seq >= self.next_seq {
            self.next_seq = seq + 1;
        }
        Ok(true)
    }

    fn get_entry(&self, seq: u64) -> Result<Option<Record>> {
        Ok(self.entries.get(&seq).cloned())
    }

    fn each_entry(&self, f: &mut dyn FnMut(u64, &Record) -> bool) -> Result<()> {
        for (seq, record) in &self.entries {
            if !f(*seq, record) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Schedule, TradeInfo, TradeRequest, TradeStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn trade_record(amount: i64) -> Record {
        let req = TradeRequest {
            market: None,
            amount: Decimal::from(amount),
            sell_currency: "RTC".into(),
            target_currency: "USD".into(),
            price: None,
            deposit_address: None,
            withdraw_address: None,
            schedule: Schedule::Now,
        };
        Record::Trade(TradeInfo::from_request(req, Utc::now()))
    }

    #[test]
    fn test_mem_book_add_update_get() {
        let mut book = MemBook::new();
        let seq = book.add_entry(&trade_record(1)).unwrap();
        assert_eq!(seq, 1);
        assert!(book.get_entry(seq).unwrap().is_some());
        assert!(book.get_entry(99).unwrap().is_none());

        let updated = trade_record(2);
        assert!(book.update_entry(seq, &updated, false).unwrap());
        assert!(!book.update_entry(42, &updated, false).unwrap());
        assert!(book.update_entry(42, &updated, true).unwrap());
    }

    #[test]
    fn test_each_entry_stops_early() {
        let mut book = MemBook::new();
        for i in 0..5 {
            book.add_entry(&trade_record(i)).unwrap();
        }
        let mut seen = 0;
        book.each_entry(&mut |_, _| {
            seen += 1;
            seen < 3
        })
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_file_book_replays_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.jsonl");

        let (seq1, seq2) = {
            let mut book = FileBook::open(&path).unwrap();
            let a = book.add_entry(&trade_record(1)).unwrap();
            let b = book.add_entry(&trade_record(2)).unwrap();
            let replaced = trade_record(7);
            assert!(book.update_entry(a, &replaced, false).unwrap());
            (a, b)
        };

        let book = FileBook::open(&path).unwrap();
        assert_eq!(book.len(), 2);
        match book.get_entry(seq1).unwrap().unwrap() {
            Record::Trade(t) => assert_eq!(t.amount, Decimal::from(7)),
            _ => panic!("wrong record"),
        }
        assert!(book.get_entry(seq2).unwrap().is_some());
    }

    #[test]
    fn test_file_book_seq_monotonic_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.jsonl");
        {
            let mut book = FileBook::open(&path).unwrap();
            book.add_entry(&trade_record(1)).unwrap();
            book.add_entry(&trade_record(2)).unwrap();
        }
        let mut book = FileBook::open(&path).unwrap();
        assert_eq!(book.add_entry(&trade_record(3)).unwrap(), 3);
    }

    #[test]
    fn test_file_book_ignores_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.jsonl");
        {
            let mut book = FileBook::open(&path).unwrap();
            book.add_entry(&trade_record(1)).unwrap();
        }
        // Simulate a crash mid-append.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"seq\":2,\"rec").unwrap();

        let book = FileBook::open(&path).unwrap();
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_file_book_status_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.jsonl");
        let seq = {
            let mut book = FileBook::open(&path).unwrap();
            book.add_entry(&trade_record(4)).unwrap()
        };
        let book = FileBook::open(&path).unwrap();
        match book.get_entry(seq).unwrap().unwrap() {
            Record::Trade(t) => assert_eq!(t.status, TradeStatus::Recorded),
            _ => panic!("wrong record"),
        }
    }
}
