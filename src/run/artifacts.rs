//! Persisted run package
//!
//! Each run owns a directory holding the ordered leaf log (one canonical
//! entry per line), the Merkle descriptor, the chain computing information,
//! the raw timestamp token and the run summary. All of them are needed for
//! verification; while a build is in flight a cursor file makes the run
//! resumable across process restarts.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::canonical::DigestAlgorithm;
use crate::chain::PeriodChainTokens;
use crate::error::TraceabilityError;
use crate::model::{LogType, RunReport, TraceabilityEvent, TraceabilityStatistics};
use crate::run::BuildPhase;

const MERKLE_FILE: &str = "merkle.json";
const COMPUTING_FILE: &str = "computing.json";
const TOKEN_FILE: &str = "token.tsp";
const EVENT_FILE: &str = "event.json";
const CURSOR_FILE: &str = "cursor.json";
const REPORT_FILE: &str = "report.json";

/// Root digest and the parameters needed to recompute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleDescriptor {
    pub root: String,
    pub algorithm: DigestAlgorithm,
    pub leaf_count: u64,
}

/// Chain inputs the timestamp imprint was computed from, persisted so an
/// auditor can re-derive the imprint without replaying history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputingInformation {
    pub root_hash: String,
    pub previous_token: Option<String>,
    pub previous_month_token: Option<String>,
    pub previous_year_token: Option<String>,
}

impl ComputingInformation {
    pub fn new(root_hash: String, chain: &PeriodChainTokens) -> Self {
        let encode = |token: &Option<Vec<u8>>| token.as_ref().map(|b| STANDARD.encode(b));
        Self {
            root_hash,
            previous_token: encode(&chain.previous),
            previous_month_token: encode(&chain.previous_month),
            previous_year_token: encode(&chain.previous_year),
        }
    }

    pub fn chain_tokens(&self) -> Result<PeriodChainTokens, TraceabilityError> {
        let decode = |token: &Option<String>| -> Result<Option<Vec<u8>>, TraceabilityError> {
            token
                .as_ref()
                .map(|t| {
                    STANDARD.decode(t.as_bytes()).map_err(|e| {
                        TraceabilityError::Fatal(format!("Corrupt chain token encoding: {}", e))
                    })
                })
                .transpose()
        };
        Ok(PeriodChainTokens {
            previous: decode(&self.previous_token)?,
            previous_month: decode(&self.previous_month_token)?,
            previous_year: decode(&self.previous_year_token)?,
        })
    }
}

/// Resumable build position, checkpointed after every chunk and every phase
/// transition, deleted once the run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCursor {
    pub phase: BuildPhase,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub entries_processed: u64,
    pub last_entry_timestamp: Option<DateTime<Utc>>,
    pub max_entries_reached: bool,
    pub statistics: TraceabilityStatistics,
}

/// Filesystem layout of one run's artifacts.
pub struct RunPackage {
    dir: PathBuf,
    run_id: String,
}

impl RunPackage {
    /// Deterministic run identifier: retries of the same period map to the
    /// same package.
    pub fn run_id(log_type: LogType, start_date: DateTime<Utc>) -> String {
        format!("{}_{}", log_type.name(), start_date.format("%Y%m%d_%H%M%S"))
    }

    pub fn open(root: &Path, run_id: &str) -> Result<Self, TraceabilityError> {
        let dir = root.join(run_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            run_id: run_id.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn leaf_file_name(&self) -> String {
        format!("{}.jsonl", self.run_id)
    }

    fn leaves_path(&self) -> PathBuf {
        self.dir.join(self.leaf_file_name())
    }

    pub fn leaf_file_exists(&self) -> bool {
        self.leaves_path().exists()
    }

    /// All completion artifacts present: the run can be replayed instead of
    /// redone.
    pub fn is_complete(&self) -> bool {
        self.leaves_path().exists()
            && self.dir.join(MERKLE_FILE).exists()
            && self.dir.join(TOKEN_FILE).exists()
            && self.dir.join(EVENT_FILE).exists()
    }

    pub fn leaf_writer(&self) -> Result<LeafWriter, TraceabilityError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.leaves_path())?;
        Ok(LeafWriter { file })
    }

    pub fn load_leaf_lines(&self) -> Result<Vec<Vec<u8>>, TraceabilityError> {
        let path = self.leaves_path();
        if !path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read(path)?;
        Ok(content
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| line.to_vec())
            .collect())
    }

    /// Drop leaf lines past `count`, discarding writes that were never
    /// checkpointed before a crash.
    pub fn truncate_leaves_to(&self, count: u64) -> Result<(), TraceabilityError> {
        let lines = self.load_leaf_lines()?;
        if lines.len() as u64 <= count {
            return Ok(());
        }
        let mut file = File::create(self.leaves_path())?;
        for line in lines.into_iter().take(count as usize) {
            file.write_all(&line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(())
    }

    pub fn write_merkle(&self, descriptor: &MerkleDescriptor) -> Result<(), TraceabilityError> {
        self.write_json(MERKLE_FILE, descriptor)
    }

    pub fn load_merkle(&self) -> Result<Option<MerkleDescriptor>, TraceabilityError> {
        self.load_json(MERKLE_FILE)
    }

    pub fn write_computing(&self, info: &ComputingInformation) -> Result<(), TraceabilityError> {
        self.write_json(COMPUTING_FILE, info)
    }

    pub fn load_computing(&self) -> Result<Option<ComputingInformation>, TraceabilityError> {
        self.load_json(COMPUTING_FILE)
    }

    pub fn write_token(&self, token_bytes: &[u8]) -> Result<(), TraceabilityError> {
        std::fs::write(self.dir.join(TOKEN_FILE), token_bytes)?;
        Ok(())
    }

    pub fn load_token(&self) -> Result<Option<Vec<u8>>, TraceabilityError> {
        let path = self.dir.join(TOKEN_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    pub fn write_event(&self, event: &TraceabilityEvent) -> Result<(), TraceabilityError> {
        self.write_json(EVENT_FILE, event)
    }

    pub fn load_event(&self) -> Result<Option<TraceabilityEvent>, TraceabilityError> {
        self.load_json(EVENT_FILE)
    }

    pub fn write_report(&self, report: &RunReport) -> Result<(), TraceabilityError> {
        self.write_json(REPORT_FILE, report)
    }

    pub fn write_cursor(&self, cursor: &RunCursor) -> Result<(), TraceabilityError> {
        self.write_json(CURSOR_FILE, cursor)
    }

    pub fn load_cursor(&self) -> Result<Option<RunCursor>, TraceabilityError> {
        self.load_json(CURSOR_FILE)
    }

    pub fn delete_cursor(&self) -> Result<(), TraceabilityError> {
        let path = self.dir.join(CURSOR_FILE);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), TraceabilityError> {
        std::fs::write(self.dir.join(name), serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, TraceabilityError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content).map_err(|e| {
            TraceabilityError::Store(format!("Corrupt artifact {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }
}

/// Append-only writer over the ordered leaf log.
pub struct LeafWriter {
    file: File,
}

impl LeafWriter {
    pub fn append(&mut self, line_bytes: &[u8]) -> Result<(), TraceabilityError> {
        self.file.write_all(line_bytes)?;
        self.file.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TraceabilityError> {
        self.file.flush()?;
        Ok(())
    }
}
