use crate::config::PROGRESS_INTERVAL;
use crate::models::{EntityRecord, ItemRecord, PropertyRecord};
use crate::parser::DumpReader;
use crate::stats::ScanReport;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rayon::iter::{ParallelBridge, ParallelIterator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// A dump that can be scanned from the start any number of times, once per pass.
pub trait DumpSource: Sync {
    type Records: Iterator<Item = EntityRecord> + Send;

    fn records(&self) -> Result<Self::Records>;

    /// Called once the scan has drained `records`. Fails if the scan ended early.
    fn finish(&self, _records: Self::Records) -> Result<ScanReport> {
        Ok(ScanReport::default())
    }
}

/// In-memory records, mostly for tests and small embedded runs.
impl DumpSource for Vec<EntityRecord> {
    type Records = std::vec::IntoIter<EntityRecord>;

    fn records(&self) -> Result<Self::Records> {
        Ok(self.clone().into_iter())
    }
}

/// A JSON dump on disk (plain or `.bz2`), re-opened for every pass.
pub struct DumpFile {
    path: PathBuf,
    limit: Option<u64>,
}

impl DumpFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: None,
        }
    }

    /// Caps every scan at `limit` records.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DumpSource for DumpFile {
    type Records = DumpReader;

    fn records(&self) -> Result<Self::Records> {
        Ok(DumpReader::open(&self.path)?.with_limit(self.limit))
    }

    fn finish(&self, records: DumpReader) -> Result<ScanReport> {
        records
            .finish()
            .with_context(|| format!("Scan of {} did not complete", self.path.display()))
    }
}

/// Per-pass behaviour, one method per record kind.
pub trait RecordHandler: Sync {
    fn item(&self, item: &ItemRecord);

    fn property(&self, _property: &PropertyRecord) {}
}

/// Runs one full scan of `source`, dispatching records to `handler` from the rayon pool.
///
/// Fails if the source could not be read to the end; records already dispatched
/// have been handled by then.
pub fn drive<S, H>(source: &S, handler: &H, pass: &str) -> Result<ScanReport>
where
    S: DumpSource + ?Sized,
    H: RecordHandler,
{
    let mut records = source.records()?;
    let pb = ProgressBar::new_spinner();
    let seen = AtomicU64::new(0);

    info!(pass, "Starting scan");

    records.by_ref().par_bridge().for_each(|record| {
        match &record {
            EntityRecord::Item(item) => handler.item(item),
            EntityRecord::Property(property) => handler.property(property),
        }
        let n = seen.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{}: {} records", pass, n));
            pb.tick();
        }
    });

    pb.finish_and_clear();

    let mut report = source.finish(records)?;
    report.records = seen.into_inner();
    info!(
        pass,
        records = report.records,
        malformed = report.malformed,
        "Scan complete"
    );
    Ok(report)
}
