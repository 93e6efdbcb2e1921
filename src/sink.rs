use crate::config::WRITER_BUFFER_SIZE;
use anyhow::{Context, Result};
use csv::{QuoteStyle, Writer, WriterBuilder};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Renders one record with `style`, without the record terminator.
fn render_record<I, T>(fields: I, style: QuoteStyle) -> Result<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .quote_style(style)
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let mut bytes = writer.into_inner().map_err(|e| e.into_error())?;
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    Ok(String::from_utf8(bytes)?)
}

/// Escapes a free-text CSV field.
///
/// Values containing a comma, a double quote or a line break are wrapped in quotes
/// with internal quotes doubled; everything else passes through untouched. This is
/// what every [`CsvFileSink`] created with [`CsvFileSink::create`] applies per field.
pub fn escape_csv(value: &str) -> Cow<'_, str> {
    if value.is_empty() {
        return Cow::Borrowed(value);
    }
    match render_record([value], QuoteStyle::Necessary) {
        Ok(field) if field != value => Cow::Owned(field),
        _ => Cow::Borrowed(value),
    }
}

/// Wraps a field in quotes regardless of content, doubling internal quotes.
///
/// Meant for sinks opened with [`QuoteStyle::Never`], which write fields verbatim.
pub fn quote_always(value: &str) -> Cow<'_, str> {
    match render_record([value], QuoteStyle::Always) {
        Ok(field) => Cow::Owned(field),
        Err(_) => Cow::Owned(format!("\"{}\"", value.replace('"', "\"\""))),
    }
}

/// Destination for rows of raw field values. Implementations serialize writes internally.
pub trait RowSink: Send + Sync {
    /// Writes rows back to back, without interleaving other writers.
    fn write_rows(&self, rows: &[Vec<String>]) -> io::Result<()>;

    fn write_row(&self, row: Vec<String>) -> io::Result<()> {
        self.write_rows(std::slice::from_ref(&row))
    }

    fn flush(&self) -> io::Result<()>;
}

/// A CSV file behind a mutex, header written on creation.
pub struct CsvFileSink {
    path: PathBuf,
    writer: Mutex<Writer<BufWriter<File>>>,
}

impl CsvFileSink {
    /// Quotes fields only when their content requires it.
    pub fn create(path: &Path, header: &[&str]) -> Result<Self> {
        Self::with_quote_style(path, header, QuoteStyle::Necessary)
    }

    pub fn with_quote_style(path: &Path, header: &[&str], style: QuoteStyle) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        let mut writer = WriterBuilder::new()
            .quote_style(style)
            .from_writer(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file));
        writer
            .write_record(header)
            .with_context(|| format!("Failed to write header to: {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush header to: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and releases the file.
    pub fn close(self) -> Result<()> {
        let mut writer = self
            .writer
            .into_inner()
            .map_err(|_| anyhow::anyhow!("Writer lock poisoned: {}", self.path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush: {}", self.path.display()))
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Writer<BufWriter<File>>>> {
        self.writer
            .lock()
            .map_err(|_| io::Error::other("writer lock poisoned"))
    }
}

impl RowSink for CsvFileSink {
    fn write_rows(&self, rows: &[Vec<String>]) -> io::Result<()> {
        let mut writer = self.lock()?;
        for row in rows {
            writer.write_record(row)?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// Keeps rows in memory.
pub struct MemorySink {
    rows: Mutex<Vec<Vec<String>>>,
    style: QuoteStyle,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_quote_style(QuoteStyle::Necessary)
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `style` only affects [`MemorySink::lines`].
    pub fn with_quote_style(style: QuoteStyle) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            style,
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Rows rendered the way a file sink with the same quote style would write them.
    pub fn lines(&self) -> Vec<String> {
        self.rows()
            .iter()
            .filter_map(|row| render_record(row, self.style).ok())
            .collect()
    }
}

impl RowSink for MemorySink {
    fn write_rows(&self, rows: &[Vec<String>]) -> io::Result<()> {
        self.rows
            .lock()
            .map_err(|_| io::Error::other("sink lock poisoned"))?
            .extend_from_slice(rows);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
