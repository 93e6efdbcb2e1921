use crate::config::CACHE_VERSION;
use crate::labels::{LabelCache, LabelMap};
use anyhow::{bail, Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub input_size: u64,
    pub language: String,
    pub entry_count: usize,
}

#[derive(Deserialize)]
struct LabelCacheDe {
    metadata: CacheMetadata,
    entries: LabelMap,
}

/// Borrows the cache entries to avoid cloning ~100M boxed strings during serialization.
#[derive(Serialize)]
struct LabelCacheSer<'a> {
    metadata: CacheMetadata,
    entries: &'a LabelMap,
}

pub fn cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join("labels.cache")
}

fn get_input_metadata(input_path: &Path) -> Result<(u64, u64)> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path.display()))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    let size = metadata.len();
    Ok((mtime, size))
}

fn read_cache(cache_path: &Path) -> Result<LabelCacheDe> {
    let file_size = fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(cache_path)
        .with_context(|| format!("Failed to open cache file: {}", cache_path.display()))?;
    let reader = BufReader::with_capacity(256 * 1024, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));
    options
        .deserialize_from(reader)
        .context("Failed to deserialize label cache")
}

/// Returns `Ok(Some(cache))` if the cache is valid, `Ok(None)` if missing or stale.
pub fn try_load_label_cache(
    cache_path: &Path,
    input_path: &Path,
    language: &str,
) -> Result<Option<LabelCache>> {
    if !cache_path.exists() {
        return Ok(None);
    }

    let cache = match read_cache(cache_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Cache file is corrupt or unreadable");
            return Ok(None);
        }
    };
    let metadata = &cache.metadata;

    if metadata.version != CACHE_VERSION {
        info!(
            cached = metadata.version,
            current = CACHE_VERSION,
            "Cache version mismatch"
        );
        return Ok(None);
    }

    let input = input_path.to_string_lossy();
    if metadata.input_path != input {
        info!(
            cached = metadata.input_path,
            current = %input,
            "Cache input path mismatch"
        );
        return Ok(None);
    }

    if metadata.language != language {
        info!(
            cached = metadata.language,
            current = language,
            "Cache language mismatch"
        );
        return Ok(None);
    }

    let (mtime, size) = get_input_metadata(input_path)?;
    if metadata.input_mtime != mtime || metadata.input_size != size {
        info!(
            cached_mtime = metadata.input_mtime,
            current_mtime = mtime,
            cached_size = metadata.input_size,
            current_size = size,
            "Input file has changed since cache was created"
        );
        return Ok(None);
    }

    info!(entries = metadata.entry_count, "Label cache loaded from disk");

    Ok(Some(LabelCache::from_map(cache.entries)))
}

/// Serializes the cache by reference (no cloning) and writes atomically via rename.
pub fn save_label_cache(
    cache: &LabelCache,
    input_path: &Path,
    language: &str,
    output_dir: &Path,
) -> Result<()> {
    let path = cache_path(output_dir);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let (mtime, size) = get_input_metadata(input_path)?;
    let entry_count = cache.len();

    let serialized = LabelCacheSer {
        metadata: CacheMetadata {
            version: CACHE_VERSION,
            input_path: input_path.to_string_lossy().into_owned(),
            input_mtime: mtime,
            input_size: size,
            language: language.to_string(),
            entry_count,
        },
        entries: cache.map(),
    };

    let tmp_path = path.with_extension("cache.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp cache file: {}", tmp_path.display()))?;
    let writer = BufWriter::new(file);

    bincode::DefaultOptions::new()
        .serialize_into(writer, &serialized)
        .context("Failed to serialize label cache")?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("Failed to rename temp cache file to: {}", path.display()))?;

    info!(entries = entry_count, path = ?path, "Label cache saved");

    Ok(())
}

/// Loads a label cache without validating staleness.
pub fn load_label_cache(cache_path: &Path) -> Result<LabelCache> {
    if !cache_path.exists() {
        bail!("Cache file does not exist: {}", cache_path.display());
    }
    let cache = read_cache(cache_path)?;
    info!(entries = cache.metadata.entry_count, "Label cache loaded from disk");
    Ok(LabelCache::from_map(cache.entries))
}
