//! Parallel ingestion of registered vulnerability sources.
//!
//! Each source runs on its own thread; a shared fail-fast flag makes the
//! remaining fetchers bail as soon as any source errors or under-delivers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, bail, Context, Result};
use stratum_domain::Vulnerability;
use tracing::{info, warn};

/// One upstream vulnerability feed, pre-converted to scanner records.
pub trait VulnSource: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum record count a healthy fetch must deliver. Guards against
    /// silently truncated feeds.
    fn expected_count(&self) -> usize;

    fn fetch(&self) -> Result<Vec<Vulnerability>>;
}

/// A source backed by a directory tree of JSON files, each holding an array
/// of [`Vulnerability`] records.
pub struct DirectorySource {
    name: String,
    dir: PathBuf,
    expected_count: usize,
}

impl DirectorySource {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, expected_count: usize) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            expected_count,
        }
    }
}

impl VulnSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn expected_count(&self) -> usize {
        self.expected_count
    }

    fn fetch(&self) -> Result<Vec<Vulnerability>> {
        let mut vulnerabilities = Vec::new();
        for entry in walkdir::WalkDir::new(&self.dir)
            .sort_by(|a, b| a.path().cmp(b.path()))
        {
            let entry = entry
                .with_context(|| format!("walking source directory {}", self.dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().is_none_or(|ext| ext != "json")
            {
                continue;
            }
            let contents = std::fs::read(path)
                .with_context(|| format!("reading source file {}", path.display()))?;
            let mut records: Vec<Vulnerability> = serde_json::from_slice(&contents)
                .with_context(|| format!("parsing source file {}", path.display()))?;
            vulnerabilities.append(&mut records);
        }
        Ok(vulnerabilities)
    }
}

/// Fetches every source concurrently, failing fast on the first error.
///
/// A source delivering fewer records than it declared counts as a failure.
/// The merged result preserves source registration order.
pub fn fetch_all_sources(sources: &[Arc<dyn VulnSource>]) -> Result<Vec<Vulnerability>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }
    let failed = Arc::new(AtomicBool::new(false));
    let (results_tx, results_rx) = mpsc::channel();

    let mut handles = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        let source = Arc::clone(source);
        let failed = Arc::clone(&failed);
        let results_tx = results_tx.clone();
        handles.push(std::thread::spawn(move || {
            if failed.load(Ordering::SeqCst) {
                return;
            }
            let outcome = source.fetch().and_then(|vulnerabilities| {
                if vulnerabilities.len() < source.expected_count() {
                    failed.store(true, Ordering::SeqCst);
                    bail!(
                        "expected {} but obtained only {} vulnerabilities for source {}",
                        source.expected_count(),
                        vulnerabilities.len(),
                        source.name()
                    );
                }
                info!(source = source.name(), count = vulnerabilities.len(), "fetched source");
                Ok(vulnerabilities)
            });
            if outcome.is_err() {
                failed.store(true, Ordering::SeqCst);
            }
            let _ = results_tx.send((index, source.name().to_string(), outcome));
        }));
    }
    drop(results_tx);

    let mut merged: Vec<Option<Vec<Vulnerability>>> = (0..sources.len()).map(|_| None).collect();
    let mut first_error: Option<anyhow::Error> = None;
    for (index, name, outcome) in results_rx {
        match outcome {
            Ok(vulnerabilities) => merged[index] = Some(vulnerabilities),
            Err(err) => {
                warn!(source = %name, %err, "source fetch failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    for handle in handles {
        let _ = handle.join();
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    let mut vulnerabilities = Vec::new();
    for slot in merged {
        vulnerabilities
            .extend(slot.ok_or_else(|| anyhow!("a source thread exited without a result"))?);
    }
    Ok(vulnerabilities)
}
