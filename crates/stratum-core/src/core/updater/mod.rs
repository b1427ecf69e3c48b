//! Periodic vulnerability-database updater.
//!
//! One background thread fetches the diff dump with a conditional GET and
//! applies it through [`crate::core::vulndump`]. A filesystem lock keeps the
//! scratch directory exclusive to one updater instance, and the stop signal
//! is honored between cycles.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fs4::FileExt;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::core::nvdcache::MetadataCache;
use crate::core::store::{Store, VULN_UPDATE_TIMESTAMP_KEY};
use crate::core::vulndump;

pub mod sources;

const DIFF_DUMP_FILENAME: &str = "diff-dump.zip";
const SCRATCH_LOCK_FILENAME: &str = "updater.lock";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Diff-dump URL to poll.
    pub url: String,
    /// Time between cycles.
    pub interval: Duration,
    /// HTTP timeout for the dump fetch.
    pub timeout: Duration,
    /// Treat 404 responses as "nothing published yet" instead of an error.
    pub fetch_is_from_central: bool,
    /// Directory for the downloaded archive; locked exclusively.
    pub scratch_dir: PathBuf,
}

impl UpdaterConfig {
    pub fn new(url: impl Into<String>, interval: Duration, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            interval,
            timeout: DEFAULT_TIMEOUT,
            fetch_is_from_central: false,
            scratch_dir: scratch_dir.into(),
        }
    }
}

enum Control {
    Stop,
}

/// Handle to the running updater thread.
pub struct Updater {
    control: Sender<Control>,
    handle: Option<JoinHandle<()>>,
}

struct UpdaterState {
    config: UpdaterConfig,
    client: reqwest::blocking::Client,
    store: Store,
    cache: Arc<MetadataCache>,
}

impl Updater {
    /// Validates the configuration and starts the update daemon.
    pub fn start(config: UpdaterConfig, store: Store, cache: Arc<MetadataCache>) -> Result<Self> {
        reqwest::Url::parse(&config.url)
            .with_context(|| format!("invalid updater URL {:?}", config.url))?;
        fs::create_dir_all(&config.scratch_dir).with_context(|| {
            format!("creating updater scratch dir {}", config.scratch_dir.display())
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building updater HTTP client")?;

        let state = UpdaterState {
            config,
            client,
            store,
            cache,
        };
        let (control, inbox) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("vuln-updater".to_string())
            .spawn(move || run_forever(&state, &inbox))
            .context("spawning updater thread")?;
        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// Signals the thread to stop and waits for it.
    pub fn stop(mut self) {
        let _ = self.control.send(Control::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_forever(state: &UpdaterState, inbox: &mpsc::Receiver<Control>) {
    // One cycle at startup, then on every tick.
    do_update_and_log(state);
    loop {
        match inbox.recv_timeout(state.config.interval) {
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => {
                debug!("updater stopping");
                return;
            }
            Err(RecvTimeoutError::Timeout) => do_update_and_log(state),
        }
    }
}

fn do_update_and_log(state: &UpdaterState) {
    if let Err(err) = do_update(state) {
        error!(%err, "updater cycle failed");
    }
}

/// Runs a single update cycle outside the daemon (maintenance tooling).
pub fn run_once(config: &UpdaterConfig, store: &Store, cache: Arc<MetadataCache>) -> Result<()> {
    reqwest::Url::parse(&config.url)
        .with_context(|| format!("invalid updater URL {:?}", config.url))?;
    fs::create_dir_all(&config.scratch_dir)
        .with_context(|| format!("creating updater scratch dir {}", config.scratch_dir.display()))?;
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()
        .context("building updater HTTP client")?;
    let state = UpdaterState {
        config: config.clone(),
        client,
        store: store.clone(),
        cache,
    };
    do_update(&state)
}

/// One update cycle. Any failure leaves the ledger's timestamp key
/// untouched; the next cycle retries from the same state.
fn do_update(state: &UpdaterState) -> Result<()> {
    info!("starting an update cycle");
    let scratch = &state.config.scratch_dir;
    let lock_path = scratch.join(SCRATCH_LOCK_FILENAME);
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("opening updater lock {}", lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        warn!("another updater instance holds the scratch lock, skipping cycle");
        return Ok(());
    }

    let dump_path = scratch.join(DIFF_DUMP_FILENAME);
    if dump_path.exists() {
        fs::remove_file(&dump_path).context("removing stale diff dump")?;
    }

    let last_applied = last_applied_time(&state.store)?;
    let fetched = fetch_dump_from_url(
        &state.client,
        &state.config.url,
        last_applied,
        state.config.fetch_is_from_central,
        &dump_path,
    )?;
    if !fetched {
        info!("no new update to fetch");
        let _ = fs4::FileExt::unlock(&lock_file);
        return Ok(());
    }

    let dump = vulndump::load_dump(&dump_path)?;
    vulndump::apply_dump(&dump, &state.store, &state.cache)?;
    let _ = fs4::FileExt::unlock(&lock_file);
    info!("update cycle completed successfully");
    Ok(())
}

fn last_applied_time(store: &Store) -> Result<Option<OffsetDateTime>> {
    let value = store
        .get_key_value(VULN_UPDATE_TIMESTAMP_KEY)
        .map_err(|err| anyhow::anyhow!(err))?;
    match value {
        None => Ok(None),
        Some(value) => {
            let parsed = OffsetDateTime::parse(value.trim(), &Rfc3339)
                .with_context(|| format!("invalid timestamp in ledger: {value:?}"))?;
            Ok(Some(parsed))
        }
    }
}

/// Conditional fetch of the dump.
///
/// Returns `false` without touching `out_path` on 304, and on 404 when
/// fetching from central (no dump was published yet).
pub fn fetch_dump_from_url(
    client: &reqwest::blocking::Client,
    url: &str,
    last_applied: Option<OffsetDateTime>,
    fetch_is_from_central: bool,
    out_path: &std::path::Path,
) -> Result<bool> {
    let mut request = client.get(url);
    if let Some(since) = last_applied {
        let stamp = since
            .format(&Rfc2822)
            .context("formatting If-Modified-Since")?;
        request = request.header(reqwest::header::IF_MODIFIED_SINCE, stamp);
    }
    let mut response = request.send().context("executing dump request")?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        return Ok(false);
    }
    if fetch_is_from_central && response.status() == reqwest::StatusCode::NOT_FOUND {
        info!("no vulnerability dumps were published yet");
        return Ok(false);
    }
    if !response.status().is_success() {
        bail!("unexpected response fetching dump: {}", response.status());
    }

    let mut out_file = fs::File::create(out_path)
        .with_context(|| format!("creating dump output {}", out_path.display()))?;
    io::copy(&mut response, &mut out_file).context("streaming dump to disk")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::testutil::temp_store;

    #[test]
    fn start_rejects_malformed_urls() {
        let (_dir, store) = temp_store();
        let scratch = tempfile::tempdir().unwrap();
        let config = UpdaterConfig::new("not a url", Duration::from_secs(60), scratch.path());
        assert!(Updater::start(config, store, Arc::new(MetadataCache::new())).is_err());
    }

    #[test]
    fn stop_terminates_the_thread() {
        let (_dir, store) = temp_store();
        let scratch = tempfile::tempdir().unwrap();
        // Unroutable URL: the initial cycle fails and is logged, the loop
        // must still exit promptly on stop.
        let mut config = UpdaterConfig::new(
            "http://127.0.0.1:1/dump.zip",
            Duration::from_secs(3600),
            scratch.path(),
        );
        config.timeout = Duration::from_millis(200);
        let updater = Updater::start(config, store, Arc::new(MetadataCache::new())).unwrap();
        updater.stop();
    }
}
