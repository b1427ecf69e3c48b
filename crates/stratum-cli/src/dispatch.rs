use std::sync::Arc;

use anyhow::{bail, Context, Result};
use time::OffsetDateTime;
use tracing::info;

use stratum_core::{
    fetch_all_sources, run_once, vulndump, DirectorySource, MetadataCache, MetadataEnricher,
    NvdRecord, Store, UpdaterConfig, VulnSource,
};

use crate::cli::{CommandCli, GenerateDumpArgs, ImportDumpArgs, UpdateArgs};

pub fn dispatch_command(command: &CommandCli) -> Result<i32> {
    match command {
        CommandCli::GenerateDump(args) => generate_dump(args),
        CommandCli::ImportDump(args) => import_dump(args),
        CommandCli::Update(args) => update(args),
    }
}

fn generate_dump(args: &GenerateDumpArgs) -> Result<i32> {
    if args.out_file.extension().is_none_or(|ext| ext != "zip") {
        bail!("invalid out-file {}; must end in .zip", args.out_file.display());
    }

    // The dump is only guaranteed correct as of the moment fetching started.
    let start_time = OffsetDateTime::now_utc();

    let sources: Vec<Arc<dyn VulnSource>> = args
        .source_dirs
        .iter()
        .map(|dir| {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string());
            let expected = usize::from(!args.allow_empty_sources);
            Arc::new(DirectorySource::new(name, dir, expected)) as Arc<dyn VulnSource>
        })
        .collect();

    info!(source_count = sources.len(), "fetching vulnerability sources");
    let mut vulnerabilities = fetch_all_sources(&sources)?;
    info!(total = vulnerabilities.len(), "finished fetching sources");

    let nvd_records = match &args.nvd_dir {
        Some(dir) => load_nvd_records(dir)?,
        None => Vec::new(),
    };
    if !nvd_records.is_empty() {
        let enricher = MetadataEnricher::build(nvd_records.clone());
        for vulnerability in &mut vulnerabilities {
            enricher.enrich(vulnerability);
        }
        enricher.purge();
    }

    let manifest = vulndump::DumpManifest::full(start_time)?;
    let os_vulns = vulndump::OsVulns {
        vulnerabilities,
        deleted: Vec::new(),
    };
    vulndump::write_dump(&args.out_file, &manifest, &os_vulns, &nvd_records, &[])?;
    info!(out_file = %args.out_file.display(), "wrote vulnerability dump");
    Ok(0)
}

fn load_nvd_records(dir: &std::path::Path) -> Result<Vec<NvdRecord>> {
    let mut records = Vec::new();
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading NVD directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    for path in paths {
        let contents = std::fs::read(&path)
            .with_context(|| format!("reading NVD file {}", path.display()))?;
        let mut parsed: Vec<NvdRecord> = serde_json::from_slice(&contents)
            .with_context(|| format!("parsing NVD file {}", path.display()))?;
        records.append(&mut parsed);
    }
    Ok(records)
}

fn import_dump(args: &ImportDumpArgs) -> Result<i32> {
    let store = Store::open(&args.db).map_err(|err| anyhow::anyhow!(err))?;
    let cache = MetadataCache::new();
    let dump = vulndump::load_dump(&args.dump)?;
    vulndump::apply_dump(&dump, &store, &cache)?;
    info!(dump = %args.dump.display(), db = %args.db.display(), "dump applied");
    Ok(0)
}

fn update(args: &UpdateArgs) -> Result<i32> {
    let store = Store::open(&args.db).map_err(|err| anyhow::anyhow!(err))?;
    let scratch = match &args.scratch_dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join("stratum-updater"),
    };
    let mut config = UpdaterConfig::new(&args.url, std::time::Duration::from_secs(0), scratch);
    config.timeout = args.timeout();
    config.fetch_is_from_central = args.from_central;
    run_once(&config, &store, Arc::new(MetadataCache::new()))?;
    Ok(0)
}
