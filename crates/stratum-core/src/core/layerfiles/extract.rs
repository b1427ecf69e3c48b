//! Tar-stream extraction of the files a scan needs.
//!
//! Layers are read once, keeping only paths a detector or analyzer will look
//! at plus whiteout markers and symlinks. Everything else is skipped without
//! buffering so pathological layers stay cheap.

use std::io::{BufRead, BufReader, Read};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::core::elf;
use crate::core::layerfiles::{path_base, FileData, LayerFiles, WHITEOUT_PREFIX};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Hard cap on the bytes buffered for any single stored file.
const DEFAULT_MAX_FILE_SIZE: u64 = 30 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Record the executable bit and ELF metadata for executable files.
    pub executable_metadata: bool,
    pub max_file_size: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            executable_metadata: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Reads a (possibly gzipped) layer tarball into a [`LayerFiles`].
pub fn extract_layer_files<R: Read>(reader: R, options: &ExtractOptions) -> Result<LayerFiles> {
    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf().context("reading layer stream")?;
    let gzipped = head.len() >= 2 && head[..2] == GZIP_MAGIC;

    if gzipped {
        read_entries(tar::Archive::new(GzDecoder::new(buffered)), options)
    } else {
        read_entries(tar::Archive::new(buffered), options)
    }
}

fn read_entries<R: Read>(
    mut archive: tar::Archive<R>,
    options: &ExtractOptions,
) -> Result<LayerFiles> {
    let mut data = std::collections::HashMap::new();
    let mut links: Vec<(String, String)> = Vec::new();

    for entry in archive.entries().context("opening layer tarball")? {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, "skipping unreadable tar entry");
                continue;
            }
        };
        let Some(path) = normalize_entry_path(&entry) else {
            continue;
        };

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                let key = format!("{}/", path.trim_end_matches('/'));
                if is_interesting_path(&key) {
                    data.insert(key, FileData::default());
                }
            }
            tar::EntryType::Symlink | tar::EntryType::Link => {
                if let Ok(Some(target)) = entry.link_name() {
                    let target = target.to_string_lossy().replace('\\', "/");
                    let target = target.trim_start_matches('/').to_string();
                    links.push((path, target));
                }
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let executable = entry.header().mode().map(|m| m & 0o111 != 0).unwrap_or(false);
                let whiteout = path_base(&path).starts_with(WHITEOUT_PREFIX);
                let interesting = whiteout || is_interesting_path(&path);
                let wants_elf = options.executable_metadata && executable;
                if !interesting && !wants_elf {
                    continue;
                }
                if entry.size() > options.max_file_size {
                    debug!(%path, size = entry.size(), "skipping oversized file");
                    continue;
                }
                let mut contents = Vec::with_capacity(entry.size() as usize);
                if let Err(err) = entry.read_to_end(&mut contents) {
                    warn!(%err, %path, "failed to read tar entry");
                    continue;
                }
                let elf_metadata = if wants_elf {
                    elf::parse(&contents)
                } else {
                    None
                };
                if !interesting && elf_metadata.is_none() {
                    continue;
                }
                if !interesting {
                    // Executables kept only for their link metadata carry no
                    // contents.
                    contents = Vec::new();
                }
                data.insert(
                    path,
                    FileData {
                        contents,
                        executable,
                        elf_metadata,
                    },
                );
            }
            _ => {}
        }
    }

    debug!(stored = data.len(), "extracted layer files");
    let mut files = LayerFiles::new(data);
    for (name, target) in links {
        files.insert_link(name, target);
    }
    Ok(files)
}

fn normalize_entry_path<R: Read>(entry: &tar::Entry<'_, R>) -> Option<String> {
    let path = entry.path().ok()?;
    let path = path.to_string_lossy().replace('\\', "/");
    let path = path.trim_start_matches("./").trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(path.to_string())
}

/// Whether any detector or analyzer inspects this path.
fn is_interesting_path(path: &str) -> bool {
    const EXACT: &[&str] = &[
        "etc/os-release",
        "usr/lib/os-release",
        "etc/lsb-release",
        "etc/apt/sources.list",
        "etc/redhat-release",
        "etc/centos-release",
        "etc/oracle-release",
        "etc/system-release",
        "var/lib/dpkg/status",
        "var/lib/dpkg/status.d/",
        "lib/apk/db/installed",
    ];
    const PREFIXES: &[&str] = &[
        "etc/apt/sources.list.d/",
        "var/lib/dpkg/status.d/",
        "var/lib/rpm/",
        "usr/lib/sysimage/rpm/",
        "root/buildinfo/content_manifests/",
    ];
    if EXACT.contains(&path) || PREFIXES.iter().any(|p| path.starts_with(p)) {
        return true;
    }

    // Language analyzer inputs.
    let base = path_base(path);
    path.ends_with(".jar")
        || path.ends_with(".war")
        || path.ends_with(".ear")
        || base == "package.json"
        || path.ends_with(".gemspec")
        || (base == "METADATA" && path.contains(".dist-info/"))
        || (base == "PKG-INFO" && path.contains(".egg-info"))
}
