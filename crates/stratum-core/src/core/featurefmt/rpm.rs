//! RPM database enumeration.
//!
//! Bit-level decoding of the Berkeley DB / sqlite package databases is not
//! done in-process: the database files are materialized into a scratch
//! directory and the host `rpm` binary is queried against it. A missing or
//! failing binary degrades to an empty result rather than failing the scan.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use stratum_domain::{Feature, FeatureVersion, Namespace};
use tracing::{debug, warn};

use crate::core::layerfiles::{path_base, LayerFiles};

use super::Lister;

/// Directories an RPM database may live under inside an image.
pub(crate) const RPM_DB_DIRS: &[&str] = &["var/lib/rpm/", "usr/lib/sysimage/rpm/"];

const QUERY_FORMAT: &str = "%{NAME}|%{EPOCHNUM}|%{VERSION}|%{RELEASE}\n";

pub(super) struct RpmLister;

impl Lister for RpmLister {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn list_features(&self, files: &LayerFiles) -> Result<Vec<FeatureVersion>> {
        let Some(dbdir) = materialize_rpm_db(files)? else {
            return Ok(Vec::new());
        };

        let output = match query_rpm(dbdir.path(), &["-qa", "--qf", QUERY_FORMAT]) {
            Some(output) => output,
            None => return Ok(Vec::new()),
        };

        let mut seen = HashSet::new();
        let mut features = Vec::new();
        for line in output.lines() {
            let fields: Vec<&str> = line.split('|').collect();
            let [name, epoch, version, release] = fields.as_slice() else {
                continue;
            };
            // Public keys are stored as packages; they are not features.
            if *name == "gpg-pubkey" {
                continue;
            }
            let version = if *epoch == "0" || epoch.is_empty() {
                format!("{version}-{release}")
            } else {
                format!("{epoch}:{version}-{release}")
            };
            if seen.insert((name.to_string(), version.clone())) {
                features.push(FeatureVersion::new(
                    Feature::new(Namespace::default(), *name),
                    version,
                ));
            }
        }
        Ok(features)
    }
}

/// Writes every RPM database file found in the layer into a scratch
/// directory usable as `--dbpath`. Returns `None` when the layer carries no
/// RPM database.
pub(crate) fn materialize_rpm_db(files: &LayerFiles) -> Result<Option<tempfile::TempDir>> {
    let mut db_files: Vec<(&String, &crate::core::layerfiles::FileData)> = files
        .files()
        .iter()
        .filter(|(path, data)| {
            !path.ends_with('/')
                && !data.contents.is_empty()
                && RPM_DB_DIRS.iter().any(|dir| path.starts_with(dir))
        })
        .collect();
    if db_files.is_empty() {
        return Ok(None);
    }
    db_files.sort_by(|a, b| a.0.cmp(b.0));

    let dbdir = tempfile::Builder::new()
        .prefix("rpmdb")
        .tempdir()
        .context("creating rpm scratch directory")?;
    for (path, data) in db_files {
        let dest = dbdir.path().join(path_base(path));
        fs::write(&dest, &data.contents)
            .with_context(|| format!("writing rpm db file {}", dest.display()))?;
    }
    Ok(Some(dbdir))
}

/// Runs `rpm --dbpath <dbdir> <args>`, returning stdout on success.
pub(crate) fn query_rpm(dbdir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("rpm")
        .arg("--dbpath")
        .arg(dbdir)
        .args(args)
        .output();
    match output {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            debug!(code = ?output.status.code(), "rpm query returned non-zero status");
            None
        }
        Err(err) => {
            warn!(%err, "rpm binary unavailable, skipping rpm features");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::featurens::testutil::layer_with_files;

    #[test]
    fn layers_without_rpm_db_yield_nothing() {
        let files = layer_with_files(&[("etc/os-release", "ID=debian\nVERSION_ID=10\n")]);
        assert!(RpmLister.list_features(&files).unwrap().is_empty());
        assert!(materialize_rpm_db(&files).unwrap().is_none());
    }

    #[test]
    fn db_files_are_materialized_by_basename() {
        let files = layer_with_files(&[
            ("var/lib/rpm/Packages", "not-a-real-db"),
            ("var/lib/rpm/rpmdb.sqlite", "also-not-real"),
        ]);
        let dbdir = materialize_rpm_db(&files).unwrap().expect("dbdir");
        assert!(dbdir.path().join("Packages").exists());
        assert!(dbdir.path().join("rpmdb.sqlite").exists());
    }
}
