//! Process-environment toggles recognized by the scanner.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Captured view of the process environment.
///
/// Scan paths read configuration through a snapshot taken at entry so that
/// concurrent ingestions observe a consistent set of toggles and tests can
/// inject values without touching the real environment.
#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn bool_var(&self, key: &str, default: bool) -> bool {
        match self.var(key) {
            Some(value) => {
                let lowered = value.trim().to_ascii_lowercase();
                !matches!(lowered.as_str(), "" | "0" | "false" | "no" | "off")
            }
            None => default,
        }
    }

    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Effective scan configuration derived from an [`EnvSnapshot`].
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Enumerate language-ecosystem components (`LANGUAGE_VULNS`, default on).
    pub language_vulns: bool,
    /// Parse ELF metadata for executables (`ACTIVE_VULN_MGMT`, default off).
    pub active_vuln_mgmt: bool,
    /// Emit an empty feature set instead of failing on an unsupported
    /// distribution (`CONTINUE_UNKNOWN_OS`, default off).
    pub continue_unknown_os: bool,
    /// Location of the certified-scan repository→CPE mapping
    /// (`REPO_TO_CPE_DIR`).
    pub repo_to_cpe_dir: Option<PathBuf>,
}

impl ScanConfig {
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        Self {
            language_vulns: snapshot.bool_var("LANGUAGE_VULNS", true),
            active_vuln_mgmt: snapshot.bool_var("ACTIVE_VULN_MGMT", false),
            continue_unknown_os: snapshot.bool_var("CONTINUE_UNKNOWN_OS", false),
            repo_to_cpe_dir: snapshot.var("REPO_TO_CPE_DIR").map(PathBuf::from),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            language_vulns: true,
            active_vuln_mgmt: false,
            continue_unknown_os: false,
            repo_to_cpe_dir: None,
        }
    }
}
