//! Language-ecosystem component discovery.
//!
//! Analyzers are registered statically and each scans the layer for the
//! artifacts of one ecosystem. They are best-effort by design: malformed
//! artifacts are logged and skipped, never failing the scan.

use stratum_domain::Component;

use crate::core::layerfiles::LayerFiles;

mod gem;
mod java;
mod npm;
mod python;

pub(crate) trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, files: &LayerFiles) -> Vec<Component>;
}

static ANALYZERS: &[&dyn Analyzer] = &[
    &java::JavaAnalyzer,
    &python::PythonAnalyzer,
    &npm::NpmAnalyzer,
    &gem::GemAnalyzer,
];

/// Runs every registered analyzer over the layer.
pub fn analyze(files: &LayerFiles) -> Vec<Component> {
    let mut components = Vec::new();
    for analyzer in ANALYZERS {
        let mut found = analyzer.analyze(files);
        if !found.is_empty() {
            tracing::debug!(
                analyzer = analyzer.name(),
                count = found.len(),
                "detected components"
            );
        }
        components.append(&mut found);
    }
    components.sort_by(|a, b| a.location.cmp(&b.location).then_with(|| a.name.cmp(&b.name)));
    components
}
