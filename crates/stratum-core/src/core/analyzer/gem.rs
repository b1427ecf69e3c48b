//! Ruby gem analysis (installed gemspec files).

use std::sync::OnceLock;

use regex::Regex;
use stratum_domain::{Component, SourceType};

use crate::core::layerfiles::LayerFiles;

use super::Analyzer;

pub(super) struct GemAnalyzer;

impl Analyzer for GemAnalyzer {
    fn name(&self) -> &'static str {
        "gem"
    }

    fn analyze(&self, files: &LayerFiles) -> Vec<Component> {
        let mut components = Vec::new();
        for (path, data) in files.files() {
            if !path.ends_with(".gemspec") || !path.contains("specifications/") {
                continue;
            }
            let contents = String::from_utf8_lossy(&data.contents);
            let (Some(name), Some(version)) = (field(&contents, "name"), gem_version(&contents))
            else {
                continue;
            };
            components.push(Component::new(name, version, SourceType::Gem, path.clone()));
        }
        components
    }
}

fn field(contents: &str, field: &str) -> Option<String> {
    static CACHE: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    let patterns = CACHE.get_or_init(|| {
        ["name", "version"]
            .iter()
            .map(|f| {
                (
                    (*f).to_string(),
                    Regex::new(&format!(r#"\.{f}\s*=\s*["']([^"']+)["']"#)).unwrap(),
                )
            })
            .collect()
    });
    let regex = &patterns.iter().find(|(name, _)| name.as_str() == field)?.1;
    regex
        .captures(contents)
        .map(|captures| captures[1].to_string())
}

fn gem_version(contents: &str) -> Option<String> {
    // `s.version = "1.2.3"` or `s.version = Gem::Version.new("1.2.3")`.
    static VERSION: OnceLock<Regex> = OnceLock::new();
    let regex = VERSION.get_or_init(|| {
        Regex::new(r#"\.version\s*=\s*(?:Gem::Version\.new\()?\s*["']([^"']+)["']"#).unwrap()
    });
    regex
        .captures(contents)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::featurens::testutil::layer_with_files;

    #[test]
    fn parses_installed_gemspecs() {
        let spec = "Gem::Specification.new do |s|\n  s.name = \"rake\".freeze\n  s.version = \"13.0.6\"\nend\n";
        let files = layer_with_files(&[(
            "usr/lib/ruby/gems/3.0.0/specifications/rake-13.0.6.gemspec",
            spec,
        )]);
        let components = GemAnalyzer.analyze(&files);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "rake");
        assert_eq!(components[0].version, "13.0.6");
        assert_eq!(components[0].source_type, SourceType::Gem);
    }

    #[test]
    fn gemspecs_outside_specifications_are_ignored() {
        let files = layer_with_files(&[("src/myapp/myapp.gemspec", "s.name = \"myapp\"\n")]);
        assert!(GemAnalyzer.analyze(&files).is_empty());
    }
}
