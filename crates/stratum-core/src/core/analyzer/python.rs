//! Python distribution metadata analysis (dist-info / egg-info).

use stratum_domain::{Component, SourceType};

use crate::core::layerfiles::{path_base, path_dir, LayerFiles};

use super::Analyzer;

pub(super) struct PythonAnalyzer;

impl Analyzer for PythonAnalyzer {
    fn name(&self) -> &'static str {
        "python"
    }

    fn analyze(&self, files: &LayerFiles) -> Vec<Component> {
        let mut components = Vec::new();
        for (path, data) in files.files() {
            if !is_metadata_file(path) {
                continue;
            }
            let contents = String::from_utf8_lossy(&data.contents);
            let mut name = None;
            let mut version = None;
            for line in contents.lines() {
                if line.is_empty() {
                    // Headers end at the first blank line.
                    break;
                }
                if let Some(value) = line.strip_prefix("Name: ") {
                    name = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("Version: ") {
                    version = Some(value.trim().to_string());
                }
            }
            let (Some(name), Some(version)) = (name, version) else {
                continue;
            };
            components.push(Component::new(
                name,
                version,
                SourceType::Python,
                path_dir(path),
            ));
        }
        components
    }
}

fn is_metadata_file(path: &str) -> bool {
    let base = path_base(path);
    (base == "METADATA" && path_dir(path).ends_with(".dist-info"))
        || (base == "PKG-INFO" && path_dir(path).ends_with(".egg-info"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::featurens::testutil::layer_with_files;

    #[test]
    fn reads_dist_info_metadata() {
        let files = layer_with_files(&[(
            "usr/lib/python3/dist-packages/flask-2.0.1.dist-info/METADATA",
            "Metadata-Version: 2.1\nName: Flask\nVersion: 2.0.1\n\nWeb framework.\n",
        )]);
        let components = PythonAnalyzer.analyze(&files);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "Flask");
        assert_eq!(components[0].version, "2.0.1");
        assert_eq!(
            components[0].location,
            "usr/lib/python3/dist-packages/flask-2.0.1.dist-info"
        );
    }

    #[test]
    fn reads_egg_info_pkg_info() {
        let files = layer_with_files(&[(
            "usr/lib/python2.7/site-packages/six.egg-info/PKG-INFO",
            "Name: six\nVersion: 1.16.0\n",
        )]);
        let components = PythonAnalyzer.analyze(&files);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "six");
    }

    #[test]
    fn body_headers_are_not_metadata() {
        let files = layer_with_files(&[(
            "opt/pkg-1.0.dist-info/METADATA",
            "Metadata-Version: 2.1\n\nName: fake\nVersion: 9.9\n",
        )]);
        assert!(PythonAnalyzer.analyze(&files).is_empty());
    }
}
