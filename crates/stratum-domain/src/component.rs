//! Language-ecosystem components discovered inside a layer.

use serde::{Deserialize, Serialize};

/// Which application package manager delivered a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Java,
    Python,
    Npm,
    Gem,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Python => "python",
            Self::Npm => "npm",
            Self::Gem => "gem",
        }
    }
}

/// One discovered component.
///
/// `location` is the path to the artifact that declared it; nested archives
/// chain segments with `:` (`app.war:lib/util.jar`). Only the outermost
/// segment is a real filesystem path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub version: String,
    pub source_type: SourceType,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_attributes: Option<JavaAttributes>,
    #[serde(default)]
    pub from_package_manager: bool,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source_type: SourceType,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source_type,
            location: location.into(),
            java_attributes: None,
            from_package_manager: false,
        }
    }

    /// Outermost filesystem path of `location`, dropping nested-archive segments.
    pub fn outermost_location(&self) -> &str {
        match self.location.split_once(':') {
            Some((outer, _)) => outer,
            None => &self.location,
        }
    }
}

/// Extra identification carried by Java artifacts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JavaAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub implementation_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub specification_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
}
