//! Tracking of GLSL extension and version requirements.
//!
//! Legalization decides per system value which extensions and minimum
//! language version the emitted GLSL needs; the tracker accumulates those
//! requirements monotonically so the emitter can print the right preamble.

use indexmap::IndexSet;

/// GLSL core profile versions, in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfileVersion {
    Glsl110,
    Glsl120,
    Glsl130,
    Glsl140,
    Glsl150,
    Glsl330,
    Glsl400,
    Glsl410,
    Glsl420,
    Glsl430,
    Glsl440,
    Glsl450,
    Glsl460,
}

/// Accumulates extension and version requirements. Requirements only ever
/// grow; requiring an older version than one already required is a no-op.
#[derive(Debug, Default)]
pub struct ExtensionUsageTracker {
    extensions: IndexSet<String>,
    version: Option<ProfileVersion>,
}

impl ExtensionUsageTracker {
    pub fn new() -> Self {
        ExtensionUsageTracker {
            extensions: IndexSet::new(),
            version: None,
        }
    }

    pub fn require_glsl_extension(&mut self, name: &str) {
        if self.extensions.insert(name.to_string()) {
            log::trace!("requiring GLSL extension {}", name);
        }
    }

    pub fn require_glsl_version(&mut self, version: ProfileVersion) {
        if self.version.map(|v| v < version).unwrap_or(true) {
            log::trace!("requiring GLSL version {:?}", version);
            self.version = Some(version);
        }
    }

    /// Required extensions, in first-require order.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|s| s.as_str())
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// The minimum required version, if any requirement was recorded.
    pub fn required_version(&self) -> Option<ProfileVersion> {
        self.version
    }
}
