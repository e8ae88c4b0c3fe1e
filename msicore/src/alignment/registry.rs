use std::collections::BTreeMap;

use crate::algorithm::solver::AffineSolver;

/// Registry key of an image name: spaces become underscores.
pub fn normalize_image_name(name: &str) -> String {
    name.replace(' ', "_")
}

/// Both fitted maps of one MSI image.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryEntry {
    /// machine coordinates to reference image pixels
    pub to_reference_pixels: AffineSolver,
    /// machine coordinates to `(depth, lateral)`
    pub to_depth_lateral: AffineSolver,
}

impl RegistryEntry {
    pub fn new(to_reference_pixels: AffineSolver, to_depth_lateral: AffineSolver) -> Self {
        RegistryEntry { to_reference_pixels, to_depth_lateral }
    }

    /// Entry mapping machine coordinates onto themselves in both spaces.
    pub fn identity() -> Self {
        RegistryEntry::new(AffineSolver::identity(), AffineSolver::identity())
    }
}

/// Fitted transforms per MSI image.
///
/// A registry is produced whole by one pairing run; entries are replaced, never
/// patched field by field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformationRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl TransformationRegistry {
    pub fn new() -> Self {
        TransformationRegistry::default()
    }

    pub fn insert(&mut self, image: &str, entry: RegistryEntry) {
        self.entries.insert(normalize_image_name(image), entry);
    }

    pub fn get(&self, image: &str) -> Option<&RegistryEntry> {
        self.entries.get(&normalize_image_name(image))
    }

    pub fn contains(&self, image: &str) -> bool {
        self.get(image).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
