use std::{
    collections::HashMap,
    fs,
    io::{self, BufReader},
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

use crate::codec::{self, GenotypeFormat, ParseError};
use crate::genotype::GenotypeModel;

/// A block of samples with known population labels, prepended to user data.
#[derive(Debug, Clone)]
pub struct ReferencePanel {
    genotype: GenotypeModel,
    groups: Vec<String>,
    ranges: Vec<Range<usize>>,
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("{groups} group labels but {sizes} group sizes")]
    GroupSizeMismatch { groups: usize, sizes: usize },
    #[error("failed to open reference panel {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse reference panel {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

impl ReferencePanel {
    /// Labels consecutive runs of samples, `sizes[i]` samples for
    /// `groups[i]`, starting at the first sample.
    ///
    /// Boundaries are clamped to the number of samples actually present, so a
    /// short panel yields shorter (possibly empty) ranges rather than ranges
    /// that run past the data.
    pub fn build(
        genotype: GenotypeModel,
        groups: Vec<String>,
        sizes: &[usize],
    ) -> Result<Self, ReferenceError> {
        if groups.len() != sizes.len() {
            return Err(ReferenceError::GroupSizeMismatch {
                groups: groups.len(),
                sizes: sizes.len(),
            });
        }

        let maximum = genotype.n_samples();
        let mut ranges = Vec::with_capacity(sizes.len());
        let mut to_skip = 0usize;
        for &size in sizes {
            let start = to_skip.min(maximum);
            let end = to_skip.saturating_add(size).min(maximum);
            ranges.push(start..end);
            to_skip = to_skip.saturating_add(size);
        }

        Ok(Self {
            genotype,
            groups,
            ranges,
        })
    }

    pub fn genotype(&self) -> &GenotypeModel {
        &self.genotype
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Number of leading rows of a merged dataset covered by the groups.
    pub fn n_reference_samples(&self) -> usize {
        self.ranges.last().map(|range| range.end).unwrap_or(0)
    }
}

/// Where a packaged panel lives and how its samples are grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelDefinition {
    pub name: String,
    /// Native-format genotype file, relative to the resource directory.
    pub file: PathBuf,
    pub groups: Vec<String>,
    pub sizes: Vec<usize>,
}

impl PanelDefinition {
    /// Panels shipped in the resource directory.
    pub fn standard() -> Vec<PanelDefinition> {
        vec![PanelDefinition {
            name: String::from("ancestry"),
            file: PathBuf::from("ancestry.str"),
            groups: vec![
                String::from("European"),
                String::from("Nat. American"),
                String::from("African"),
            ],
            sizes: vec![290, 246, 200],
        }]
    }

    fn load(&self, resource_dir: &Path) -> Result<ReferencePanel, ReferenceError> {
        let path = resource_dir.join(&self.file);
        let file = fs::File::open(&path).map_err(|source| ReferenceError::Io {
            path: path.clone(),
            source,
        })?;
        let genotype = codec::parse(BufReader::new(file), GenotypeFormat::Native)
            .map_err(|source| ReferenceError::Parse {
                path: path.clone(),
                source,
            })?;
        ReferencePanel::build(genotype, self.groups.clone(), &self.sizes)
    }
}

/// Read-only lookup of reference panels by name.
///
/// Built once at startup and shared between workers; cloning shares the
/// underlying panels.
#[derive(Debug, Clone, Default)]
pub struct PanelRegistry {
    panels: Arc<HashMap<String, ReferencePanel>>,
}

impl PanelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads every definition; any unreadable panel is an error.
    pub fn load(
        resource_dir: &Path,
        definitions: &[PanelDefinition],
    ) -> Result<Self, ReferenceError> {
        let mut panels = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let panel = definition.load(resource_dir)?;
            tracing::info!(
                panel = %definition.name,
                samples = panel.genotype().n_samples(),
                loci = panel.genotype().n_loci(),
                "loaded reference panel"
            );
            panels.insert(definition.name.clone(), panel);
        }
        Ok(Self {
            panels: Arc::new(panels),
        })
    }

    /// Loads the definitions whose files exist, skipping the rest.
    pub fn load_available(
        resource_dir: &Path,
        definitions: &[PanelDefinition],
    ) -> Result<Self, ReferenceError> {
        let present: Vec<PanelDefinition> = definitions
            .iter()
            .filter(|definition| {
                let exists = resource_dir.join(&definition.file).is_file();
                if !exists {
                    tracing::warn!(
                        panel = %definition.name,
                        path = %resource_dir.join(&definition.file).display(),
                        "reference panel file not found; panel disabled"
                    );
                }
                exists
            })
            .cloned()
            .collect();
        Self::load(resource_dir, &present)
    }

    /// Builds a registry from already constructed panels.
    pub fn from_panels<I>(panels: I) -> Self
    where
        I: IntoIterator<Item = (String, ReferencePanel)>,
    {
        Self {
            panels: Arc::new(panels.into_iter().collect()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ReferencePanel> {
        self.panels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.panels.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.panels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}
