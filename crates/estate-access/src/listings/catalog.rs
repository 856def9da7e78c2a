use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::info;

use super::estate::Estate;

const SAMPLE_ESTATES: &str = include_str!("sample_estates.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to open estate catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("estate catalog is not valid listing JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("estate id '{0}' appears more than once in the catalog")]
    DuplicateId(String),
}

/// Read-only set of listings the service can open sessions against.
#[derive(Debug, Clone, Default)]
pub struct EstateCatalog {
    estates: Vec<Estate>,
}

impl EstateCatalog {
    pub fn new(estates: Vec<Estate>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for estate in &estates {
            if !seen.insert(estate.id.as_str()) {
                return Err(CatalogError::DuplicateId(estate.id.0.clone()));
            }
        }
        Ok(Self { estates })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let estates: Vec<Estate> = serde_json::from_reader(reader)?;
        Self::new(estates)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_reader(BufReader::new(file))?;
        info!(path = %path.display(), estates = catalog.len(), "estate catalog loaded");
        Ok(catalog)
    }

    /// Built-in listings used when no catalog file is configured.
    pub fn sample() -> Result<Self, CatalogError> {
        Self::from_reader(SAMPLE_ESTATES.as_bytes())
    }

    pub fn get(&self, id: &str) -> Option<&Estate> {
        self.estates.iter().find(|estate| estate.id.as_str() == id)
    }

    pub fn all(&self) -> &[Estate] {
        &self.estates
    }

    pub fn search(&self, query: &str) -> Vec<&Estate> {
        self.estates
            .iter()
            .filter(|estate| estate.matches(query))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.estates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estates.is_empty()
    }
}
