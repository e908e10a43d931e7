use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Algorithm name mapped to every registered version of it.
pub type RegisteredAlgorithms = BTreeMap<String, BTreeSet<u32>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(
        "algorithm registry not found at {}. Export it first or pass --registry",
        .path.display()
    )]
    Unavailable { path: PathBuf },
    #[error("failed to read algorithm registry {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse algorithm registry {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("algorithm `{name}` has no registered versions")]
    EmptyVersions { name: String },
}

pub trait AlgorithmRegistry {
    fn registered_algorithms(&self) -> Result<RegisteredAlgorithms, RegistryError>;
}

/// Registry backed by a JSON export of the form `{"Name": [1, 2]}`.
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    path: PathBuf,
    algorithms: RegisteredAlgorithms,
}

impl JsonFileRegistry {
    /// Startup check: the export must exist and parse before any output is produced.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Err(RegistryError::Unavailable {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let algorithms = parse_registry(&content).map_err(|source| RegistryError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            algorithms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlgorithmRegistry for JsonFileRegistry {
    fn registered_algorithms(&self) -> Result<RegisteredAlgorithms, RegistryError> {
        Ok(self.algorithms.clone())
    }
}

impl AlgorithmRegistry for RegisteredAlgorithms {
    fn registered_algorithms(&self) -> Result<RegisteredAlgorithms, RegistryError> {
        Ok(self.clone())
    }
}

pub fn parse_registry(content: &str) -> Result<RegisteredAlgorithms, serde_json::Error> {
    serde_json::from_str(content)
}
