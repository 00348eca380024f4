//! Common types for describing a debug target.
//!
//! A [`Profile`] carries what a symbol engine would normally supply: the
//! pointer width, symbol addresses and structure layouts. A [`Snapshot`]
//! bundles a profile with captured memory so a session can be replayed
//! without a live target.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::memory::{MemoryError, SnapshotMemory};

/// Profile and snapshot loading errors
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed profile: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Region at {base:#x} has invalid hex bytes: {source}")]
    RegionBytes {
        base: u64,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Unsupported pointer size {0}")]
    PointerSize(usize),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Layout of a single structure type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeLayout {
    /// Total size in bytes
    pub size: u64,
    /// Field name to byte offset
    #[serde(default)]
    pub fields: BTreeMap<String, u64>,
}

impl TypeLayout {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: &str, offset: u64) -> Self {
        self.fields.insert(name.to_string(), offset);
        self
    }
}

/// Symbols and type layouts for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Pointer width in bytes (4 or 8)
    pub pointer_size: usize,
    /// Whether the target is a kernel
    #[serde(default)]
    pub kernel: bool,
    /// Module-qualified symbol name (`nt!Foo`) to address
    #[serde(default)]
    pub symbols: BTreeMap<String, u64>,
    /// Module-qualified type name (`nt!_FOO`) to layout
    #[serde(default)]
    pub types: BTreeMap<String, TypeLayout>,
}

impl Profile {
    pub fn new(pointer_size: usize, kernel: bool) -> Self {
        Self {
            pointer_size,
            kernel,
            symbols: BTreeMap::new(),
            types: BTreeMap::new(),
        }
    }

    /// Load a profile from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let profile: Profile = serde_json::from_str(&read_file(path.as_ref())?)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        match self.pointer_size {
            4 | 8 => Ok(()),
            other => Err(ProfileError::PointerSize(other)),
        }
    }
}

/// A captured memory region, hex encoded on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base: u64,
    pub bytes: String,
}

/// Profile plus captured memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub profile: Profile,
    #[serde(default)]
    pub regions: Vec<MemoryRegion>,
}

impl Snapshot {
    /// Capture a profile and an in-memory image
    pub fn capture(profile: Profile, memory: &SnapshotMemory) -> Self {
        let regions = memory
            .regions()
            .map(|(base, bytes)| MemoryRegion {
                base,
                bytes: hex::encode(bytes),
            })
            .collect();

        Self { profile, regions }
    }

    /// Load a snapshot from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let snapshot: Snapshot = serde_json::from_str(&read_file(path.as_ref())?)?;
        snapshot.profile.validate()?;
        Ok(snapshot)
    }

    /// Write the snapshot as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ProfileError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Decode regions into a readable memory image
    pub fn memory(&self) -> Result<SnapshotMemory, ProfileError> {
        let mut memory = SnapshotMemory::new();
        for region in &self.regions {
            let bytes = hex::decode(&region.bytes).map_err(|source| ProfileError::RegionBytes {
                base: region.base,
                source,
            })?;
            memory.map(region.base, bytes)?;
        }
        log::debug!("Decoded {} snapshot regions", self.regions.len());
        Ok(memory)
    }
}

fn read_file(path: &Path) -> Result<String, ProfileError> {
    fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.display().to_string(),
        source,
    })
}
