//! Archive access seam: where CAR files come from.
//!
//! Workers only see `CarSourceLike`, so the pipeline runs identically over a
//! real directory of CAR files or an in-memory fake.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::car::{CarBlock, CarBlockReader};
use crate::error::CarlinkError;

pub type BlockIter = Box<dyn Iterator<Item = Result<CarBlock, CarlinkError>>>;

pub trait CarSourceLike: Send + Sync {
    /// Opens one archive by its storage path. `Ok(None)` means the file does
    /// not exist, which callers treat as an empty archive; any other failure
    /// is an error.
    fn open(&self, storage_path: &str) -> Result<Option<BlockIter>, CarlinkError>;
}

/// CAR files on disk, addressed relative to one storage directory.
pub struct DirectoryCarSource {
    dir: PathBuf,
}

impl DirectoryCarSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CarSourceLike for DirectoryCarSource {
    fn open(&self, storage_path: &str) -> Result<Option<BlockIter>, CarlinkError> {
        let path = self.dir.join(storage_path);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let reader = CarBlockReader::new(file)?;
        Ok(Some(Box::new(reader)))
    }
}

/// In-memory fake for tests: ready-made block lists keyed by storage path.
/// Paths registered as failing yield their blocks and then a read error,
/// simulating a CAR that goes bad partway through.
pub struct InMemoryCarSource {
    cars: HashMap<String, Vec<CarBlock>>,
    failing: HashSet<String>,
}

impl InMemoryCarSource {
    pub fn new() -> Self {
        Self {
            cars: HashMap::new(),
            failing: HashSet::new(),
        }
    }

    pub fn with_car(mut self, storage_path: &str, blocks: Vec<CarBlock>) -> Self {
        self.cars.insert(storage_path.to_string(), blocks);
        self
    }

    pub fn with_failing_car(mut self, storage_path: &str, blocks: Vec<CarBlock>) -> Self {
        self.cars.insert(storage_path.to_string(), blocks);
        self.failing.insert(storage_path.to_string());
        self
    }
}

impl Default for InMemoryCarSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CarSourceLike for InMemoryCarSource {
    fn open(&self, storage_path: &str) -> Result<Option<BlockIter>, CarlinkError> {
        let Some(blocks) = self.cars.get(storage_path) else {
            return Ok(None);
        };
        let items: Vec<Result<CarBlock, CarlinkError>> =
            blocks.iter().cloned().map(Ok).collect();
        if self.failing.contains(storage_path) {
            let path = storage_path.to_string();
            Ok(Some(Box::new(items.into_iter().chain(std::iter::once(
                Err(CarlinkError::Car(format!("simulated read failure in {}", path))),
            )))))
        } else {
            Ok(Some(Box::new(items.into_iter())))
        }
    }
}
