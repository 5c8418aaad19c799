// Embedded semantic index and its on-disk store: a filesystem of
// JSON/binary artifacts under `.code-indexer/index/`, so the ANN structure
// lives in-process instead of behind a server. `hnsw_rs` provides the ANN
// graph, backed by a `bincode`-serialized id map, consistent with the rest
// of this crate's preference for embedded stores over spawned server
// processes (see also `storage::sql`, which does the same for the
// commit/blob metadata).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hnsw_rs::dist::DistCosine;
use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::hnswio::{HnswIo, ReloadOptions};
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

const HNSW_BASENAME: &str = "semantic";
const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

/// Payload carried alongside each vector, mirroring the point payload the
/// design requires (`blob_hash`, `file_path`, `commit_hash`,
/// `chunk_index`). This is what makes a point attributable back to a blob
/// for deduplication and to a file/commit for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointMeta {
    pub blob_hash: String,
    pub file_path: String,
    pub commit_hash: String,
    pub chunk_index: u32,
}

pub type PointId = usize;
pub type IdMap = HashMap<PointId, PointMeta>;

/// Wraps the HNSW graph together with the owned vector storage it borrows
/// into. `arena` must be declared before `hnsw` so it outlives it on drop;
/// nothing outside this module ever observes the `'static` lifetime
/// `hnsw`'s entries are actually tied to `arena`.
pub struct SemanticIndex {
    arena: Vec<Box<[f32]>>,
    hnsw: Hnsw<'static, f32, DistCosine>,
    dim: usize,
}

impl SemanticIndex {
    pub fn new(dim: usize, expected_points: usize) -> Self {
        Self {
            arena: Vec::with_capacity(expected_points),
            hnsw: Hnsw::new(MAX_NB_CONNECTION, expected_points.max(16), MAX_LAYER, EF_CONSTRUCTION, DistCosine {}),
            dim,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn insert(&mut self, point_id: PointId, vector: Vec<f32>) -> Result<(), DaemonError> {
        if vector.len() != self.dim {
            return Err(DaemonError::StorageError(format!(
                "vector dim {} does not match index dim {}",
                vector.len(),
                self.dim
            )));
        }
        let boxed: Box<[f32]> = vector.into_boxed_slice();
        // SAFETY: `boxed` is moved into `self.arena` right after this call
        // and never reallocated in place; the reference handed to `hnsw`
        // stays valid for as long as `self` (and therefore `self.arena`)
        // is alive.
        let extended: &'static [f32] = unsafe { std::mem::transmute(&*boxed) };
        self.arena.push(boxed);
        self.hnsw.insert((extended, point_id));
        Ok(())
    }

    pub fn search(&self, query: &[f32], limit: usize) -> Vec<(PointId, f32)> {
        self.hnsw
            .search(query, limit, EF_SEARCH)
            .into_iter()
            .map(|neighbour| (neighbour.d_id, neighbour.distance))
            .collect()
    }

    fn dump_dir(dir: &Path) -> PathBuf {
        dir.join("semantic")
    }

    pub fn persist(&self, dir: &Path) -> Result<(), DaemonError> {
        let target = Self::dump_dir(dir);
        std::fs::create_dir_all(&target)
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        self.hnsw
            .file_dump(&target, HNSW_BASENAME)
            .map_err(|e| DaemonError::StorageError(e))?;

        // The arena holds exactly the vectors the graph was built from, in
        // point-id order; persisting it lets a fresh process rebuild
        // `arena` without re-embedding anything.
        let vectors_path = target.join("vectors.bin");
        let encoded = bincode::serialize(&self.arena.iter().map(|b| b.to_vec()).collect::<Vec<_>>())
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        std::fs::write(vectors_path, encoded).map_err(|e| DaemonError::StorageError(e.to_string()))?;

        Ok(())
    }

    pub fn load(dir: &Path, dim: usize) -> Result<Option<Self>, DaemonError> {
        let target = Self::dump_dir(dir);
        if !target.join(format!("{HNSW_BASENAME}.hnsw.graph")).exists() {
            return Ok(None);
        }

        let vectors_path = target.join("vectors.bin");
        let raw = std::fs::read(&vectors_path).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        let vectors: Vec<Vec<f32>> =
            bincode::deserialize(&raw).map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let mut reload = HnswIo::new(&target, HNSW_BASENAME);
        let hnsw: Hnsw<f32, DistCosine> = reload
            .load_hnsw_with_dist(ReloadOptions::default(), DistCosine {})
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        // `hnsw` as reloaded above borrows nothing external (the reload
        // path reconstructs its own point storage), so re-tagging its
        // lifetime as `'static` here is sound: there is no external arena
        // reference to outlive.
        let hnsw: Hnsw<'static, f32, DistCosine> = unsafe { std::mem::transmute(hnsw) };

        Ok(Some(Self {
            arena: vectors.into_iter().map(Vec::into_boxed_slice).collect(),
            hnsw,
            dim,
        }))
    }
}

/// Facade over the semantic slot's on-disk artifacts, matching the
/// contract the design assigns to the external Index Store: `load`,
/// `upsert`, `clean`, `clean_data`.
pub struct IndexStore {
    index_dir: PathBuf,
    dim: usize,
}

pub enum CleanScope {
    /// Drops points but keeps the Blob Registry / Commit Store metadata.
    IndexOnly,
    /// Drops everything this daemon persists for the repository.
    AllData,
}

impl IndexStore {
    pub fn new(index_dir: PathBuf, dim: usize) -> Self {
        Self { index_dir, dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn id_map_path(&self) -> PathBuf {
        self.index_dir.join("semantic").join("id_map.bin")
    }

    pub fn load(&self) -> Result<Option<(SemanticIndex, IdMap)>, DaemonError> {
        let Some(index) = SemanticIndex::load(&self.index_dir, self.dim)? else {
            return Ok(None);
        };
        let id_map = if self.id_map_path().exists() {
            let raw = std::fs::read(self.id_map_path()).map_err(|e| DaemonError::StorageError(e.to_string()))?;
            bincode::deserialize(&raw).map_err(|e| DaemonError::StorageError(e.to_string()))?
        } else {
            IdMap::new()
        };
        Ok(Some((index, id_map)))
    }

    pub fn upsert(&self, index: &mut SemanticIndex, id_map: &mut IdMap, points: Vec<(Vec<f32>, PointMeta)>) -> Result<(), DaemonError> {
        for (vector, meta) in points {
            let point_id = index.len();
            index.insert(point_id, vector)?;
            id_map.insert(point_id, meta);
        }
        self.flush(index, id_map)
    }

    pub fn flush(&self, index: &SemanticIndex, id_map: &IdMap) -> Result<(), DaemonError> {
        index.persist(&self.index_dir)?;
        std::fs::create_dir_all(self.id_map_path().parent().unwrap())
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        let encoded = bincode::serialize(id_map).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        std::fs::write(self.id_map_path(), encoded).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn clean(&self, scope: CleanScope) -> Result<(), DaemonError> {
        let target = match scope {
            CleanScope::IndexOnly => self.index_dir.join("semantic"),
            CleanScope::AllData => self.index_dir.clone(),
        };
        if target.exists() {
            std::fs::remove_dir_all(&target).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_mismatched_dimension() {
        let mut index = SemanticIndex::new(4, 16);
        let err = index.insert(0, vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, DaemonError::StorageError(_)));
    }

    #[test]
    fn search_returns_inserted_points() {
        let mut index = SemanticIndex::new(3, 16);
        index.insert(0, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(1, vec![0.0, 1.0, 0.0]).unwrap();
        let results = index.search(&[1.0, 0.0, 0.0], 1);
        assert_eq!(results[0].0, 0);
    }
}
