use crate::config::CrawlMode;
use crate::state::tree::CategoryTree;
use crate::state::{StateError, StateResult};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// JSON field holding the completed unit keys
///
/// Link-mode and partition-mode state files have the same shape but a
/// different name for the completed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedField {
    Completed,
    ProcessedProducts,
}

impl CompletedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletedField::Completed => "completed",
            CompletedField::ProcessedProducts => "processed_products",
        }
    }
}

impl From<CrawlMode> for CompletedField {
    fn from(mode: CrawlMode) -> Self {
        match mode {
            CrawlMode::Link => CompletedField::Completed,
            CrawlMode::Partition => CompletedField::ProcessedProducts,
        }
    }
}

/// In-memory crawl state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlState {
    pub completed: BTreeSet<String>,
    pub tree: CategoryTree,
}

impl CrawlState {
    /// Folds another state into this one: set union plus tree merge
    fn absorb(&mut self, other: CrawlState) {
        self.completed.extend(other.completed);
        self.tree.merge_from(other.tree);
    }
}

/// Short description of a state file for `--stats`
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub completed: usize,
    pub tree_nodes: usize,
    pub top_labels: Vec<String>,
}

/// Durable, merge-on-save crawl state shared by all workers
///
/// Mutations only touch memory. [`StateStore::save`] re-reads the file,
/// merges whatever other writers persisted since, and replaces the file via
/// a temporary path and rename. Saves are serialized by their own lock so
/// workers keep marking units while another worker is writing.
pub struct StateStore {
    path: PathBuf,
    field: CompletedField,
    state: Mutex<CrawlState>,
    save_lock: Mutex<()>,
}

impl StateStore {
    /// Opens the state file, loading existing progress if present
    ///
    /// # Arguments
    ///
    /// * `path` - Canonical state file location
    /// * `field` - Name of the completed-units field in the JSON document
    ///
    /// # Returns
    ///
    /// * `Ok(StateStore)` - Store primed with the on-disk state (empty if the file is missing)
    /// * `Err(StateError)` - The file exists but cannot be read or parsed
    pub fn open(path: impl Into<PathBuf>, field: CompletedField) -> StateResult<Self> {
        let path = path.into();
        let state = read_state(&path, field)?;

        info!(
            "Loaded crawl state from {} ({} completed units)",
            path.display(),
            state.completed.len()
        );

        Ok(Self {
            path,
            field,
            state: Mutex::new(state),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the unit key has been marked complete
    pub fn is_completed(&self, key: &str) -> bool {
        self.state.lock().completed.contains(key)
    }

    /// Marks a unit complete and records its breadcrumb in the tree
    ///
    /// Memory only; callers decide when to [`save`](Self::save).
    pub fn mark_unit(&self, key: &str, ancestors: &[String]) {
        let mut state = self.state.lock();
        state.completed.insert(key.to_string());
        if !ancestors.is_empty() {
            state.tree.insert_path(ancestors);
        }
    }

    /// Records a breadcrumb path without completing any unit
    pub fn record_path(&self, labels: &[String]) {
        self.state.lock().tree.insert_path(labels);
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().completed.len()
    }

    /// Copy of the current in-memory state
    pub fn snapshot(&self) -> CrawlState {
        self.state.lock().clone()
    }

    pub fn summary(&self) -> StateSummary {
        let state = self.state.lock();
        StateSummary {
            completed: state.completed.len(),
            tree_nodes: state.tree.node_count(),
            top_labels: state.tree.top_labels(),
        }
    }

    /// Merges the on-disk state into memory and atomically rewrites the file
    ///
    /// # Steps
    ///
    /// 1. Read the current file (missing file counts as empty state)
    /// 2. Union completed sets and merge trees, the file winning on conflict
    /// 3. Write the merged document to a fresh temporary file beside it
    /// 4. Rename it over the canonical path
    pub fn save(&self) -> StateResult<()> {
        let _guard = self.save_lock.lock();

        let on_disk = read_state(&self.path, self.field)?;

        let bytes = {
            let mut state = self.state.lock();
            state.absorb(on_disk);
            encode_state(&state, self.field)?
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Saved crawl state to {}", self.path.display());
        Ok(())
    }

    /// Deletes the state file if it exists
    pub fn remove_file(path: &Path) -> StateResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_state(path: &Path, field: CompletedField) -> StateResult<CrawlState> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CrawlState::default()),
        Err(e) => return Err(e.into()),
    };

    decode_state(&bytes, field).map_err(|reason| StateError::Corrupt {
        path: path.to_path_buf(),
        reason,
    })
}

fn decode_state(bytes: &[u8], field: CompletedField) -> Result<CrawlState, String> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let Value::Object(mut root) = value else {
        return Err("top level is not a JSON object".to_string());
    };

    let completed = match root.remove(field.as_str()) {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(v) => serde_json::from_value::<BTreeSet<String>>(v)
            .map_err(|e| format!("'{}': {}", field.as_str(), e))?,
    };

    let tree = match root.remove("tree") {
        None | Some(Value::Null) => CategoryTree::new(),
        Some(v) => serde_json::from_value::<CategoryTree>(v).map_err(|e| format!("'tree': {}", e))?,
    };

    Ok(CrawlState { completed, tree })
}

fn encode_state(state: &CrawlState, field: CompletedField) -> StateResult<Vec<u8>> {
    let mut root = Map::new();
    root.insert(field.as_str().to_string(), serde_json::to_value(&state.completed)?);
    root.insert("tree".to_string(), serde_json::to_value(&state.tree)?);

    let mut bytes = serde_json::to_vec_pretty(&Value::Object(root))?;
    bytes.push(b'\n');
    Ok(bytes)
}
