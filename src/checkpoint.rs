//! Persistencia del estado de las sesiones entre pasos.
//!
//! Un `Checkpoint` por hilo (`thread_id`), sobrescrito tras cada paso.
//! Dos backends:
//!   - `MemoryCheckpointer`: efímero, muere con el proceso.
//!   - `FileCheckpointer`: un JSON por hilo, escrito de forma atómica
//!     (fichero temporal + rename).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ExplorerError, Result};
use crate::state::{AnswerRecord, SessionState, Step};

/// Foto de una sesión tras su último paso completado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Siguiente paso a ejecutar; `None` cuando la sesión ha terminado.
    pub next: Option<Step>,
    pub state: SessionState,
    /// Pasos ejecutados hasta ahora.
    pub steps: usize,
    /// Pasos visitados, en orden.
    pub visited: Vec<Step>,
    pub answer: Option<AnswerRecord>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_finished(&self) -> bool {
        self.next.is_none()
    }
}

pub trait Checkpointer: Send + Sync {
    /// `Ok(None)` si el hilo no tiene checkpoint.
    fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Crea o sustituye el checkpoint del hilo.
    fn put(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// No falla si el hilo no existe.
    fn delete(&self, thread_id: &str) -> Result<()>;

    /// Checkpoints más recientes primero, como mucho `limit`.
    fn list(&self, limit: usize) -> Result<Vec<Checkpoint>>;
}

impl<T: Checkpointer + ?Sized> Checkpointer for Arc<T> {
    fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        (**self).get(thread_id)
    }

    fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        (**self).put(checkpoint)
    }

    fn delete(&self, thread_id: &str) -> Result<()> {
        (**self).delete(thread_id)
    }

    fn list(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        (**self).list(limit)
    }
}

fn poisoned() -> ExplorerError {
    ExplorerError::Checkpoint("lock de checkpoints envenenado".to_string())
}

fn most_recent_first(mut checkpoints: Vec<Checkpoint>, limit: usize) -> Vec<Checkpoint> {
    checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    checkpoints.truncate(limit);
    checkpoints
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().map_err(|_| poisoned())?;
        Ok(checkpoints.get(thread_id).cloned())
    }

    fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| poisoned())?;
        checkpoints.insert(checkpoint.thread_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&self, thread_id: &str) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| poisoned())?;
        checkpoints.remove(thread_id);
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().map_err(|_| poisoned())?;
        Ok(most_recent_first(checkpoints.values().cloned().collect(), limit))
    }
}

/// Directorio por defecto: `<data dir>/graph_reader/checkpoints`.
pub fn default_checkpoint_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("graph_reader").join("checkpoints"))
}

#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    dir: PathBuf,
}

fn io_error(path: &Path, e: std::io::Error) -> ExplorerError {
    ExplorerError::Checkpoint(format!("{}: {e}", path.display()))
}

/// Nombre de fichero seguro para un thread id arbitrario.
fn file_stem(thread_id: &str) -> String {
    let safe = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        thread_id.to_string()
    } else {
        format!("{:x}", Sha256::digest(thread_id.as_bytes()))
    }
}

impl FileCheckpointer {
    /// Usa `dir`, creándolo si no existe.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(thread_id)))
    }

    fn read(path: &Path) -> Result<Checkpoint> {
        let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| ExplorerError::Checkpoint(format!("{}: {e}", path.display())))
    }
}

impl Checkpointer for FileCheckpointer {
    fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let stem = file_stem(&checkpoint.thread_id);
        let final_path = self.dir.join(format!("{stem}.json"));
        let temp_path = self.dir.join(format!(".{stem}.json.tmp"));

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| ExplorerError::Checkpoint(e.to_string()))?;
        {
            let mut file = fs::File::create(&temp_path).map_err(|e| io_error(&temp_path, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| io_error(&temp_path, e))?;
            file.sync_all().map_err(|e| io_error(&temp_path, e))?;
        }
        fs::rename(&temp_path, &final_path).map_err(|e| io_error(&final_path, e))?;
        debug!("Checkpoint '{}' guardado en {}", checkpoint.thread_id, final_path.display());
        Ok(())
    }

    fn delete(&self, thread_id: &str) -> Result<()> {
        let path = self.path(thread_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let mut checkpoints = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            let is_json = path.extension().is_some_and(|e| e == "json");
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if !is_json || hidden {
                continue;
            }
            checkpoints.push(Self::read(&path)?);
        }
        Ok(most_recent_first(checkpoints, limit))
    }
}
