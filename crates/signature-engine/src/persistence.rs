//! Annotation persistence
//!
//! The engine saves the full snapshot of a document after every mutation and
//! reloads it when the document is opened again. Storage is injected through
//! [`AnnotationPersistence`]; writes from the interaction path go through a
//! [`PersistenceWriter`] so they never block and are applied in order.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Result, SigningError};
use crate::store::AnnotationSnapshot;

/// Storage key for a document's snapshot
pub fn storage_key(document_id: &str) -> String {
    format!("signatures_{}", document_id)
}

/// Keyed storage of serialized snapshots. Implementations may block.
pub trait AnnotationPersistence: Send + Sync {
    /// Raw stored record, `None` when nothing has been saved
    fn load(&self, document_id: &str) -> Result<Option<String>>;

    fn save(&self, document_id: &str, record: &str) -> Result<()>;

    /// Removing a missing record is not an error
    fn remove(&self, document_id: &str) -> Result<()>;
}

/// Load and decode the snapshot for `document_id`
pub fn load_snapshot(
    persistence: &dyn AnnotationPersistence,
    document_id: &str,
) -> Result<Option<AnnotationSnapshot>> {
    persistence
        .load(document_id)?
        .map(|json| AnnotationSnapshot::from_json(document_id, &json))
        .transpose()
}

/// In-process storage, the equivalent of the browser's local storage
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SigningError::Persistence("storage lock poisoned".to_string()))
    }
}

impl AnnotationPersistence for MemoryPersistence {
    fn load(&self, document_id: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(&storage_key(document_id)).cloned())
    }

    fn save(&self, document_id: &str, record: &str) -> Result<()> {
        self.entries()?
            .insert(storage_key(document_id), record.to_string());
        Ok(())
    }

    fn remove(&self, document_id: &str) -> Result<()> {
        self.entries()?.remove(&storage_key(document_id));
        Ok(())
    }
}

/// One JSON file per document inside a directory
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    /// Creates the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            SigningError::Persistence(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, document_id: &str) -> PathBuf {
        let mut name = String::with_capacity(document_id.len() + 16);
        for c in storage_key(document_id).chars() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                name.push(c);
            } else {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    name.push_str(&format!("%{:02X}", byte));
                }
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl AnnotationPersistence for JsonFilePersistence {
    fn load(&self, document_id: &str) -> Result<Option<String>> {
        let path = self.path_for(document_id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SigningError::Persistence(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn save(&self, document_id: &str, record: &str) -> Result<()> {
        let path = self.path_for(document_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, record)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                SigningError::Persistence(format!("Failed to write {}: {}", path.display(), e))
            })
    }

    fn remove(&self, document_id: &str) -> Result<()> {
        let path = self.path_for(document_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SigningError::Persistence(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[derive(Debug)]
enum WriteCommand {
    Save { document_id: String, record: String },
    Remove { document_id: String },
    Flush(oneshot::Sender<()>),
}

/// Serialized background writer.
///
/// Commands are applied one at a time in submission order, so the last
/// snapshot enqueued for a document is the one left in storage.
#[derive(Debug, Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl PersistenceWriter {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(persistence: Arc<dyn AnnotationPersistence>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(persistence, rx));
        Self { tx }
    }

    /// Enqueue the snapshot; serialization happens on the caller's thread
    pub fn save(&self, snapshot: &AnnotationSnapshot) -> Result<()> {
        let record = snapshot.to_json()?;
        self.send(WriteCommand::Save {
            document_id: snapshot.document_id.clone(),
            record,
        })
    }

    pub fn remove(&self, document_id: &str) -> Result<()> {
        self.send(WriteCommand::Remove {
            document_id: document_id.to_string(),
        })
    }

    /// Wait until every command enqueued before this call has been applied
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(WriteCommand::Flush(done_tx))?;
        done_rx
            .await
            .map_err(|_| SigningError::Persistence("writer stopped".to_string()))
    }

    fn send(&self, command: WriteCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| SigningError::Persistence("writer stopped".to_string()))
    }
}

async fn run_writer(
    persistence: Arc<dyn AnnotationPersistence>,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Save {
                document_id,
                record,
            } => {
                let storage = Arc::clone(&persistence);
                let doc = document_id.clone();
                let result =
                    tokio::task::spawn_blocking(move || storage.save(&doc, &record)).await;
                report(&document_id, "save", result);
            }
            WriteCommand::Remove { document_id } => {
                let storage = Arc::clone(&persistence);
                let doc = document_id.clone();
                let result = tokio::task::spawn_blocking(move || storage.remove(&doc)).await;
                report(&document_id, "remove", result);
            }
            WriteCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("persistence writer stopped");
}

fn report(
    document_id: &str,
    action: &str,
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => debug!(document_id, action, "persisted annotations"),
        Ok(Err(e)) => warn!(document_id, action, "Failed to persist annotations: {}", e),
        Err(e) => warn!(document_id, action, "Persistence task failed: {}", e),
    }
}
