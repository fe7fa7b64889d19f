//! Durable storage of the graph document.
//!
//! The whole graph is one JSON file. Saves go to a temp file in the same
//! directory which is synced and then renamed over the canonical path, so a
//! reader sees either the old document or the new one, never a torn write.
//! Writers from any process serialize on an advisory lock held on a sibling
//! `<file>.lock`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{KgmemError, Result};
use crate::graph::KnowledgeGraph;

/// Graph document on disk
#[derive(Debug, Clone)]
pub struct GraphFile {
    path: PathBuf,
    pretty: bool,
}

/// Exclusive advisory lock on the document. Released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: fs::File,
    path: PathBuf,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // closing the descriptor releases the lock too; unlock explicitly
            // so the release does not wait on the File drop order
            unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
        log::debug!("Released document lock {}", self.path.display());
    }
}

impl GraphFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pretty: true,
        }
    }

    /// Pretty-print the document on save (default on).
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling lock file shared by every writer of this document.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.file_name();
        name.push_str(".lock");
        self.dir().join(name)
    }

    /// `<file>.<uuid>.tmp` next to the document, unique per save.
    fn temp_path(&self) -> PathBuf {
        self.dir()
            .join(format!("{}.{}.tmp", self.file_name(), Uuid::new_v4()))
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "graph".to_string())
    }

    /// Block until this handle holds the exclusive writer lock.
    ///
    /// The wait is bounded by the other writer's single load/mutate/save
    /// cycle. On non-Unix targets only the in-process lock applies.
    pub fn lock_exclusive(&self) -> Result<DocumentLock> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| KgmemError::storage(&dir, e))?;

        let lock_path = self.lock_path();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| KgmemError::storage(&lock_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if result != 0 {
                return Err(KgmemError::storage(&lock_path, std::io::Error::last_os_error()));
            }
        }

        log::debug!("Acquired document lock {}", lock_path.display());
        Ok(DocumentLock {
            file,
            path: lock_path,
        })
    }

    /// Read the document. A missing or empty file is an empty graph.
    pub fn load(&self) -> Result<KnowledgeGraph> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No graph document at {}, starting empty", self.path.display());
                return Ok(KnowledgeGraph::default());
            }
            Err(e) => return Err(KgmemError::storage(&self.path, e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(KnowledgeGraph::default());
        }

        let graph: KnowledgeGraph = serde_json::from_slice(&bytes).map_err(|e| {
            let reason = format!("corrupt graph document: {}", e);
            KgmemError::storage(&self.path, std::io::Error::new(ErrorKind::InvalidData, reason))
        })?;

        log::info!(
            "Knowledge graph loaded from {} ({} entities, {} relations)",
            self.path.display(),
            graph.entities.len(),
            graph.relations.len()
        );
        Ok(graph)
    }

    /// Write the full document atomically (temp file + rename + dir sync).
    pub fn save(&self, graph: &KnowledgeGraph) -> Result<()> {
        let body = if self.pretty {
            serde_json::to_vec_pretty(graph)
        } else {
            serde_json::to_vec(graph)
        }
        .map_err(|e| {
            KgmemError::storage(&self.path, std::io::Error::new(ErrorKind::InvalidData, e))
        })?;

        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| KgmemError::storage(&dir, e))?;

        let tmp_path = self.temp_path();

        if let Err(e) = write_synced(&tmp_path, &body) {
            let _ = fs::remove_file(&tmp_path);
            return Err(KgmemError::storage(&tmp_path, e));
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(KgmemError::storage(&self.path, e));
        }
        sync_dir(&dir).map_err(|e| KgmemError::storage(&dir, e))?;

        log::info!(
            "Knowledge graph saved to {} ({} entities, {} relations)",
            self.path.display(),
            graph.entities.len(),
            graph.relations.len()
        );
        Ok(())
    }
}

fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(body)?;
    file.sync_all()
}

/// Persist the rename itself.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
