use crate::chunk::{ChunkHash, FileDigest};
use std::collections::HashMap;
use std::path::PathBuf;

/// A complete file on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub file_hash: ChunkHash,
    pub chunk_hashes: Vec<ChunkHash>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, path: PathBuf, digest: FileDigest) -> Self {
        Self {
            name: name.into(),
            path,
            size: digest.size,
            file_hash: digest.file_hash,
            chunk_hashes: digest.chunk_hashes,
        }
    }
}

/// Files this node offers: those awaiting the tracker's verdict and those
/// the tracker accepted or that finished downloading.
#[derive(Debug, Default)]
pub(crate) struct Library {
    pending: HashMap<String, LocalFile>,
    published: HashMap<String, LocalFile>,
}

impl Library {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.pending.contains_key(name) || self.published.contains_key(name)
    }

    pub(crate) fn add_pending(&mut self, file: LocalFile) {
        self.pending.insert(file.name.clone(), file);
    }

    /// Moves a pending file to the published set once the tracker accepts it.
    pub(crate) fn confirm(&mut self, name: &str) -> bool {
        match self.pending.remove(name) {
            Some(file) => {
                self.published.insert(name.to_string(), file);
                true
            }
            None => false,
        }
    }

    pub(crate) fn reject(&mut self, name: &str) -> Option<LocalFile> {
        self.pending.remove(name)
    }

    pub(crate) fn publish(&mut self, file: LocalFile) {
        self.pending.remove(&file.name);
        self.published.insert(file.name.clone(), file);
    }

    pub(crate) fn unpublish(&mut self, name: &str) -> Option<LocalFile> {
        self.published.remove(name)
    }

    pub(crate) fn published(&self, name: &str) -> Option<&LocalFile> {
        self.published.get(name)
    }

    pub(crate) fn pending_names(&self) -> Vec<String> {
        sorted(self.pending.keys())
    }

    pub(crate) fn published_names(&self) -> Vec<String> {
        sorted(self.published.keys())
    }
}

fn sorted<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = names.cloned().collect();
    names.sort();
    names
}
