//! Content-addressed hash tree over a tool source directory.
//!
//! Leaves are whole files or, for tracked source files, the individual public
//! functions defined in them. Every node carries a SHA-256 hex digest:
//!
//! - **File**: digest of the raw bytes (read in chunks). Tracked source files
//!   fold that digest together with the sorted digests of their functions.
//! - **Function**: digest of the function's source span, normalized to LF line
//!   endings without trailing whitespace.
//! - **Directory**: digest of the sorted concatenation of its children's
//!   digests; an empty directory digests the empty input.
//!
//! Identities are `/`-separated paths relative to the scan root (the root
//! itself is `""`); functions are `path::name`.
//!
//! Per-file failures never abort a build: an unreadable file gets the empty
//! sentinel hash and a parse failure leaves the file without function
//! children. Both are logged.

pub mod extract;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::schema::Param;

pub use extract::{ExtractError, ExtractedFunction, FunctionExtractor, SourceLanguage};

/// Hash assigned to files that could not be read.
pub const UNREADABLE_HASH: &str = "";

/// Separator between a file identity and a function name.
pub const FUNCTION_SEPARATOR: &str = "::";

/// Kind of hash tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Directory,
    File,
    Function,
}

/// Metadata carried by function leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    pub line: u32,
}

/// One element of the hash tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashNode {
    pub identity: String,
    pub kind: NodeKind,
    pub hash: String,
    /// Directory entries, or the function leaves of a source file, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, HashNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionInfo>,
}

impl HashNode {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Walk a `/`-separated relative path down from this node.
    pub fn find(&self, identity: &str) -> Option<&HashNode> {
        if identity.is_empty() {
            return Some(self);
        }
        identity
            .split('/')
            .try_fold(self, |node, part| node.children.get(part))
    }

    /// All file leaves beneath (and including) this node, in name order.
    pub fn files(&self) -> Vec<&HashNode> {
        let mut out = Vec::new();
        collect_files(self, &mut out);
        out
    }

    /// Function leaves of a file node.
    pub fn functions(&self) -> impl Iterator<Item = &HashNode> {
        self.children
            .values()
            .filter(|c| c.kind == NodeKind::Function)
    }

    /// Put `node` at the `/`-separated path below this directory, or remove
    /// whatever is there when `node` is `None`. Directories on the way are
    /// created as needed and rehashed.
    pub fn replace(&mut self, identity: &str, node: Option<HashNode>) {
        let parts: Vec<&str> = identity.split('/').filter(|p| !p.is_empty()).collect();
        replace_at(self, &parts, node);
    }
}

fn replace_at(dir: &mut HashNode, parts: &[&str], node: Option<HashNode>) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    if dir.kind != NodeKind::Directory {
        return;
    }
    if rest.is_empty() {
        match node {
            Some(node) => {
                dir.children.insert(first.to_string(), node);
            }
            None => {
                dir.children.remove(*first);
            }
        }
    } else {
        if node.is_none() && !dir.children.contains_key(*first) {
            return;
        }
        let identity = join_identity(&dir.identity, first);
        let child = dir
            .children
            .entry(first.to_string())
            .or_insert_with(|| HashNode {
                identity,
                kind: NodeKind::Directory,
                hash: hash_sorted(std::iter::empty()),
                children: BTreeMap::new(),
                function: None,
            });
        replace_at(child, rest, node);
    }
    dir.hash = hash_sorted(dir.children.values().map(|c| c.hash.as_str()));
}

fn collect_files<'a>(node: &'a HashNode, out: &mut Vec<&'a HashNode>) {
    match node.kind {
        NodeKind::File => out.push(node),
        NodeKind::Directory => {
            for child in node.children.values() {
                collect_files(child, out);
            }
        }
        NodeKind::Function => {}
    }
}

/// What to traverse and which files to break down into functions.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Tracked source extension without the dot.
    pub extension: String,
    /// Directory names skipped in addition to hidden entries.
    pub ignore_dirs: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extension: "py".to_string(),
            ignore_dirs: vec!["__pycache__".to_string()],
        }
    }
}

impl ScanOptions {
    pub fn from_config(config: &aflow_config::ScanConfig) -> Self {
        Self {
            extension: config.extension.clone(),
            ignore_dirs: config.ignore_dirs.clone(),
        }
    }

    /// Whether an identity names a tracked source file.
    pub fn is_source(&self, identity: &str) -> bool {
        Path::new(identity)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == self.extension)
    }

    fn skips(&self, name: &str, is_dir: bool) -> bool {
        name.starts_with('.') || (is_dir && self.ignore_dirs.iter().any(|d| d == name))
    }
}

/// Serialized form of the persisted snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotState {
    root_dir: PathBuf,
    root: Option<HashNode>,
}

/// Owner of the current and previous snapshots of one directory.
pub struct HashTree {
    root: PathBuf,
    options: ScanOptions,
    current: Option<HashNode>,
    previous: Option<HashNode>,
}

impl HashTree {
    pub fn new(root: impl Into<PathBuf>, options: ScanOptions) -> Self {
        Self {
            root: root.into(),
            options,
            current: None,
            previous: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Rebuild the current snapshot from disk.
    pub fn build(&mut self) -> &HashNode {
        let node = build_tree(&self.root, &self.options);
        self.current.insert(node)
    }

    /// Install an externally built snapshot as current.
    pub fn set_current(&mut self, node: HashNode) {
        self.current = Some(node);
    }

    /// The most recently built snapshot, if any.
    pub fn snapshot(&self) -> Option<&HashNode> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&HashNode> {
        self.previous.as_ref()
    }

    /// The newest known state: current if built, otherwise previous.
    pub fn latest(&self) -> Option<&HashNode> {
        self.current.as_ref().or(self.previous.as_ref())
    }

    /// Move the current snapshot into the previous slot, replacing it.
    pub fn retain_as_previous(&mut self) {
        if let Some(current) = self.current.take() {
            self.previous = Some(current);
        }
    }

    /// Serialize the newest known state for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&SnapshotState {
            root_dir: self.root.clone(),
            root: self.latest().cloned(),
        })
    }

    /// Restore a persisted state into the previous slot.
    ///
    /// A state recorded for a different root directory is ignored so a
    /// relocated scan starts from scratch instead of diffing unrelated trees.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<bool, serde_json::Error> {
        let state: SnapshotState = serde_json::from_slice(bytes)?;
        if state.root_dir != self.root {
            warn!(
                recorded = %state.root_dir.display(),
                root = %self.root.display(),
                "Persisted snapshot belongs to another root, ignoring"
            );
            return Ok(false);
        }
        self.previous = state.root;
        Ok(self.previous.is_some())
    }

    /// Persist the newest known state to `path`.
    pub async fn save(&self, path: &Path) -> io::Result<()> {
        let bytes = self.to_bytes().map_err(io::Error::other)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }

    /// Load a persisted state from `path` if it exists.
    pub async fn load(&mut self, path: &Path) -> io::Result<bool> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        self.restore(&bytes).map_err(io::Error::other)
    }
}

/// Compute a full snapshot of `root`.
pub fn build_tree(root: &Path, options: &ScanOptions) -> HashNode {
    let mut extractor = SourceLanguage::from_extension(&options.extension).and_then(|lang| {
        FunctionExtractor::new(lang)
            .map_err(|e| warn!(language = %lang, error = %e, "Grammar unavailable, hashing sources as plain files"))
            .ok()
    });
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return build_file(root, &name, options, extractor.as_mut());
    }
    build_dir(root, "", options, extractor.as_mut())
}

fn join_identity(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn build_dir(
    path: &Path,
    identity: &str,
    options: &ScanOptions,
    mut extractor: Option<&mut FunctionExtractor>,
) -> HashNode {
    let mut children = BTreeMap::new();

    match std::fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                // Symlinks are not followed; the tree stays acyclic.
                if file_type.is_symlink() || options.skips(&name, file_type.is_dir()) {
                    continue;
                }
                let child_identity = join_identity(identity, &name);
                let child = if file_type.is_dir() {
                    build_dir(&entry.path(), &child_identity, options, extractor.as_deref_mut())
                } else {
                    build_file(&entry.path(), &child_identity, options, extractor.as_deref_mut())
                };
                children.insert(name, child);
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to read directory"),
    }

    let hash = hash_sorted(children.values().map(|c| c.hash.as_str()));
    debug!(identity, %hash, "Directory hashed");
    HashNode {
        identity: identity.to_string(),
        kind: NodeKind::Directory,
        hash,
        children,
        function: None,
    }
}

fn build_file(
    path: &Path,
    identity: &str,
    options: &ScanOptions,
    extractor: Option<&mut FunctionExtractor>,
) -> HashNode {
    let raw = match hash_file(path) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to hash file");
            UNREADABLE_HASH.to_string()
        }
    };

    let mut node = HashNode {
        identity: identity.to_string(),
        kind: NodeKind::File,
        hash: raw.clone(),
        children: BTreeMap::new(),
        function: None,
    };

    if raw == UNREADABLE_HASH || !options.is_source(identity) {
        return node;
    }

    let Some(extractor) = extractor else {
        return node;
    };
    node.children = function_nodes(path, identity, extractor);

    let mut parts: Vec<&str> = node.children.values().map(|f| f.hash.as_str()).collect();
    parts.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    for part in parts {
        hasher.update(part.as_bytes());
    }
    node.hash = format!("{:x}", hasher.finalize());
    debug!(identity, functions = node.children.len(), hash = %node.hash, "Source file hashed");
    node
}

fn function_nodes(
    path: &Path,
    identity: &str,
    extractor: &mut FunctionExtractor,
) -> BTreeMap<String, HashNode> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Source file is not readable as text");
            return BTreeMap::new();
        }
    };
    let functions = match extractor.extract(&source) {
        Ok(functions) => functions,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse source file");
            return BTreeMap::new();
        }
    };

    functions
        .into_iter()
        .map(|f| {
            let node = HashNode {
                identity: format!("{identity}{FUNCTION_SEPARATOR}{}", f.name),
                kind: NodeKind::Function,
                hash: hash_bytes(normalize_source(&f.source).as_bytes()),
                children: BTreeMap::new(),
                function: Some(FunctionInfo {
                    display_name: f.name.clone(),
                    doc: f.doc,
                    params: f.params,
                    line: f.line,
                }),
            };
            (f.name, node)
        })
        .collect()
}

/// Normalize a source span so line-ending and trailing-space churn does not
/// count as a function change.
pub fn normalize_source(source: &str) -> String {
    source
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 of a file's bytes, read in 4 KiB chunks.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Digest of the sorted concatenation of `hashes`.
pub fn hash_sorted<'a>(hashes: impl Iterator<Item = &'a str>) -> String {
    let mut hashes: Vec<&str> = hashes.collect();
    hashes.sort_unstable();
    hash_bytes(hashes.concat().as_bytes())
}
