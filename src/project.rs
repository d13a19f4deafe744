use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::LayerStack;
use crate::error::{LayerError, Result};
use crate::io::{self, ensure_layer_images, export_layer_images, layer_filename};

const META_FILE: &str = "project.json";
const SNAPSHOT_FILE: &str = "layers.bin";
const LAYERS_DIR: &str = "layers";
const LOCK_FILE: &str = ".lock";

// ============================================================================
// METADATA
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LayerEntry {
    pub name: String,
    pub visible: bool,
    pub filename: String,
}

/// Read-only JSON view of a stack.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StackSummary {
    /// `None` only for an empty stack.
    pub selected_layer: Option<usize>,
    pub height: u32,
    pub width: u32,
    pub layers: Vec<LayerEntry>,
}

impl StackSummary {
    pub fn from_stack(stack: &LayerStack) -> Self {
        Self {
            selected_layer: stack.active_index(),
            height: stack.height(),
            width: stack.width(),
            layers: stack
                .layers()
                .enumerate()
                .map(|(i, layer)| LayerEntry {
                    name: layer.name().to_string(),
                    visible: layer.is_visible(),
                    filename: layer_filename(i),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Contents of `project.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProjectMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
}

/// An opened project: metadata, its directory and the live layer stack.
#[derive(Debug)]
pub struct Project {
    pub meta: ProjectMeta,
    pub dir: PathBuf,
    pub stack: LayerStack,
}

impl Project {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn layers_dir(&self) -> PathBuf {
        self.dir.join(LAYERS_DIR)
    }

    pub fn summary(&self) -> StackSummary {
        StackSummary::from_stack(&self.stack)
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Directory-per-project storage:
///
/// ```text
/// <root>/<pid>/project.json
/// <root>/<pid>/layers.bin
/// <root>/<pid>/layers/Layer<i>.png
/// <root>/<pid>/.lock
/// ```
///
/// Reads and load-mutate-save cycles on a project hold an in-process mutex
/// for that id plus an OS lock on its `.lock` file, so separate processes
/// sharing a root are serialised too.
pub struct ProjectStore {
    root: PathBuf,
    max_import_bytes: u64,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_import_bytes: u64::MAX,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Refuse image imports larger than `bytes`.
    pub fn with_max_import_bytes(mut self, bytes: u64) -> Self {
        self.max_import_bytes = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// New project with a white background and one empty working layer.
    pub fn create(&self, name: &str, width: u32, height: u32) -> Result<Project> {
        if width == 0 || height == 0 {
            return Err(LayerError::invalid_input("canvas dimensions cannot be zero"));
        }
        self.persist_new(name, LayerStack::with_base_layers(width, height))
    }

    /// New project sized to the image: background plus a layer holding it.
    /// `name` defaults to the file stem.
    pub fn import_image(&self, path: &Path, name: Option<&str>) -> Result<Project> {
        let size = fs::metadata(path)?.len();
        if size > self.max_import_bytes {
            return Err(LayerError::invalid_input(format!(
                "{} is {} bytes, the import limit is {}",
                path.display(),
                size,
                self.max_import_bytes
            )));
        }
        let image = io::read_image(path)?;
        let (w, h) = image.dimensions();
        let mut stack = LayerStack::with_base_layers(w, h);
        stack.replace_active_buffer(image)?;
        let name = name.map(str::to_string).unwrap_or_else(|| file_stem_or(path, "uploaded_image"));
        self.persist_new(&name, stack)
    }

    /// New project from a snapshot file written by [`io::write_snapshot`].
    pub fn import_snapshot(&self, path: &Path, name: Option<&str>) -> Result<Project> {
        let stack = io::read_snapshot(path)?;
        let name = name.map(str::to_string).unwrap_or_else(|| file_stem_or(path, "uploaded"));
        self.persist_new(&name, stack)
    }

    /// Load a project under its lock, regenerating any layer images missing
    /// from disk.
    pub fn open(&self, pid: &str) -> Result<Project> {
        self.exclusive(pid, |dir| self.load(pid, dir))
    }

    /// Write snapshot, layer images and metadata. Layer entries in the
    /// metadata are refreshed from the stack.
    pub fn save(&self, project: &mut Project) -> Result<()> {
        fs::create_dir_all(&project.dir)?;

        let tmp = project.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        io::write_snapshot(&project.stack, &tmp)?;
        fs::rename(&tmp, project.dir.join(SNAPSHOT_FILE))?;

        let layers_dir = project.layers_dir();
        remove_stale_images(&layers_dir, project.stack.len())?;
        export_layer_images(&project.stack, &layers_dir)?;

        project.meta.layers = project.summary().layers;
        write_meta(&project.dir, &project.meta)?;
        log::debug!("saved project {} ({} layers)", project.meta.id, project.stack.len());
        Ok(())
    }

    pub fn rename(&self, pid: &str, name: &str) -> Result<ProjectMeta> {
        let meta = self.exclusive(pid, |dir| {
            let mut meta = read_meta(dir)?;
            meta.name = name.to_string();
            write_meta(dir, &meta)?;
            Ok(meta)
        })?;
        log::info!("renamed project {} to '{}'", pid, name);
        Ok(meta)
    }

    /// Copy a project under a fresh id.
    pub fn duplicate(&self, pid: &str, name: &str) -> Result<Project> {
        let source = self.open(pid)?;
        let copy = self.persist_new(name, source.stack)?;
        log::info!("duplicated project {} as {}", pid, copy.meta.id);
        Ok(copy)
    }

    /// Metadata of every project under the root, sorted by id. Directories
    /// without a readable `project.json` are skipped.
    pub fn list(&self) -> Result<Vec<ProjectMeta>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILE);
            let parsed = fs::read_to_string(&meta_path)
                .map_err(LayerError::from)
                .and_then(|s| serde_json::from_str::<ProjectMeta>(&s).map_err(LayerError::from));
            match parsed {
                Ok(meta) => out.push(meta),
                Err(e) => log::warn!("skipping {}: {}", entry.path().display(), e),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Load, mutate and save `pid` while holding its exclusive lock. Nothing
    /// is written when `f` fails.
    pub fn with_project<T>(&self, pid: &str, f: impl FnOnce(&mut Project) -> Result<T>) -> Result<T> {
        self.exclusive(pid, |dir| {
            let mut project = self.load(pid, dir)?;
            let out = f(&mut project)?;
            self.save(&mut project)?;
            Ok(out)
        })
    }

    /// Run `f` on the project directory holding both the in-process and the
    /// on-disk lock for `pid`.
    fn exclusive<T>(&self, pid: &str, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let dir = self.project_dir(pid)?;
        if !dir.join(META_FILE).is_file() {
            return Err(LayerError::ProjectNotFound { path: dir });
        }
        let lock = self.lock_for(pid);
        let out = hold_locks(&lock, &dir, f);
        drop(lock);
        self.release_lock(pid);
        out
    }

    fn lock_for(&self, pid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(pid.to_string()).or_default().clone()
    }

    /// Forget the mutex for `pid` once no caller holds or waits on it.
    fn release_lock(&self, pid: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(pid).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(pid);
        }
    }

    /// Read metadata and snapshot. Callers hold the project's locks.
    fn load(&self, pid: &str, dir: &Path) -> Result<Project> {
        let mut meta = read_meta(dir)?;
        if meta.id != pid {
            log::warn!("project.json in {} claims id '{}', using '{}'", dir.display(), meta.id, pid);
            meta.id = pid.to_string();
        }
        let stack = io::read_snapshot(&dir.join(SNAPSHOT_FILE))?;
        if let Err(e) = ensure_layer_images(&stack, &dir.join(LAYERS_DIR)) {
            log::warn!("could not regenerate layer images for {}: {}", pid, e);
        }
        Ok(Project { meta, dir: dir.to_path_buf(), stack })
    }

    fn project_dir(&self, pid: &str) -> Result<PathBuf> {
        let valid = !pid.is_empty()
            && pid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(LayerError::invalid_input(format!("'{}' is not a project id", pid)));
        }
        Ok(self.root.join(pid))
    }

    fn persist_new(&self, name: &str, stack: LayerStack) -> Result<Project> {
        fs::create_dir_all(&self.root)?;
        let pid = loop {
            let candidate = new_pid();
            if !self.root.join(&candidate).exists() {
                break candidate;
            }
        };
        let dir = self.root.join(&pid);
        fs::create_dir_all(dir.join(LAYERS_DIR))?;
        let mut project = Project {
            meta: ProjectMeta {
                id: pid,
                name: name.to_string(),
                layers: Vec::new(),
            },
            dir,
            stack,
        };
        self.save(&mut project)?;
        log::info!(
            "created project {} '{}' ({}x{})",
            project.meta.id,
            project.meta.name,
            project.stack.width(),
            project.stack.height()
        );
        Ok(project)
    }
}

/// 8 lowercase hex characters from a v4 UUID.
fn new_pid() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn file_stem_or(path: &Path, fallback: &str) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn hold_locks<T>(lock: &Mutex<()>, dir: &Path, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    let mut file_lock = RwLock::new(file);
    let _held = file_lock.write()?;
    f(dir)
}

fn read_meta(dir: &Path) -> Result<ProjectMeta> {
    Ok(serde_json::from_str(&fs::read_to_string(dir.join(META_FILE))?)?)
}

fn write_meta(dir: &Path, meta: &ProjectMeta) -> Result<()> {
    fs::write(dir.join(META_FILE), serde_json::to_string_pretty(meta)?)?;
    Ok(())
}

/// Remove `Layer<i>.png` files for indices at or past `len`.
fn remove_stale_images(dir: &Path, len: usize) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let index = name
            .strip_prefix("Layer")
            .and_then(|rest| rest.strip_suffix(".png"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(i) = index {
            if i >= len {
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

/// Keep `[A-Za-z0-9._-]`, collapse everything else to `-`.
pub fn safe_filename(name: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|c| matches!(c, '-' | '.' | '_'));
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
