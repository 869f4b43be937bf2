//! Download folder scanning
//!
//! Snapshots a per-song folder, classifies file names (finished audio vs
//! in-progress partial vs unrelated) and answers stat queries. Results are
//! cached for a short TTL to absorb the call volume of the monitor loop;
//! entries expire on TTL only, never on writes.
//!
//! Missing paths are reported as `exists: false`, never as errors.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use walkdir::WalkDir;

/// Finished audio extensions (lowercase, no dot)
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aif", "wav", "m4a"];

/// Suffixes browsers use for files still being written
pub const IN_PROGRESS_SUFFIXES: &[&str] = &[".crdownload", ".part", ".partial", ".download"];

/// Stat result for one path
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub name: String,
    pub exists: bool,
    pub is_file: bool,
    pub size: u64,
    pub mtime: Option<SystemTime>,
    /// Age at the time of the stat
    pub age: Duration,
}

impl FileInfo {
    fn missing(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: file_name_of(path),
            exists: false,
            is_file: false,
            size: 0,
            mtime: None,
            age: Duration::ZERO,
        }
    }

    fn from_path(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mtime = meta.modified().ok();
                let age = mtime
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or(Duration::ZERO);
                Self {
                    path: path.to_path_buf(),
                    name: file_name_of(path),
                    exists: true,
                    is_file: meta.is_file(),
                    size: meta.len(),
                    mtime,
                    age,
                }
            }
            Err(_) => Self::missing(path),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Whether `name` is a finished audio file
pub fn is_audio_name(name: &str) -> bool {
    extension_of(name)
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Whether `name` is a partial download
pub fn is_in_progress_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    IN_PROGRESS_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Name the partial file will have once finished (`a.mp3.crdownload` → `a.mp3`)
pub fn in_progress_target(name: &str) -> Option<&str> {
    let lower = name.to_lowercase();
    IN_PROGRESS_SUFFIXES
        .iter()
        .find(|s| lower.ends_with(*s))
        .map(|s| &name[..name.len() - s.len()])
}

fn stem_of(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Whether a partial file among `names` belongs to `audio_name`
pub fn has_partial_sibling<'a>(audio_name: &str, names: impl IntoIterator<Item = &'a str>) -> bool {
    let audio_stem = stem_of(audio_name);
    names.into_iter().any(|other| match in_progress_target(other) {
        Some(target) => target == audio_name || stem_of(target) == audio_stem || target == audio_stem,
        None => false,
    })
}

/// Check the first bytes of a file against known audio signatures
pub fn verify_audio_magic(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 12];
    let bytes_read = file.read(&mut buffer)?;

    if bytes_read < 4 {
        return Ok(false);
    }

    let is_audio = match &buffer[..bytes_read] {
        // MP3
        [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] | [0xFF, 0xF2, ..] => true,
        [b'I', b'D', b'3', ..] => true,

        // M4A (MP4 container)
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => true,

        // WAV
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E'] => true,

        // AIFF / AIFC
        [b'F', b'O', b'R', b'M', _, _, _, _, b'A', b'I', b'F', _] => true,

        _ => false,
    };

    Ok(is_audio)
}

/// Immutable set of names present in a folder when monitoring began
#[derive(Debug, Clone, Default)]
pub struct FileSnapshot {
    names: HashSet<String>,
}

impl FileSnapshot {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

type ScanKey = (PathBuf, Option<Vec<String>>);

/// Cached filesystem scanner
pub struct FsScanner {
    ttl: Duration,
    stat_cache: Mutex<HashMap<PathBuf, (Instant, FileInfo)>>,
    scan_cache: Mutex<HashMap<ScanKey, (Instant, Vec<FileInfo>)>>,
}

impl FsScanner {
    /// `Duration::ZERO` disables caching
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stat_cache: Mutex::new(HashMap::new()),
            scan_cache: Mutex::new(HashMap::new()),
        }
    }

    fn fresh(&self, cached_at: Instant) -> bool {
        !self.ttl.is_zero() && cached_at.elapsed() < self.ttl
    }

    /// Stat a path (cached)
    pub fn stat(&self, path: &Path) -> FileInfo {
        if let Ok(cache) = self.stat_cache.lock() {
            if let Some((at, info)) = cache.get(path) {
                if self.fresh(*at) {
                    return info.clone();
                }
            }
        }

        let info = FileInfo::from_path(path);
        if let Ok(mut cache) = self.stat_cache.lock() {
            cache.insert(path.to_path_buf(), (Instant::now(), info.clone()));
        }
        info
    }

    /// List regular files directly inside `dir` (cached)
    ///
    /// `extensions` filters by lowercase extension without the dot.
    pub fn scan(&self, dir: &Path, extensions: Option<&[&str]>) -> Vec<FileInfo> {
        let key: ScanKey = (
            dir.to_path_buf(),
            extensions.map(|exts| exts.iter().map(|e| e.to_lowercase()).collect()),
        );

        if let Ok(cache) = self.scan_cache.lock() {
            if let Some((at, files)) = cache.get(&key) {
                if self.fresh(*at) {
                    return files.clone();
                }
            }
        }

        let files = scan_uncached(dir, key.1.as_deref());
        if let Ok(mut cache) = self.scan_cache.lock() {
            cache.insert(key, (Instant::now(), files.clone()));
        }
        files
    }

    /// Names currently in `dir`, bypassing the cache
    pub fn snapshot(&self, dir: &Path) -> FileSnapshot {
        FileSnapshot::from_names(scan_uncached(dir, None).into_iter().map(|f| f.name))
    }
}

fn scan_uncached(dir: &Path, extensions: Option<&[String]>) -> Vec<FileInfo> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Files vanish mid-scan while the browser renames partials
                tracing::trace!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(exts) = extensions {
            let matches = extension_of(&name)
                .map(|ext| exts.iter().any(|e| *e == ext))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        let info = FileInfo::from_path(entry.path());
        if info.exists {
            files.push(info);
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}
