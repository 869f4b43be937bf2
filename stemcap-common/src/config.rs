//! Song list loading and download root resolution
//!
//! The song list is a YAML document:
//!
//! ```yaml
//! songs:
//!   - url: https://www.karaoke-version.com/custombackingtrack/queen/bohemian-rhapsody.html
//!     name: Bohemian Rhapsody   # optional, derived from the URL when absent
//!     key: -1                   # optional, integer or "+2"/"-1" string
//!     description: practice     # optional
//! ```
//!
//! Entries are validated one by one; an invalid entry is logged and skipped so
//! that a single typo never aborts the session.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::{Song, KEY_RANGE};
use crate::{Error, Result};

/// Environment variable consulted for the download root
pub const DOWNLOAD_ROOT_ENV: &str = "STEMCAP_DOWNLOAD_ROOT";

/// Folder created under the OS downloads directory when nothing else is configured
const DEFAULT_ROOT_DIR_NAME: &str = "karaoke-stems";

/// Host fragment every song URL must contain
const SITE_HOST: &str = "karaoke-version.com";

/// Path fragment identifying a custom backing track page
const CUSTOM_TRACK_PATH: &str = "custombackingtrack";

/// Contractions restored when deriving a name from a URL slug (`don-t` → `don't`)
const CONTRACTION_SUFFIXES: &[&str] = &["t", "m", "re", "s", "ll", "ve", "d"];

#[derive(Debug, Deserialize)]
struct SongListFile {
    #[serde(default)]
    songs: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawSongEntry {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    key: Option<RawKey>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKey {
    Number(i64),
    Text(String),
}

/// Parsed song list with the reasons for every skipped entry
#[derive(Debug, Clone, Default)]
pub struct SongList {
    pub songs: Vec<Song>,
    pub skipped: Vec<String>,
}

/// Load and validate a YAML song list file
pub fn load_song_list(path: &Path) -> Result<SongList> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read song list {} failed: {}", path.display(), e)))?;
    parse_song_list(&content)
}

/// Parse and validate a YAML song list document
///
/// Fails only when the document itself is malformed; individual bad entries
/// end up in [`SongList::skipped`].
pub fn parse_song_list(content: &str) -> Result<SongList> {
    let file: SongListFile = serde_yaml::from_str(content)?;
    let mut list = SongList::default();

    for (position, value) in file.songs.into_iter().enumerate() {
        match parse_entry(value) {
            Ok(song) => {
                debug!(song = %song.display_name, key = song.key_adjustment, "Loaded song entry");
                list.songs.push(song);
            }
            Err(e) => {
                let reason = format!("entry {}: {}", position + 1, e);
                warn!("Skipping invalid song entry: {}", reason);
                list.skipped.push(reason);
            }
        }
    }

    Ok(list)
}

fn parse_entry(value: serde_yaml::Value) -> Result<Song> {
    let raw: RawSongEntry = serde_yaml::from_value(value)
        .map_err(|e| Error::InvalidInput(format!("malformed entry: {}", e)))?;

    let url = raw.url.trim().to_string();
    validate_song_url(&url)?;

    let key = match raw.key {
        Some(k) => parse_key(&k)?,
        None => 0,
    };

    let name = match raw.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => derive_name_from_url(&url)
            .ok_or_else(|| Error::InvalidInput(format!("cannot derive a name from {}", url)))?,
    };

    let description = raw.description.filter(|d| !d.trim().is_empty());
    Ok(Song::new(url, name, key)?.with_description(description))
}

fn parse_key(raw: &RawKey) -> Result<i8> {
    let value = match raw {
        RawKey::Number(n) => *n,
        RawKey::Text(s) => {
            let trimmed = s.trim();
            let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
            digits
                .parse::<i64>()
                .map_err(|_| Error::InvalidInput(format!("key '{}' is not an integer", s)))?
        }
    };

    i8::try_from(value)
        .ok()
        .filter(|k| KEY_RANGE.contains(k))
        .ok_or_else(|| Error::InvalidInput(format!("key {} outside [-12, +12]", value)))
}

/// Accept only https URLs on the karaoke site that point at a custom backing track
pub fn validate_song_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw).map_err(|e| Error::InvalidInput(format!("invalid URL '{}': {}", raw, e)))?;

    if url.scheme() != "https" {
        return Err(Error::InvalidInput(format!("URL must use https: {}", raw)));
    }

    let host_ok = url.host_str().map(|h| h.contains(SITE_HOST)).unwrap_or(false);
    if !host_ok {
        return Err(Error::InvalidInput(format!("URL host is not {}: {}", SITE_HOST, raw)));
    }

    if !url.path().contains(CUSTOM_TRACK_PATH) {
        return Err(Error::InvalidInput(format!(
            "URL is not a custom backing track page: {}",
            raw
        )));
    }

    Ok(())
}

/// Derive a display name from a custom backing track URL
///
/// `.../custombackingtrack/queen/don-t-stop-me-now.html` → `Queen - Don't Stop Me Now`
pub fn derive_name_from_url(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let path = url.path();
    let marker = format!("{}/", CUSTOM_TRACK_PATH);
    let start = path.find(&marker)? + marker.len();
    let slug = path[start..].trim_end_matches('/');
    let slug = slug.strip_suffix(".html").unwrap_or(slug);

    let parts: Vec<String> = slug
        .split('/')
        .filter(|s| !s.is_empty())
        .map(humanize_slug)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" - "))
    }
}

fn humanize_slug(segment: &str) -> String {
    let mut words: Vec<String> = Vec::new();

    for token in segment.split('-').filter(|t| !t.is_empty()) {
        let lower = token.to_lowercase();
        match words.last_mut() {
            Some(prev) if CONTRACTION_SUFFIXES.contains(&lower.as_str()) => {
                prev.push('\'');
                prev.push_str(&lower);
            }
            _ => words.push(token.to_string()),
        }
    }

    words
        .iter()
        .map(|w| capitalize(w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Download root resolution, highest priority first:
/// 1. Command-line argument
/// 2. `STEMCAP_DOWNLOAD_ROOT` environment variable
/// 3. OS downloads directory + `karaoke-stems`
/// 4. `./downloads`
pub fn resolve_download_root(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DOWNLOAD_ROOT_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    dirs::download_dir()
        .map(|d| d.join(DEFAULT_ROOT_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}
