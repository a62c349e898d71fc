use crate::cache::{CacheError, CacheResult};
use crate::frontier::WorkUnit;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use url::Url;

/// Artifact names longer than this collapse to a hash
const MAX_NAME_LEN: usize = 180;

const META_PREFIX: &str = "<!-- META_JSON: ";
const META_SUFFIX: &str = " -->\n";

/// Metadata header written at the top of every content artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub origin_url: String,
    #[serde(default)]
    pub category: Vec<String>,
}

/// File locations belonging to one work unit
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Compressed content, `<name>.html.gz`
    pub content: PathBuf,
    /// Uncompressed content written by older runs, `<name>.html`
    pub legacy: PathBuf,
    /// Newline-delimited extracted links, `<name>.html.links.txt`
    pub links: PathBuf,
}

/// Durable store of captured pages and their extracted links
///
/// Files live under `<root>/<host>/`. Once a content file exists it is the
/// truth for its unit until someone deletes it.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the file locations for a unit
    pub fn paths(&self, unit: &WorkUnit) -> ArtifactPaths {
        let (dir, name) = match Url::parse(unit.key()) {
            Ok(url) => (
                self.root.join(url.host_str().unwrap_or("unknown-host")),
                artifact_name(&url),
            ),
            Err(_) => (self.root.join("units"), hashed_name(unit.key())),
        };

        ArtifactPaths {
            content: dir.join(format!("{}.html.gz", name)),
            legacy: dir.join(format!("{}.html", name)),
            links: dir.join(format!("{}.html.links.txt", name)),
        }
    }

    /// Returns true if content for the unit is cached in either format
    pub fn has_content(&self, unit: &WorkUnit) -> bool {
        let paths = self.paths(unit);
        paths.content.exists() || paths.legacy.exists()
    }

    /// Reads cached content with its metadata header removed
    ///
    /// A compressed file that fails to decode is logged and treated as a miss,
    /// so the unit is fetched again and the file replaced.
    pub fn read_content(&self, unit: &WorkUnit) -> CacheResult<Option<Vec<u8>>> {
        let paths = self.paths(unit);

        match std::fs::File::open(&paths.content) {
            Ok(file) => {
                let mut raw = Vec::new();
                match GzDecoder::new(file).read_to_end(&mut raw) {
                    Ok(_) => {
                        debug!("Content cache hit for {}", unit.key());
                        return Ok(Some(strip_meta(raw)));
                    }
                    Err(e) => {
                        warn!(
                            "Ignoring unreadable artifact {}: {}",
                            paths.content.display(),
                            e
                        );
                        return Ok(None);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&paths.content, e)),
        }

        match std::fs::read(&paths.legacy) {
            Ok(raw) => {
                debug!("Legacy content cache hit for {}", unit.key());
                Ok(Some(strip_meta(raw)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&paths.legacy, e)),
        }
    }

    /// Reads the metadata header of a cached artifact, if any
    pub fn read_meta(&self, unit: &WorkUnit) -> CacheResult<Option<ArtifactMeta>> {
        let paths = self.paths(unit);
        let raw = match std::fs::File::open(&paths.content) {
            Ok(file) => {
                let mut raw = Vec::new();
                GzDecoder::new(file)
                    .read_to_end(&mut raw)
                    .map_err(|e| CacheError::io(&paths.content, e))?;
                raw
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&paths.content, e)),
        };

        Ok(parse_meta(&raw))
    }

    /// Writes content for a unit, prefixed with its metadata header
    pub fn write_content(&self, unit: &WorkUnit, content: &[u8]) -> CacheResult<PathBuf> {
        let paths = self.paths(unit);
        let meta = ArtifactMeta {
            origin_url: unit.key().to_string(),
            category: unit.ancestors().to_vec(),
        };
        let header = serde_json::to_string(&meta)
            .map_err(|e| CacheError::Encode(e.to_string()))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(META_PREFIX.as_bytes())
            .and_then(|_| encoder.write_all(header.as_bytes()))
            .and_then(|_| encoder.write_all(META_SUFFIX.as_bytes()))
            .and_then(|_| encoder.write_all(content))
            .map_err(|e| CacheError::io(&paths.content, e))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CacheError::io(&paths.content, e))?;

        write_atomic(&paths.content, &compressed)?;
        debug!("Cached {} bytes for {}", content.len(), unit.key());
        Ok(paths.content)
    }

    /// Reads the cached link list for a unit
    pub fn read_links(&self, unit: &WorkUnit) -> CacheResult<Option<Vec<String>>> {
        let paths = self.paths(unit);
        match std::fs::read_to_string(&paths.links) {
            Ok(text) => Ok(Some(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&paths.links, e)),
        }
    }

    /// Writes the link list for a unit, one URL per line
    pub fn write_links(&self, unit: &WorkUnit, links: &[String]) -> CacheResult<()> {
        let paths = self.paths(unit);
        let mut text = links.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        write_atomic(&paths.links, text.as_bytes())
    }
}

/// Derives the artifact base name from a URL
///
/// The path loses its outer slashes and inner slashes become `_`; an empty
/// path is `index`. A query is appended as `__k-v_k2-v2`. Names that would
/// exceed the filesystem-friendly length are replaced by a SHA-256 prefix.
pub fn artifact_name(url: &Url) -> String {
    let path = url.path().trim_matches('/');
    let mut name = if path.is_empty() {
        "index".to_string()
    } else {
        path.replace('/', "_")
    };

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        name.push_str("__");
        name.push_str(&query.replace('&', "_").replace('=', "-"));
    }

    if name.len() > MAX_NAME_LEN {
        hashed_name(url.as_str())
    } else {
        name
    }
}

fn hashed_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..20])
}

fn write_atomic(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| CacheError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| CacheError::io(path, e.error))?;
    Ok(())
}

fn parse_meta(raw: &[u8]) -> Option<ArtifactMeta> {
    let rest = raw.strip_prefix(META_PREFIX.as_bytes())?;
    let end = find(rest, META_SUFFIX.as_bytes())?;
    serde_json::from_slice(&rest[..end]).ok()
}

fn strip_meta(raw: Vec<u8>) -> Vec<u8> {
    let Some(rest) = raw.strip_prefix(META_PREFIX.as_bytes()) else {
        return raw;
    };

    match find(rest, META_SUFFIX.as_bytes()) {
        Some(end) => rest[end + META_SUFFIX.len()..].to_vec(),
        None => raw,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
