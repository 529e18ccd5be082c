use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::EngineError;

/// Read access to a packaged archetype. Paths are archive-relative and
/// `/`-joined; the core never touches the native filesystem directly.
pub trait Archive {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Result<Vec<u8>, EngineError>;
    /// Every file path in the archive, sorted.
    fn list(&self) -> Vec<String>;

    fn read_string(&self, path: &str) -> Result<String, EngineError> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes)
            .map_err(|_| EngineError::output(format!("{path} is not valid UTF-8")))
    }
}

/// Joins archive paths with `/`, ignoring empty segments.
pub fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_owned()
    } else if rel.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{rel}")
    }
}

/// Collapses `.` and `..` segments. `..` past the archive root is an error.
pub fn canonicalize(path: &str) -> Result<String, EngineError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(EngineError::output(format!(
                        "path {path} escapes the archetype root"
                    )));
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// The directory part of an archive path, empty for top-level entries.
pub fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

/// Directory-backed archetype.
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    pub fn open(root: impl Into<PathBuf>) -> Result<DirArchive, EngineError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(EngineError::output(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(DirArchive { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        full
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = join(prefix, &name);
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => self.collect(&entry.path(), &path, out),
                Ok(ft) if ft.is_file() => out.push(path),
                _ => {}
            }
        }
    }
}

impl Archive for DirArchive {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        Ok(fs::read(self.resolve(path))?)
    }

    fn list(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&self.root, "", &mut out);
        out.sort();
        out
    }
}

/// `.tgz`/`.tar.gz` packaged archetype, fully read at open time.
pub struct TgzArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl TgzArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<TgzArchive, EngineError> {
        let file = fs::File::open(path.as_ref())?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let mut entries = BTreeMap::new();
        for entry in tar.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            entries.insert(canonicalize(&name)?, contents);
        }
        Ok(TgzArchive { entries })
    }
}

impl Archive for TgzArchive {
    fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        self.entries.get(path).cloned().ok_or_else(|| {
            EngineError::output(format!("no such entry in archetype: {path}"))
        })
    }

    fn list(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// In-memory archetype, used by tests and embedders.
#[derive(Default)]
pub struct MemArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemArchive {
    pub fn new() -> MemArchive {
        MemArchive::default()
    }

    pub fn with(mut self, path: &str, contents: impl Into<Vec<u8>>) -> MemArchive {
        self.entries.insert(path.to_owned(), contents.into());
        self
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.entries.insert(path.to_owned(), contents.into());
    }
}

impl Archive for MemArchive {
    fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        self.entries.get(path).cloned().ok_or_else(|| {
            EngineError::output(format!("no such entry in archetype: {path}"))
        })
    }

    fn list(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Opens a directory or `.tgz` archetype by filesystem path.
pub fn open(path: impl AsRef<Path>) -> Result<Box<dyn Archive>, EngineError> {
    let path = path.as_ref();
    if path.is_dir() {
        Ok(Box::new(DirArchive::open(path)?))
    } else {
        let name = path.to_string_lossy();
        if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Ok(Box::new(TgzArchive::open(path)?))
        } else {
            Err(EngineError::output(format!(
                "{} is neither a directory nor a .tgz archetype",
                path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_collapses_segments() {
        assert_eq!(canonicalize("a/./b/../c.xml").unwrap(), "a/c.xml");
        assert_eq!(canonicalize("x.xml").unwrap(), "x.xml");
        assert!(canonicalize("../up.xml").is_err());
    }

    #[test]
    fn mem_archive_round_trip() {
        let archive = MemArchive::new().with("dir/a.txt", "hello");
        assert!(archive.exists("dir/a.txt"));
        assert!(!archive.exists("dir/b.txt"));
        assert_eq!(archive.read_string("dir/a.txt").unwrap(), "hello");
        assert_eq!(archive.list(), vec!["dir/a.txt"]);
    }

    #[test]
    fn dir_archive_lists_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("root.xml"), "<x/>").unwrap();
        fs::write(dir.path().join("sub/leaf.txt"), "leaf").unwrap();
        let archive = DirArchive::open(dir.path()).unwrap();
        assert_eq!(archive.list(), vec!["root.xml", "sub/leaf.txt"]);
        assert_eq!(archive.read_string("sub/leaf.txt").unwrap(), "leaf");
    }
}
