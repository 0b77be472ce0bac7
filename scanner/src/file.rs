use std::{io, path::Path};

use keel_graph::{ClassDescriptor, ClassIndex};
use serde::Deserialize;
use url::Url;

use crate::{ScanError, ScanRequest, Scanner};

/// Location of the class index inside a classpath directory.
pub const INDEX_PATH: &str = "META-INF/keel-index.json";

#[derive(Deserialize)]
struct IndexDocument {
    #[serde(default)]
    classes: Vec<ClassDescriptor>,
}

/// Reads precomputed class indexes from `file:` classpath entries.
///
/// A directory entry contributes `META-INF/keel-index.json` if present; a file entry is
/// read as an index document itself. Missing entries contribute nothing. Later entries
/// shadow earlier ones for classes defined twice.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexFileScanner;

impl IndexFileScanner {
    pub fn new() -> Self {
        Default::default()
    }

    fn read_entry(&self, url: &Url) -> Result<Option<ClassIndex>, ScanError> {
        if url.scheme() != "file" {
            return Err(ScanError::UnsupportedEntry { url: url.clone() });
        }
        let path = url
            .to_file_path()
            .map_err(|()| ScanError::UnsupportedEntry { url: url.clone() })?;
        let index_path = if path.is_dir() {
            path.join(INDEX_PATH)
        } else {
            path
        };
        let Some(source) = read_optional(&index_path).map_err(|source| ScanError::Io {
            url: url.clone(),
            source,
        })?
        else {
            tracing::debug!(entry = %url, "no class index");
            return Ok(None);
        };
        let document: IndexDocument =
            serde_json::from_str(&source).map_err(|source| ScanError::MalformedIndex {
                url: url.clone(),
                source,
            })?;
        Ok(Some(ClassIndex::from_classes(document.classes)))
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(source) => Ok(Some(source)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

impl Scanner for IndexFileScanner {
    fn scan(&self, request: &ScanRequest) -> Result<ClassIndex, ScanError> {
        let mut index = ClassIndex::default();
        for entry in &request.classpath {
            if let Some(found) = self.read_entry(entry)? {
                index.merge(found);
            }
        }
        tracing::debug!(module = %request.module, classes = index.len(), "scanned classpath");
        Ok(index)
    }
}
