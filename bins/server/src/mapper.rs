use std::collections::HashMap;

/// Для resource path нет записи в таблице.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no upstream path mapped for '{0}'")]
pub struct UnmappedPath(pub String);

/// Статическая таблица resource path → upstream path.
#[derive(Debug, Default)]
pub struct PathMapper {
    paths: HashMap<String, String>,
}

impl PathMapper {
    pub fn new(paths: HashMap<String, String>) -> Self {
        Self { paths }
    }

    pub fn lookup(&self, resource: &str) -> Result<&str, UnmappedPath> {
        self.paths
            .get(resource)
            .map(String::as_str)
            .ok_or_else(|| UnmappedPath(resource.to_string()))
    }

    /// `lookup` с откатом на сам resource path.
    pub fn upstream_path<'a>(&'a self, resource: &'a str) -> &'a str {
        match self.lookup(resource) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "falling back to the resource path");
                resource
            }
        }
    }
}
