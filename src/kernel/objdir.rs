//! Object directory path resolution.
//!
//! Resolves `\`-separated paths by scanning every bucket chain of each
//! directory and comparing names case-insensitively. The bucket hash is
//! not recomputed, so a lookup costs buckets × chain length per segment.

use super::object::{
    DirectoryEntry, EntryRef, ObjectError, ObjectHandle, ObjectNamespace, NUMBER_HASH_BUCKETS,
};

/// Default bound on entries walked in one bucket chain
pub const DEFAULT_CHAIN_LIMIT: usize = 4096;

/// Outcome of a path lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(ObjectHandle),
    NotFound,
}

impl Lookup {
    pub fn found(self) -> Option<ObjectHandle> {
        match self {
            Lookup::Found(handle) => Some(handle),
            Lookup::NotFound => None,
        }
    }
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub bucket: usize,
    pub name: String,
    pub object: ObjectHandle,
    pub is_directory: bool,
}

/// Path resolver over an [`ObjectNamespace`]
pub struct Resolver<'n, N: ?Sized> {
    namespace: &'n N,
    chain_limit: usize,
}

impl<'n, N: ObjectNamespace + ?Sized> Resolver<'n, N> {
    pub fn new(namespace: &'n N) -> Self {
        Self {
            namespace,
            chain_limit: DEFAULT_CHAIN_LIMIT,
        }
    }

    pub fn with_chain_limit(mut self, limit: usize) -> Self {
        self.chain_limit = limit;
        self
    }

    /// Resolve an absolute path such as `\Driver\afd` from the root directory
    pub fn lookup(&self, path: &str) -> Result<Lookup, ObjectError> {
        let relative = validate_absolute(path)?;
        let root = self.namespace.root_directory()?;
        self.resolve(root, relative)
    }

    /// Resolve `path` relative to `directory`
    ///
    /// A directory matched by the last segment is returned as-is. A
    /// non-directory matched with segments left over is an error rather
    /// than a partial result.
    pub fn resolve(&self, directory: ObjectHandle, path: &str) -> Result<Lookup, ObjectError> {
        let (head, tail) = match path.split_once('\\') {
            Some((head, tail)) => (head, tail),
            None => (path, ""),
        };

        log::trace!("Resolving '{}' in directory {:#x}", head, directory.0);

        let wanted = head.to_lowercase();
        let mut matched = None;
        self.walk(directory, |_, name, entry| {
            if name.to_lowercase() == wanted {
                matched = Some(entry.object);
                return false;
            }
            true
        })?;

        let Some(object) = matched else {
            return Ok(Lookup::NotFound);
        };

        if tail.is_empty() {
            return Ok(Lookup::Found(object));
        }

        let header = self.namespace.read_header(object)?;
        if !self.namespace.is_directory_type(header.type_ref)? {
            return Err(ObjectError::NotADirectory {
                name: head.to_string(),
                remaining: tail.to_string(),
            });
        }

        self.resolve(object, tail)
    }

    /// Every entry of `directory` in bucket then chain order
    pub fn list(&self, directory: ObjectHandle) -> Result<Vec<DirectoryListing>, ObjectError> {
        let mut rows = Vec::new();
        let mut failure = None;

        self.walk(directory, |bucket, name, entry| {
            let is_directory = self
                .namespace
                .read_header(entry.object)
                .and_then(|header| self.namespace.is_directory_type(header.type_ref));
            match is_directory {
                Ok(is_directory) => {
                    rows.push(DirectoryListing {
                        bucket,
                        name: name.to_string(),
                        object: entry.object,
                        is_directory,
                    });
                    true
                }
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;

        match failure {
            Some(e) => Err(e),
            None => Ok(rows),
        }
    }

    /// Visit `(bucket, name, entry)` for each entry until `visit` returns false
    fn walk<F>(&self, directory: ObjectHandle, mut visit: F) -> Result<(), ObjectError>
    where
        F: FnMut(usize, &str, &DirectoryEntry) -> bool,
    {
        for bucket in 0..NUMBER_HASH_BUCKETS {
            let mut cursor: Option<EntryRef> = self.namespace.bucket_head(directory, bucket)?;
            let mut walked = 0usize;

            while let Some(link) = cursor {
                walked += 1;
                if walked > self.chain_limit {
                    return Err(ObjectError::ChainTooLong {
                        bucket,
                        limit: self.chain_limit,
                    });
                }

                let entry = self.namespace.read_entry(link)?;
                let header = self.namespace.read_header(entry.object)?;
                let name = self.namespace.display_name(&header)?;

                if !visit(bucket, &name, &entry) {
                    return Ok(());
                }
                cursor = entry.next;
            }
        }
        Ok(())
    }
}

/// Strip the leading `\` and reject paths the resolver cannot take
fn validate_absolute(path: &str) -> Result<&str, ObjectError> {
    let invalid = |reason| ObjectError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    let Some(relative) = path.strip_prefix('\\') else {
        return Err(invalid("path must start with '\\'"));
    };
    if relative.is_empty() || relative.split('\\').any(str::is_empty) {
        return Err(invalid("path has an empty segment"));
    }
    Ok(relative)
}
