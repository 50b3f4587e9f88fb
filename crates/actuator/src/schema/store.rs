use std::path::{Path, PathBuf};

use crate::schema::SchemaVersion;

const VERSION_FILE: &str = "schema.version";

/// Persistent storage that knows which schema version it was created with.
pub trait SchemaStore {
    /// Returns `None` if no schema has been installed yet.
    fn installed_version(&self) -> crate::Result<Option<SchemaVersion>>;

    /// Destroys any existing schema and installs `version`.
    fn recreate(&mut self, version: &SchemaVersion) -> crate::Result<()>;
}

/// Schema store backed by a directory that contains a single version file.
pub struct VersionFile {
    directory: PathBuf,
}

impl VersionFile {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self) -> PathBuf {
        self.directory.join(VERSION_FILE)
    }
}

impl SchemaStore for VersionFile {
    fn installed_version(&self) -> crate::Result<Option<SchemaVersion>> {
        let path = self.path();
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().parse()?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn recreate(&mut self, version: &SchemaVersion) -> crate::Result<()> {
        if self.directory.exists() {
            std::fs::remove_dir_all(&self.directory)?;
        }
        std::fs::create_dir_all(&self.directory)?;
        std::fs::write(self.path(), format!("{version}\n"))?;
        Ok(())
    }
}
