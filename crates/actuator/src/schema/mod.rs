//! Versioning of the persistent schema.
//!
//! Every mutating persistent operation has to go through [`SchemaGate::guard`], which refuses to
//! run it unless the installed schema is compatible with the version this build requires.
//! [`SchemaGate::reset`] is the only operation allowed to bypass the gate.
mod store;
mod version;

pub use store::{SchemaStore, VersionFile};
pub use version::SchemaVersion;

use crate::common::error::ActuatorError;

pub struct SchemaGate<S> {
    store: S,
    required: SchemaVersion,
}

impl<S: SchemaStore> SchemaGate<S> {
    pub fn new(store: S, required: SchemaVersion) -> Self {
        Self { store, required }
    }

    pub fn required(&self) -> &SchemaVersion {
        &self.required
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns `true` if the installed schema can be used by this build.
    /// A missing schema is never compatible.
    pub fn is_compatible(&self) -> crate::Result<bool> {
        Ok(self
            .store
            .installed_version()?
            .is_some_and(|installed| installed.is_compatible(&self.required)))
    }

    pub fn check(&self) -> crate::Result<()> {
        match self.store.installed_version()? {
            Some(installed) if installed.is_compatible(&self.required) => Ok(()),
            installed => Err(ActuatorError::SchemaIncompatible {
                installed: installed
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
                required: self.required.to_string(),
            }),
        }
    }

    /// Runs `operation` on the store only if the installed schema is compatible.
    pub fn guard<T, F>(&mut self, operation: F) -> crate::Result<T>
    where
        F: FnOnce(&mut S) -> crate::Result<T>,
    {
        self.check()?;
        operation(&mut self.store)
    }

    /// Destroys the schema and recreates it at the required version, regardless of what is
    /// currently installed.
    pub fn reset(&mut self) -> crate::Result<()> {
        log::info!("Resetting schema to version {}", self.required);
        self.store.recreate(&self.required)
    }
}

#[cfg(test)]
mod tests {
    use super::{SchemaGate, SchemaStore, SchemaVersion};
    use crate::common::error::ActuatorError;

    #[derive(Default)]
    struct MemoryStore {
        version: Option<SchemaVersion>,
        writes: u32,
    }

    impl SchemaStore for MemoryStore {
        fn installed_version(&self) -> crate::Result<Option<SchemaVersion>> {
            Ok(self.version.clone())
        }

        fn recreate(&mut self, version: &SchemaVersion) -> crate::Result<()> {
            self.version = Some(version.clone());
            self.writes = 0;
            Ok(())
        }
    }

    fn gate(installed: Option<&str>, required: &str) -> SchemaGate<MemoryStore> {
        SchemaGate::new(
            MemoryStore {
                version: installed.map(|v| v.parse().unwrap()),
                writes: 0,
            },
            required.parse().unwrap(),
        )
    }

    #[test]
    fn compatible_schema_runs_operation() {
        let mut gate = gate(Some("2.3.4"), "2.1.0");
        assert!(gate.is_compatible().unwrap());
        gate.guard(|store| {
            store.writes += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(gate.store().writes, 1);
    }

    #[test]
    fn incompatible_schema_blocks_operation() {
        let mut gate = gate(Some("1.9.9"), "2.0.0");
        let result = gate.guard(|store| {
            store.writes += 1;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(ActuatorError::SchemaIncompatible { .. })
        ));
        assert_eq!(gate.store().writes, 0);
    }

    #[test]
    fn missing_schema_is_incompatible() {
        let gate = gate(None, "1.0.0");
        assert!(!gate.is_compatible().unwrap());
        assert!(gate.check().is_err());
    }

    #[test]
    fn reset_bypasses_gate() {
        let mut gate = gate(Some("1.0.0"), "3.2.1");
        assert!(gate.check().is_err());
        gate.reset().unwrap();
        gate.check().unwrap();
        assert_eq!(
            gate.store().installed_version().unwrap(),
            Some(SchemaVersion::new(3, 2, 1))
        );
    }
}
