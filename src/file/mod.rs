//! Flat-file backend.
//!
//! Each model type gets a folder under the data directory, named after its
//! table. Every record is one pretty-printed JSON file named after its
//! identity, laid out like a document in the document backend:
//!
//! ```text
//!   <data_dir>/
//!     users/
//!       1.json        {"id": 1, "name": "ada", "created_at": 1700000000}
//!       2.json
//!       nextId.json   3
//! ```
//!
//! `nextId.json` holds the next identity to hand out. Files are replaced
//! through a temporary file and a rename, so a reader never sees half a
//! record.

use crate::document::backend::{from_document, to_document};
use crate::document::{Document, Filter};
use crate::error::{DecodeError, Result, StorageError};
use crate::schema::{Identity, Model, SchemaDescriptor, TypeMap, Value};
use crate::service::{Backend, IdSequence};
use serde_json::Value as JsonValue;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Name of the sidecar file holding the next identity.
pub const NEXT_ID_FILE: &str = "nextId.json";

const EXTENSION: &str = "json";

/// Stores one model type as one JSON file per record.
pub struct FileBackend<T: Model> {
    folder: PathBuf,
    descriptor: Arc<SchemaDescriptor>,
    types: TypeMap,
    sequence: IdSequence,
    sidecar: Mutex<()>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model> std::fmt::Debug for FileBackend<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("folder", &self.folder)
            .finish()
    }
}

impl<T: Model> FileBackend<T> {
    /// Builds the backend for `T` under `data_dir`. Nothing is touched on
    /// disk until [`startup`](Backend::startup).
    pub fn new(data_dir: impl AsRef<Path>, types: TypeMap) -> Result<Self> {
        let descriptor = SchemaDescriptor::describe::<T>()?;
        let folder = data_dir.as_ref().join(descriptor.table());
        Ok(Self {
            folder,
            descriptor: Arc::new(descriptor),
            types,
            sequence: IdSequence::new(),
            sidecar: Mutex::new(()),
            _model: PhantomData,
        })
    }

    /// The folder holding this model's records.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the record file for an identity.
    pub fn path_of(&self, id: &Identity) -> Result<PathBuf> {
        let stem = id.to_string();
        if !is_safe_stem(&stem) {
            return Err(StorageError::InvalidIdentity(format!(
                "`{}` cannot be used as a file name",
                stem
            )));
        }
        Ok(self.folder.join(format!("{}.{}", stem, EXTENSION)))
    }

    fn read_document(&self, path: &Path) -> Result<Option<Document>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(JsonValue::Object(document)) => Ok(Some(document)),
            Ok(_) => Err(malformed(path, "not a JSON object")),
            Err(e) => Err(malformed(path, e)),
        }
    }

    fn read(&self, path: &Path) -> Result<Option<T>> {
        self.read_document(path)?
            .map(|document| from_document(&self.descriptor, &self.types, document))
            .transpose()
    }

    /// Record files, ordered by identity.
    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_record = path.extension().is_some_and(|ext| ext == EXTENSION)
                && path.file_name().is_some_and(|name| name != NEXT_ID_FILE)
                && path.file_stem().is_some_and(|stem| !stem.to_string_lossy().starts_with('.'));
            if is_record {
                paths.push(path);
            }
        }
        paths.sort_by_cached_key(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (stem.parse::<i64>().ok(), stem)
        });
        Ok(paths)
    }

    fn scan(&self, filter: &Filter) -> Result<Vec<T>> {
        let mut found = Vec::new();
        for path in self.record_paths()? {
            let Some(document) = self.read_document(&path)? else {
                continue;
            };
            if filter.matches(&document) {
                found.push(from_document(&self.descriptor, &self.types, document)?);
            }
        }
        Ok(found)
    }

    fn filter(&self, column: &str, value: &Value) -> Result<Filter> {
        let field = self.descriptor.require_field(column)?;
        Ok(Filter::eq(field.column(), self.types.encode_document(value)))
    }

    fn sidecar_path(&self) -> PathBuf {
        self.folder.join(NEXT_ID_FILE)
    }

    fn read_sidecar(&self) -> Result<Option<i64>> {
        let path = self.sidecar_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<JsonValue>(&text) {
            Ok(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| malformed(&path, "not an integer")),
            Err(e) => Err(malformed(&path, e)),
        }
    }

    /// Highest identity already taken: the sidecar's counter minus one, or
    /// the largest numeric file name, whichever is higher.
    fn highest_identity(&self) -> Result<i64> {
        let from_sidecar = self.read_sidecar()?.map_or(0, |next| next - 1);
        let from_files = self
            .record_paths()?
            .iter()
            .filter_map(|path| path.file_stem()?.to_str()?.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        Ok(from_sidecar.max(from_files))
    }
}

impl<T: Model> Backend<T> for FileBackend<T> {
    fn name(&self) -> &'static str {
        "file"
    }

    fn descriptor(&self) -> &Arc<SchemaDescriptor> {
        &self.descriptor
    }

    fn startup(&self) -> Result<()> {
        fs::create_dir_all(&self.folder)?;
        info!(folder = %self.folder.display(), "File backend ready");
        Ok(())
    }

    fn find(&self, id: &Identity) -> Result<Option<T>> {
        self.descriptor.identity_value(id)?;
        // No record can be stored under an unusable file name.
        if !is_safe_stem(&id.to_string()) {
            return Ok(None);
        }
        self.read(&self.path_of(id)?)
    }

    fn find_one(&self, column: &str, value: &Value) -> Result<Option<T>> {
        if column == self.descriptor.identity().column() {
            if let Some(id) = Identity::from_value(value) {
                return self.find(&id);
            }
        }
        let filter = self.filter(column, value)?;
        Ok(self.scan(&filter)?.into_iter().next())
    }

    fn find_all(&self) -> Result<Vec<T>> {
        self.scan(&Filter::all())
    }

    fn find_all_by(&self, column: &str, value: &Value) -> Result<Vec<T>> {
        let filter = self.filter(column, value)?;
        self.scan(&filter)
    }

    fn upsert(&self, object: &T) -> Result<()> {
        let record = self.descriptor.record_of(object)?;
        let id = self.descriptor.identity_in(&record)?;
        let path = self.path_of(&id)?;

        let document = JsonValue::Object(to_document(&self.descriptor, &self.types, &record));
        let bytes = serde_json::to_vec_pretty(&document).map_err(io::Error::from)?;
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), "Record file written");

        if let Some(n) = id.as_int() {
            self.sequence.observe(n);
        }
        Ok(())
    }

    fn delete(&self, object: &T) -> Result<bool> {
        let path = self.path_of(&self.descriptor.identity_of(object)?)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Record file removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn next_id(&self) -> Result<i64> {
        if !self.descriptor.identity().native_type().is_integer() {
            return Err(StorageError::InvalidIdentity(format!(
                "`{}` has a non-integer identity",
                self.descriptor.table()
            )));
        }

        let _guard = self.sidecar.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.sequence.next_with(|| self.highest_identity())?;
        let counter = (id + 1).to_string();
        if let Err(e) = write_atomic(&self.sidecar_path(), counter.as_bytes()) {
            warn!(folder = %self.folder.display(), error = %e, "Failed to persist id counter");
            return Err(e.into());
        }
        Ok(id)
    }
}

/// Whether a rendered identity is usable as a file name on its own.
fn is_safe_stem(stem: &str) -> bool {
    !stem.is_empty()
        && !stem.starts_with('.')
        && stem != "nextId"
        && !stem
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control())
}

/// Writes a uniquely named temporary file next to the destination, then
/// renames it into place. Concurrent writers of the same path each rename
/// their own complete file; the last rename wins.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let folder = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(folder)?;
    temp.write_all(bytes)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn malformed(path: &Path, message: impl std::fmt::Display) -> StorageError {
    DecodeError::Structured(format!("{}: {}", path.display(), message)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::tests::{Account, Profile, User};
    use crate::schema::{Field, ModelMetadata, Record};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tag {
        label: String,
        uses: i64,
    }

    impl Model for Tag {
        fn metadata() -> Option<ModelMetadata> {
            Some(
                ModelMetadata::new("tags")
                    .field(Field::of::<String>("label").identity())
                    .field(Field::of::<i64>("uses")),
            )
        }

        fn to_record(&self) -> Result<Record> {
            Ok(Record::new()
                .with("label", self.label.clone())
                .with("uses", self.uses))
        }

        fn from_record(mut record: Record) -> std::result::Result<Self, DecodeError> {
            Ok(Self {
                label: record.take("label")?,
                uses: record.take("uses")?,
            })
        }
    }

    fn backend<T: Model>(dir: &TempDir) -> FileBackend<T> {
        let backend = FileBackend::new(dir.path(), TypeMap::default()).unwrap();
        backend.startup().unwrap();
        backend
    }

    fn user(id: i32, name: &str) -> User {
        User {
            id,
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_one_pretty_file_per_record() {
        let dir = TempDir::new().unwrap();
        let users = backend::<User>(&dir);
        users.upsert(&user(1, "ada")).unwrap();

        let path = dir.path().join("users").join("1.json");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let stored: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(stored, serde_json::json!({"id": 1, "name": "ada", "created_at": 0}));

        assert_eq!(users.find(&Identity::Int(1)).unwrap(), Some(user(1, "ada")));
        assert_eq!(users.find(&Identity::Int(2)).unwrap(), None);
    }

    #[test]
    fn test_round_trip_with_uuid_file_names() {
        let dir = TempDir::new().unwrap();
        let accounts = backend::<Account>(&dir);
        let account = Account {
            uuid: Uuid::new_v4(),
            email: "ada@example.com".into(),
            balance: 3.25,
            verified: true,
            nickname: Some("countess".into()),
            profile: Profile {
                bio: "analyst".into(),
                links: vec![],
            },
        };
        accounts.upsert(&account).unwrap();

        assert!(dir
            .path()
            .join("accounts")
            .join(format!("{}.json", account.uuid))
            .exists());
        assert_eq!(accounts.find(&account.uuid.into()).unwrap(), Some(account.clone()));
        assert_eq!(
            accounts
                .find_one("email", &Value::Text("ada@example.com".into()))
                .unwrap(),
            Some(account)
        );
    }

    #[test]
    fn test_delete_and_scans() {
        let dir = TempDir::new().unwrap();
        let users = backend::<User>(&dir);
        for (id, name) in [(2, "b"), (10, "a"), (1, "a")] {
            users.upsert(&user(id, name)).unwrap();
        }

        let ids: Vec<i32> = users.find_all().unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(users.find_all_by("name", &Value::Text("a".into())).unwrap().len(), 2);

        assert!(users.delete(&user(10, "a")).unwrap());
        assert!(!users.delete(&user(10, "a")).unwrap());
        assert_eq!(users.find(&Identity::Int(10)).unwrap(), None);
        assert_eq!(users.find_all().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_folder_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let users: FileBackend<User> = FileBackend::new(dir.path(), TypeMap::default()).unwrap();
        assert!(users.find_all().unwrap().is_empty());
        assert_eq!(users.find(&Identity::Int(1)).unwrap(), None);
    }

    #[test]
    fn test_sidecar_counter_persists_across_restarts() {
        let dir = TempDir::new().unwrap();
        {
            let users = backend::<User>(&dir);
            assert_eq!(users.next_id().unwrap(), 1);
            assert_eq!(users.next_id().unwrap(), 2);
        }
        let sidecar = dir.path().join("users").join(NEXT_ID_FILE);
        assert_eq!(fs::read_to_string(&sidecar).unwrap(), "3");

        let users = backend::<User>(&dir);
        assert_eq!(users.next_id().unwrap(), 3);
    }

    #[test]
    fn test_seed_covers_files_written_without_counter() {
        let dir = TempDir::new().unwrap();
        backend::<User>(&dir).upsert(&user(7, "x")).unwrap();

        let users = backend::<User>(&dir);
        assert_eq!(users.next_id().unwrap(), 8);
    }

    #[test]
    fn test_unsafe_identities_are_rejected() {
        let dir = TempDir::new().unwrap();
        let tags = backend::<Tag>(&dir);

        for label in ["", "..", "../escape", "a/b", "nextId", ".hidden"] {
            let tag = Tag {
                label: label.into(),
                uses: 1,
            };
            assert!(
                matches!(tags.upsert(&tag), Err(StorageError::InvalidIdentity(_))),
                "{:?} was accepted",
                label
            );
        }

        let tag = Tag {
            label: "rust".into(),
            uses: 3,
        };
        tags.upsert(&tag).unwrap();
        assert_eq!(tags.find(&"rust".into()).unwrap(), Some(tag));
        assert!(matches!(tags.next_id(), Err(StorageError::InvalidIdentity(_))));
    }

    #[test]
    fn test_unsafe_identity_lookups_find_nothing() {
        let dir = TempDir::new().unwrap();
        let tags = backend::<Tag>(&dir);
        tags.upsert(&Tag {
            label: "rust".into(),
            uses: 1,
        })
        .unwrap();

        for label in ["a/b", "../rust", "nextId", ""] {
            let value = Value::Text(label.into());
            assert_eq!(tags.find_one("label", &value).unwrap(), None, "{:?}", label);
            assert_eq!(tags.find(&label.into()).unwrap(), None, "{:?}", label);
            assert!(tags.find_all_by("label", &value).unwrap().is_empty());
        }
    }

    #[test]
    fn test_concurrent_upserts_of_one_record() {
        let dir = TempDir::new().unwrap();
        let users = backend::<User>(&dir);

        let failures: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|t| {
                    let users = &users;
                    scope.spawn(move || {
                        (0..300)
                            .filter(|i| users.upsert(&user(1, &format!("writer-{}-{}", t, i))).is_err())
                            .count()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(failures, 0);

        let stored = users.find(&Identity::Int(1)).unwrap().unwrap();
        assert!(stored.name.starts_with("writer-"));
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("users"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("1.json")]);
    }

    #[test]
    fn test_malformed_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let users = backend::<User>(&dir);
        fs::write(dir.path().join("users").join("5.json"), "{ not json").unwrap();
        fs::write(
            dir.path().join("users").join("6.json"),
            r#"{"id": 6, "name": 42, "created_at": 0}"#,
        )
        .unwrap();

        assert!(matches!(
            users.find(&Identity::Int(5)),
            Err(StorageError::Decode(DecodeError::Structured(_)))
        ));
        assert!(matches!(
            users.find(&Identity::Int(6)),
            Err(StorageError::Decode(DecodeError::InColumn { .. }))
        ));
        assert!(users.find_all().is_err());
    }
}
