//! Handle-level scenarios: encryption, callbacks, mapping, lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use halite::{
    Aes256GcmCipher, Cipher, DataType, DbConfig, DbError, FieldDef, Halite, Record, RecordMapper,
    Value, drop_database,
};

fn record(entries: &[(&str, Value)]) -> Record {
    entries.iter().cloned().collect()
}

#[test]
fn encrypted_database_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secret.hdb");
    let cipher: Arc<dyn Cipher> = Arc::new(Aes256GcmCipher::from_passphrase("open sesame"));

    let db = Halite::create_file(
        &path,
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("s", DataType::String),
        ],
        Some(Arc::clone(&cipher)),
        DbConfig::new(),
    )
    .unwrap();
    db.add(&record(&[("id", 1.into()), ("s", "secret".into())]))
        .unwrap();
    db.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert!(
        !bytes.windows(6).any(|w| w == b"secret"),
        "plaintext appeared in the backing file"
    );

    let db = Halite::open_file(&path, Some(cipher), DbConfig::new()).unwrap();
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.get("s"), Some(&Value::String("secret".into())));
    db.close().unwrap();

    assert!(matches!(
        Halite::open_file(&path, None, DbConfig::new()),
        Err(DbError::DbIsEncrypted)
    ));

    let wrong: Arc<dyn Cipher> = Arc::new(Aes256GcmCipher::from_passphrase("wrong"));
    let db = Halite::open_file(&path, Some(wrong), DbConfig::new()).unwrap();
    assert!(matches!(
        db.get_by_key(&Value::Int32(1), None, false),
        Err(DbError::Cipher(_))
    ));
}

#[test]
fn encrypt_api_needs_a_cipher() {
    let plain = Halite::create_memory(
        vec![FieldDef::new("n", DataType::Int32)],
        None,
        DbConfig::new(),
    )
    .unwrap();
    assert!(matches!(plain.encrypt(b"x"), Err(DbError::NoEncryptor)));
    assert!(matches!(plain.decrypt(b"x"), Err(DbError::NoEncryptor)));

    let cipher: Arc<dyn Cipher> = Arc::new(Aes256GcmCipher::from_passphrase("k"));
    let enc = Halite::create_memory(
        vec![FieldDef::new("n", DataType::Int32)],
        Some(cipher),
        DbConfig::new(),
    )
    .unwrap();
    let sealed = enc.encrypt(b"payload").unwrap();
    assert_eq!(enc.decrypt(&sealed).unwrap(), b"payload");
}

#[test]
fn callbacks_fire_and_swallow_panics() {
    let db = Halite::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key().autoinc(1),
            FieldDef::new("name", DataType::String),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();

    let adds = Arc::new(AtomicUsize::new(0));
    let updates = Arc::new(AtomicUsize::new(0));
    let deletes = Arc::new(AtomicUsize::new(0));
    {
        let adds = Arc::clone(&adds);
        db.on_add(Some(Box::new(move |_pos| {
            adds.fetch_add(1, Ordering::SeqCst);
        })));
    }
    {
        let updates = Arc::clone(&updates);
        db.on_update(Some(Box::new(move |_pos, _input| {
            updates.fetch_add(1, Ordering::SeqCst);
        })));
    }
    {
        let deletes = Arc::clone(&deletes);
        db.on_delete(Some(Box::new(move |_pos| {
            deletes.fetch_add(1, Ordering::SeqCst);
        })));
    }

    db.add(&record(&[("name", "a".into())])).unwrap();
    db.add(&record(&[("name", "b".into())])).unwrap();
    db.update_by_key(&Value::Int32(1), &record(&[("name", "a2".into())]))
        .unwrap();
    db.delete_by_key(&Value::Int32(2)).unwrap();
    assert_eq!(adds.load(Ordering::SeqCst), 2);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);

    // A failed mutation fires nothing.
    assert!(db
        .update_by_key(&Value::Int32(99), &record(&[("name", "x".into())]))
        .is_err());
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // A panicking callback is swallowed and the mutation still lands.
    db.on_add(Some(Box::new(|_pos| panic!("listener bug"))));
    db.add(&record(&[("name", "c".into())])).unwrap();
    assert_eq!(db.num_records().unwrap(), 2);

    // Bulk deletes report one callback per record.
    db.delete_where("name != 'missing'").unwrap();
    assert_eq!(deletes.load(Ordering::SeqCst), 3);
}

#[derive(Debug, PartialEq)]
struct Person {
    id: i32,
    name: String,
}

impl RecordMapper for Person {
    fn to_record(&self) -> Record {
        let mut rec = Record::new();
        rec.set("id", self.id).set("name", self.name.clone());
        rec
    }

    fn from_record(rec: &Record) -> Result<Self, DbError> {
        Ok(Person {
            id: rec.get("id").and_then(Value::as_int32).unwrap_or_default(),
            name: rec
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[test]
fn mapped_objects_roundtrip() {
    let db = Halite::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("name", DataType::String),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();

    let ann = Person {
        id: 1,
        name: "Ann".into(),
    };
    db.add_mapped(&ann).unwrap();
    db.add_mapped(&Person {
        id: 2,
        name: "Bob".into(),
    })
    .unwrap();

    let loaded: Person = db.get_mapped_by_key(&Value::Int32(1)).unwrap().unwrap();
    assert_eq!(loaded, ann);

    let bobs: Vec<Person> = db.select_mapped_where("name = 'Bob'").unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, 2);

    db.update_mapped_by_key(
        &Value::Int32(1),
        &Person {
            id: 1,
            name: "Anne".into(),
        },
    )
    .unwrap();
    let renamed: Person = db.get_mapped_by_key(&Value::Int32(1)).unwrap().unwrap();
    assert_eq!(renamed.name, "Anne");
}

#[test]
fn close_then_operate_fails() {
    let db = Halite::create_memory(
        vec![FieldDef::new("n", DataType::Int32)],
        None,
        DbConfig::new(),
    )
    .unwrap();
    assert!(db.is_open());
    db.close().unwrap();
    assert!(!db.is_open());

    assert!(matches!(
        db.add(&record(&[("n", 1.into())])),
        Err(DbError::NoOpenDatabase)
    ));
    assert!(matches!(db.num_records(), Err(DbError::NoOpenDatabase)));
    assert!(matches!(db.close(), Err(DbError::NoOpenDatabase)));
}

#[test]
fn drop_database_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("todrop.hdb");
    Halite::create_file(
        &path,
        vec![FieldDef::new("n", DataType::Int32)],
        None,
        DbConfig::new(),
    )
    .unwrap()
    .close()
    .unwrap();

    drop_database(&path).unwrap();
    assert!(!path.exists());

    assert!(matches!(
        drop_database(&path),
        Err(DbError::DatabaseFileNotFound { .. })
    ));
    assert!(matches!(drop_database(""), Err(DbError::EmptyFilename)));
}

#[test]
fn transactions_through_the_handle() {
    let db = Halite::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("n", DataType::Int32),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();
    db.add(&record(&[("id", 1.into()), ("n", 10.into())])).unwrap();

    db.begin_trans().unwrap();
    db.add(&record(&[("id", 2.into()), ("n", 20.into())])).unwrap();
    db.rollback_trans().unwrap();
    assert_eq!(db.num_records().unwrap(), 1);

    db.begin_trans().unwrap();
    db.add(&record(&[("id", 3.into()), ("n", 30.into())])).unwrap();
    db.commit_trans().unwrap();
    assert_eq!(db.num_records().unwrap(), 2);
}
