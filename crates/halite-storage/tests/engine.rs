//! End-to-end engine scenarios over memory and file backings.

use std::sync::Arc;

use halite_storage::{
    Backing, Cipher, CipherError, DbConfig, DbError, Engine, FileBacking, MemoryBacking,
};
use halite_types::{ArrayValue, DataType, FieldDef, Record, Value};

fn record(entries: &[(&str, Value)]) -> Record {
    entries.iter().cloned().collect()
}

fn id_name_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new("id", DataType::Int32).primary_key().autoinc(1),
        FieldDef::new("name", DataType::String),
    ]
}

#[test]
fn create_add_read_with_autoinc() {
    let mut db = Engine::create_memory(id_name_fields(), None, DbConfig::new()).unwrap();

    db.add(&record(&[("name", "a".into())])).unwrap();
    db.add(&record(&[("name", "b".into())])).unwrap();

    assert_eq!(db.num_records(), 2);
    let a = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(a.get("name"), Some(&Value::String("a".into())));
    let b = db.get_by_key(&Value::Int32(2), None, false).unwrap().unwrap();
    assert_eq!(b.get("name"), Some(&Value::String("b".into())));
}

#[test]
fn signature_and_version_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sig.hdb");
    let db = Engine::create_file(&path, id_name_fields(), None, DbConfig::new()).unwrap();
    db.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], &[0xBE, 0xBA, 0x23, 0x01]);
    assert_eq!(bytes[4], 6);
    assert_eq!(bytes[5], 0);
}

#[test]
fn update_grows_relocates_then_clean() {
    let fields = vec![
        FieldDef::new("id", DataType::Int32).primary_key(),
        FieldDef::new("s", DataType::String),
    ];
    let mut db = Engine::create_memory(fields, None, DbConfig::new()).unwrap();
    db.add(&record(&[("id", 1.into()), ("s", "x".into())])).unwrap();
    db.add(&record(&[("id", 2.into()), ("s", "y".into())])).unwrap();

    let long = "a very long replacement string";
    db.update_by_key(&Value::Int32(1), &record(&[("s", long.into())]))
        .unwrap();

    assert_eq!(db.num_deleted(), 1);
    assert_eq!(db.num_records(), 2);
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.get("s"), Some(&Value::String(long.into())));
    let two = db.get_by_key(&Value::Int32(2), None, false).unwrap().unwrap();
    assert_eq!(two.get("s"), Some(&Value::String("y".into())));

    db.clean().unwrap();
    assert_eq!(db.num_deleted(), 0);
    assert_eq!(db.num_records(), 2);
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.get("s"), Some(&Value::String(long.into())));
    let two = db.get_by_key(&Value::Int32(2), None, false).unwrap().unwrap();
    assert_eq!(two.get("s"), Some(&Value::String("y".into())));
}

#[test]
fn delete_then_add_reuses_tombstone_slot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reuse.hdb");
    let fields = vec![
        FieldDef::new("id", DataType::Int32).primary_key(),
        FieldDef::new("n", DataType::Int32),
    ];
    let mut db = Engine::create_file(&path, fields, None, DbConfig::new()).unwrap();
    for id in 1..=3 {
        db.add(&record(&[("id", id.into()), ("n", (id * 10).into())]))
            .unwrap();
    }
    db.flush().unwrap();
    let len_before = std::fs::metadata(&path).unwrap().len();

    assert!(db.delete_by_key(&Value::Int32(2)).unwrap());
    assert_eq!(db.num_deleted(), 1);

    // Same serialized size: first-fit must land in the tombstoned slot and
    // the file must not grow.
    db.add(&record(&[("id", 4.into()), ("n", 99.into())])).unwrap();
    assert_eq!(db.num_deleted(), 0);
    assert_eq!(db.num_records(), 3);
    db.flush().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);

    let four = db.get_by_key(&Value::Int32(4), None, false).unwrap().unwrap();
    assert_eq!(four.get("n"), Some(&Value::Int32(99)));
}

#[test]
fn duplicate_key_leaves_state_unchanged() {
    let mut db = Engine::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("n", DataType::Int32),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();
    db.add(&record(&[("id", 1.into()), ("n", 5.into())])).unwrap();

    let err = db
        .add(&record(&[("id", 1.into()), ("n", 6.into())]))
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicatePrimaryKey { .. }));

    assert_eq!(db.num_records(), 1);
    assert_eq!(db.num_deleted(), 0);
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.get("n"), Some(&Value::Int32(5)));
}

#[test]
fn select_where_filters_and_sorts() {
    let fields = vec![
        FieldDef::new("first", DataType::String),
        FieldDef::new("last", DataType::String),
        FieldDef::new("age", DataType::Int32),
    ];
    let mut db = Engine::create_memory(fields, None, DbConfig::new()).unwrap();
    for (first, last, age) in [("Ann", "Lee", 30), ("ann", "LEE", 25), ("Bob", "Smith", 40)] {
        db.add(&record(&[
            ("first", first.into()),
            ("last", last.into()),
            ("age", age.into()),
        ]))
        .unwrap();
    }

    let all = db
        .select_where(
            "(~first = 'ann' AND last ~= 'lee') OR age > 35",
            None,
            None,
            false,
        )
        .unwrap();
    assert_eq!(all.len(), 3);

    let exact = db.select_where("first = 'ann'", None, None, false).unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].get("age"), Some(&Value::Int32(25)));

    let sorted = db
        .select_all(Some(&["first", "age"]), Some(&["!age"]), true)
        .unwrap();
    assert_eq!(sorted[0].get("age"), Some(&Value::Int32(40)));
    assert!(sorted[0].get("last").is_none());
    assert!(sorted[0].get("index").is_some());
}

#[test]
fn update_where_and_delete_where() {
    let mut db = Engine::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("grp", DataType::String),
            FieldDef::new("hits", DataType::Int32),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();
    for (id, grp) in [(1, "a"), (2, "b"), (3, "a"), (4, "b")] {
        db.add(&record(&[
            ("id", id.into()),
            ("grp", grp.into()),
            ("hits", 0.into()),
        ]))
        .unwrap();
    }

    let updated = db
        .update_where("grp = 'a'", &record(&[("hits", 7.into())]))
        .unwrap();
    assert_eq!(updated, 2);
    let three = db.get_by_key(&Value::Int32(3), None, false).unwrap().unwrap();
    assert_eq!(three.get("hits"), Some(&Value::Int32(7)));
    // Partial update keeps untouched fields.
    assert_eq!(three.get("grp"), Some(&Value::String("a".into())));

    let deleted = db.delete_where("grp = 'b'").unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(db.num_records(), 2);
    assert_eq!(db.num_deleted(), 2);
}

#[test]
fn schema_evolution_add_rename_delete() {
    let mut db = Engine::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("a", DataType::Int32),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();
    db.add(&record(&[("id", 1.into()), ("a", 10.into())])).unwrap();
    db.add(&record(&[("id", 2.into()), ("a", 20.into())])).unwrap();

    db.add_fields(
        vec![FieldDef::new("b", DataType::String)],
        &[Some("x".into())],
    )
    .unwrap();
    assert_eq!(db.num_records(), 2);
    for id in [1, 2] {
        let rec = db
            .get_by_key(&Value::Int32(id), None, false)
            .unwrap()
            .unwrap();
        assert_eq!(rec.get("b"), Some(&Value::String("x".into())));
    }
    // Primary-key order survives the rewrite.
    let ids: Vec<i32> = db
        .select_all(None, None, false)
        .unwrap()
        .iter()
        .map(|r| r.get("id").unwrap().as_int32().unwrap())
        .collect();
    assert_eq!(ids, [1, 2]);

    db.rename_field("a", "aa").unwrap();
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.get("aa"), Some(&Value::Int32(10)));
    assert!(one.get("a").is_none());

    db.delete_fields(&["aa"]).unwrap();
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.len(), 2);
    assert_eq!(one.get("b"), Some(&Value::String("x".into())));
}

#[test]
fn schema_evolution_guards() {
    let mut db = Engine::create_memory(id_name_fields(), None, DbConfig::new()).unwrap();
    db.add(&record(&[("name", "a".into())])).unwrap();

    assert!(matches!(
        db.add_fields(vec![FieldDef::new("id2", DataType::Int32).primary_key()], &[]),
        Err(DbError::PrimaryKeyCannotBeAdded)
    ));
    assert!(matches!(
        db.add_fields(vec![FieldDef::new("name", DataType::Int32)], &[]),
        Err(DbError::FieldNameAlreadyExists { .. })
    ));
    assert!(matches!(
        db.delete_fields(&["id"]),
        Err(DbError::CannotDeletePrimaryKeyField { .. })
    ));
    assert!(matches!(
        db.rename_field("missing", "x"),
        Err(DbError::InvalidFieldName { .. })
    ));

    db.delete_by_key(&Value::Int32(1)).unwrap();
    assert!(matches!(
        db.add_fields(vec![FieldDef::new("c", DataType::Bool)], &[]),
        Err(DbError::CantAddOrRemoveFieldWithDeletedRecords)
    ));
}

#[test]
fn transaction_rollback_restores_exact_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txn.hdb");
    let mut db = Engine::create_file(&path, id_name_fields(), None, DbConfig::new()).unwrap();
    db.add(&record(&[("name", "before".into())])).unwrap();
    db.flush().unwrap();
    let before = std::fs::read(&path).unwrap();

    db.begin_trans().unwrap();
    assert!(matches!(
        db.begin_trans(),
        Err(DbError::TransactionAlreadyActive)
    ));
    db.add(&record(&[("name", "inside".into())])).unwrap();
    db.update_by_key(&Value::Int32(1), &record(&[("name", "mutated".into())]))
        .unwrap();
    db.rollback_trans().unwrap();
    db.flush().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(db.num_records(), 1);
    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(one.get("name"), Some(&Value::String("before".into())));

    db.begin_trans().unwrap();
    db.add(&record(&[("name", "kept".into())])).unwrap();
    db.commit_trans().unwrap();
    assert_eq!(db.num_records(), 2);

    assert!(matches!(
        db.commit_trans(),
        Err(DbError::NoCurrentTransaction)
    ));
    assert!(matches!(
        db.rollback_trans(),
        Err(DbError::NoCurrentTransaction)
    ));
}

/// Toy length-preserving cipher for engine-level tests; the real AES-GCM
/// implementation lives in the `halite` crate.
struct XorCipher(u8);

impl Cipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.iter().map(|b| b ^ self.0).collect()
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
    }
}

#[test]
fn encrypted_database_roundtrip_and_guards() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enc.hdb");
    let cipher: Arc<dyn Cipher> = Arc::new(XorCipher(0x5a));

    let fields = vec![
        FieldDef::new("id", DataType::Int32).primary_key(),
        FieldDef::new("s", DataType::String),
    ];
    let mut db =
        Engine::create_file(&path, fields, Some(Arc::clone(&cipher)), DbConfig::new()).unwrap();
    assert!(db.is_encrypted());
    db.add(&record(&[("id", 1.into()), ("s", "secret".into())]))
        .unwrap();
    db.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert!(
        !bytes.windows(6).any(|w| w == b"secret"),
        "plaintext leaked into the file"
    );

    let mut reopened =
        Engine::open_file(&path, Some(Arc::clone(&cipher)), DbConfig::new()).unwrap();
    let one = reopened
        .get_by_key(&Value::Int32(1), None, false)
        .unwrap()
        .unwrap();
    assert_eq!(one.get("s"), Some(&Value::String("secret".into())));

    // Update and clean keep working through the envelope.
    reopened
        .update_by_key(&Value::Int32(1), &record(&[("s", "rewritten longer".into())]))
        .unwrap();
    reopened.clean().unwrap();
    let one = reopened
        .get_by_key(&Value::Int32(1), None, false)
        .unwrap()
        .unwrap();
    assert_eq!(one.get("s"), Some(&Value::String("rewritten longer".into())));
    reopened.close().unwrap();

    assert!(matches!(
        Engine::open_file(&path, None, DbConfig::new()),
        Err(DbError::DbIsEncrypted)
    ));

    // And the inverse guard: a cipher against a plain database.
    let plain_path = dir.path().join("plain.hdb");
    Engine::create_file(&plain_path, id_name_fields(), None, DbConfig::new())
        .unwrap()
        .close()
        .unwrap();
    assert!(matches!(
        Engine::open_file(&plain_path, Some(cipher), DbConfig::new()),
        Err(DbError::CipherMismatch)
    ));
}

#[test]
fn read_only_open_blocks_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.hdb");
    let mut db = Engine::create_file(&path, id_name_fields(), None, DbConfig::new()).unwrap();
    db.add(&record(&[("name", "a".into())])).unwrap();
    db.close().unwrap();

    let mut ro = Engine::open_file(&path, None, DbConfig::new().with_read_only(true)).unwrap();
    assert!(ro.is_read_only());
    assert_eq!(ro.num_records(), 1);
    assert!(matches!(
        ro.add(&record(&[("name", "b".into())])),
        Err(DbError::DatabaseReadOnlyMode)
    ));
    assert!(matches!(ro.clean(), Err(DbError::DatabaseReadOnlyMode)));
}

/// Hand-assembles a minimal major-3 database image: one Int32 field, no
/// records. Major < 6 has no flags/reserved words; major >= 3 carries the
/// user_version float.
fn v3_image() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x0123_BABEu32.to_le_bytes());
    bytes.push(3); // major
    bytes.push(0); // minor
    bytes.extend_from_slice(&0u32.to_le_bytes()); // num_records
    bytes.extend_from_slice(&0u32.to_le_bytes()); // num_deleted
    let index_start_pos = bytes.len();
    bytes.extend_from_slice(&0u32.to_le_bytes()); // index_start (patched below)
    bytes.extend_from_slice(&0.0f32.to_le_bytes()); // user_version
    bytes.push(0); // pk name: empty string
    bytes.extend_from_slice(&1i32.to_le_bytes()); // field count
    bytes.push(1); // name length
    bytes.push(b'a');
    bytes.extend_from_slice(&2i16.to_le_bytes()); // Int32 type code
    bytes.extend_from_slice(&0i32.to_le_bytes()); // field flags
    bytes.push(0); // comment: empty string
    let data_start = bytes.len() as u32;
    bytes[index_start_pos..index_start_pos + 4].copy_from_slice(&data_start.to_le_bytes());
    bytes
}

#[test]
fn older_major_opens_read_only_until_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.hdb");
    std::fs::write(&path, v3_image()).unwrap();

    let mut db = Engine::open_file(&path, None, DbConfig::new()).unwrap();
    assert_eq!(db.version(), (3, 0));
    assert!(db.is_read_only());
    assert!(matches!(
        db.add(&record(&[("a", 1.into())])),
        Err(DbError::DatabaseReadOnlyMode)
    ));

    db.upgrade().unwrap();
    assert_eq!(db.version(), (6, 0));
    assert!(!db.is_read_only());
    db.add(&record(&[("a", 1.into())])).unwrap();
    assert_eq!(db.num_records(), 1);

    assert!(matches!(db.upgrade(), Err(DbError::SchemaAlreadyUpToDate)));
}

#[test]
fn user_data_roundtrip_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.hdb");
    let mut db = Engine::create_file(&path, id_name_fields(), None, DbConfig::new()).unwrap();
    db.add(&record(&[("name", "x".into())])).unwrap();

    assert!(matches!(
        db.set_user_data(Some(Value::Int32(1))),
        Err(DbError::InvalidMetaDataType)
    ));
    db.set_user_data(Some(Value::String("settings".into())))
        .unwrap();
    db.set_user_version(2.5).unwrap();
    db.close().unwrap();

    let mut db = Engine::open_file(&path, None, DbConfig::new()).unwrap();
    assert_eq!(db.user_data(), Some(&Value::String("settings".into())));
    assert_eq!(db.user_version(), 2.5);

    // The blob survives mutations and compaction.
    db.add(&record(&[("name", "y".into())])).unwrap();
    db.delete_by_index(0).unwrap();
    db.clean().unwrap();
    assert_eq!(db.user_data(), Some(&Value::String("settings".into())));

    db.set_user_data(Some(Value::byte_array(vec![1u8, 2, 3]))).unwrap();
    db.close().unwrap();
    let db = Engine::open_file(&path, None, DbConfig::new()).unwrap();
    assert_eq!(db.user_data(), Some(&Value::byte_array(vec![1u8, 2, 3])));
}

#[test]
fn auto_clean_triggers_past_threshold() {
    let mut db = Engine::create_memory(
        id_name_fields(),
        None,
        DbConfig::new().with_auto_clean(1),
    )
    .unwrap();
    for name in ["a", "b", "c", "d"] {
        db.add(&record(&[("name", name.into())])).unwrap();
    }

    db.delete_by_index(0).unwrap();
    assert_eq!(db.num_deleted(), 1); // at threshold, not past it

    db.delete_by_index(0).unwrap(); // second tombstone trips the clean
    assert_eq!(db.num_deleted(), 0);
    assert_eq!(db.num_records(), 2);
}

#[test]
fn keyless_table_keeps_insertion_order() {
    let mut db = Engine::create_memory(
        vec![FieldDef::new("n", DataType::Int32)],
        None,
        DbConfig::new(),
    )
    .unwrap();
    for n in [30, 10, 20] {
        db.add(&record(&[("n", n.into())])).unwrap();
    }

    let values: Vec<i32> = db
        .select_all(None, None, false)
        .unwrap()
        .iter()
        .map(|r| r.get("n").unwrap().as_int32().unwrap())
        .collect();
    assert_eq!(values, [30, 10, 20]);

    assert!(matches!(
        db.get_by_key(&Value::Int32(10), None, false),
        Err(DbError::MissingPrimaryKey)
    ));
}

#[test]
fn array_fields_roundtrip_null_and_empty() {
    let mut db = Engine::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::array("scores", DataType::Int32),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();

    db.add(&record(&[
        ("id", 1.into()),
        ("scores", Value::Array(ArrayValue::Int32(vec![5, 6, 7]))),
    ]))
    .unwrap();
    db.add(&record(&[
        ("id", 2.into()),
        ("scores", Value::Array(ArrayValue::Int32(vec![]))),
    ]))
    .unwrap();
    db.add(&record(&[("id", 3.into())])).unwrap();

    let one = db.get_by_key(&Value::Int32(1), None, false).unwrap().unwrap();
    assert_eq!(
        one.get("scores"),
        Some(&Value::Array(ArrayValue::Int32(vec![5, 6, 7])))
    );
    let two = db.get_by_key(&Value::Int32(2), None, false).unwrap().unwrap();
    assert_eq!(
        two.get("scores"),
        Some(&Value::Array(ArrayValue::Int32(vec![])))
    );
    let three = db.get_by_key(&Value::Int32(3), None, false).unwrap().unwrap();
    assert_eq!(three.get("scores"), Some(&Value::Null));

    // Scalars are rejected for array fields.
    let err = db
        .add(&record(&[("id", 4.into()), ("scores", 9.into())]))
        .unwrap_err();
    assert!(matches!(err, DbError::Type(_)));
}

#[test]
fn delete_all_then_reuse() {
    let mut db = Engine::create_memory(id_name_fields(), None, DbConfig::new()).unwrap();
    for name in ["a", "b", "c"] {
        db.add(&record(&[("name", name.into())])).unwrap();
    }

    assert_eq!(db.delete_all().unwrap(), 3);
    assert_eq!(db.num_records(), 0);
    assert_eq!(db.num_deleted(), 3);

    // New adds first-fit into the tombstoned slots.
    db.add(&record(&[("name", "d".into())])).unwrap();
    assert_eq!(db.num_records(), 1);
    assert_eq!(db.num_deleted(), 2);
}

#[test]
fn reindex_rebuilds_consistent_state() {
    let mut db = Engine::create_memory(id_name_fields(), None, DbConfig::new()).unwrap();
    for name in ["a", "b", "c"] {
        db.add(&record(&[("name", name.into())])).unwrap();
    }
    db.delete_by_key(&Value::Int32(2)).unwrap();

    db.reindex().unwrap();
    assert_eq!(db.num_records(), 2);
    assert_eq!(db.num_deleted(), 1);
    let ids: Vec<i32> = db
        .select_all(None, None, false)
        .unwrap()
        .iter()
        .map(|r| r.get("id").unwrap().as_int32().unwrap())
        .collect();
    assert_eq!(ids, [1, 3]);
}

#[test]
fn updating_key_resorts_index() {
    let mut db = Engine::create_memory(
        vec![
            FieldDef::new("id", DataType::Int32).primary_key(),
            FieldDef::new("name", DataType::String),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();
    for (id, name) in [(1, "one"), (5, "five"), (9, "nine")] {
        db.add(&record(&[("id", id.into()), ("name", name.into())]))
            .unwrap();
    }

    db.update_by_key(&Value::Int32(1), &record(&[("id", 7.into())]))
        .unwrap();
    let ids: Vec<i32> = db
        .select_all(None, None, false)
        .unwrap()
        .iter()
        .map(|r| r.get("id").unwrap().as_int32().unwrap())
        .collect();
    assert_eq!(ids, [5, 7, 9]);
    let seven = db.get_by_key(&Value::Int32(7), None, false).unwrap().unwrap();
    assert_eq!(seven.get("name"), Some(&Value::String("one".into())));

    // Updating onto an existing key is a duplicate.
    assert!(matches!(
        db.update_by_key(&Value::Int32(5), &record(&[("id", 9.into())])),
        Err(DbError::DuplicatePrimaryKey { .. })
    ));
}

#[test]
fn string_primary_keys_sort_and_search() {
    let mut db = Engine::create_memory(
        vec![
            FieldDef::new("code", DataType::String).primary_key(),
            FieldDef::new("n", DataType::Int32),
        ],
        None,
        DbConfig::new(),
    )
    .unwrap();
    for code in ["delta", "alpha", "charlie", "bravo"] {
        db.add(&record(&[("code", code.into()), ("n", 1.into())]))
            .unwrap();
    }

    let codes: Vec<String> = db
        .select_all(None, None, false)
        .unwrap()
        .iter()
        .map(|r| r.get("code").unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(codes, ["alpha", "bravo", "charlie", "delta"]);

    let found = db
        .get_by_key(&Value::String("charlie".into()), None, false)
        .unwrap()
        .unwrap();
    assert_eq!(found.get("n"), Some(&Value::Int32(1)));
}

#[test]
fn persisted_counters_match_reloaded_arrays() {
    // Mutate a file-backed database, then reopen its bytes as a memory
    // image: the persisted counters must reproduce the live/free arrays.
    let image = {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.hdb");
        let mut fdb = Engine::create_file(&path, id_name_fields(), None, DbConfig::new()).unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            fdb.add(&record(&[("name", name.into())])).unwrap();
        }
        fdb.delete_by_index(1).unwrap();
        fdb.update_by_key(
            &Value::Int32(1),
            &record(&[("name", "a much longer name than before".into())]),
        )
        .unwrap();
        fdb.close().unwrap();
        std::fs::read(&path).unwrap()
    };

    let mut reopened = Engine::open(
        Box::new(MemoryBacking::from_bytes(image)),
        None,
        DbConfig::new(),
    )
    .unwrap();
    // 5 adds, 1 delete, 1 relocating update: 4 live, 2 tombstones.
    assert_eq!(reopened.num_records(), 4);
    assert_eq!(reopened.num_deleted(), 2);
    let one = reopened
        .get_by_key(&Value::Int32(1), None, false)
        .unwrap()
        .unwrap();
    assert_eq!(
        one.get("name"),
        Some(&Value::String("a much longer name than before".into()))
    );
}

#[test]
fn open_missing_file_and_bad_signature() {
    assert!(matches!(
        Engine::open_file("/no/such/halite.hdb", None, DbConfig::new()),
        Err(DbError::DatabaseFileNotFound { .. })
    ));
    assert!(matches!(
        Engine::open_file("", None, DbConfig::new()),
        Err(DbError::EmptyFilename)
    ));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.bin");
    std::fs::write(&path, b"not a database at all").unwrap();
    assert!(matches!(
        Engine::open_file(&path, None, DbConfig::new()),
        Err(DbError::InvalidSignature { .. })
    ));

    let file = FileBacking::open(&path, true).unwrap();
    assert!(!file.writable());
}
