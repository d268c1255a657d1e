//! Compaction and schema evolution.
//!
//! All five entry points share one rewrite pass:
//!
//! 1. Write a current-version header + (possibly new) schema to an empty
//!    staging image.
//! 2. Copy each live record in index order, skipping tombstones. With an
//!    unchanged record layout the stored bytes are copied verbatim
//!    (ciphertext included); a changed layout decodes, projects/extends,
//!    and re-encodes each record.
//! 3. Write the new counters, live index, empty free-list, and user blob.
//! 4. Swap the staging image in as the primary contents and reload.
//!
//! A failure before the swap leaves the open database untouched: counters,
//! index_start, and the backing bytes are only replaced at the end.

use halite_types::{DataType, FieldDef, Schema, Value};

use crate::backing::{Backing, MemoryBacking};
use crate::engine::Engine;
use crate::error::DbError;
use crate::header::{Header, MAJOR_VERSION, MINOR_VERSION, write_counters, write_full_header};
use crate::index::{FreeList, LiveIndex, write_tail};
use crate::record::{encode_payload, read_frame, read_raw, seal_payload, write_frame};

/// How record bytes move into the staging image.
enum Transform {
    /// Stored bytes are copied as-is (layout unchanged).
    Verbatim,
    /// Decode with the old schema, rebuild for the new one.
    ///
    /// `source[i]` is the old ordinal feeding new ordinal `i`; `None` takes
    /// `defaults[i]` instead.
    Reencode {
        source: Vec<Option<usize>>,
        defaults: Vec<Value>,
    },
}

impl Engine {
    /// Rewrites the file without tombstones.
    ///
    /// Record count, decoded values, and primary-key order are preserved;
    /// `num_deleted` drops to zero.
    pub fn clean(&mut self) -> Result<(), DbError> {
        self.ensure_writable()?;
        if self.free.is_empty() {
            return Ok(());
        }
        let reclaimed = self.free.len();
        self.rewrite(self.schema.clone(), &Transform::Verbatim)?;
        tracing::info!(reclaimed, "cleaned database");
        Ok(())
    }

    /// Rewrites an older-format file at the current version.
    ///
    /// This is the only mutation allowed on a database opened from an older
    /// major version; afterwards the handle is fully writable.
    pub fn upgrade(&mut self) -> Result<(), DbError> {
        if (self.header.major, self.header.minor) == (MAJOR_VERSION, MINOR_VERSION) {
            return Err(DbError::SchemaAlreadyUpToDate);
        }
        // Deliberately not `ensure_writable`: upgrade is the path out of
        // the version-read-only state.
        if self.config.read_only || !self.backing.writable() {
            return Err(DbError::DatabaseReadOnlyMode);
        }
        let from = (self.header.major, self.header.minor);
        self.rewrite(self.schema.clone(), &Transform::Verbatim)?;
        tracing::info!(?from, "upgraded database format");
        Ok(())
    }

    /// Appends new fields to the schema, filling existing records with the
    /// given defaults (`None` means null).
    pub fn add_fields(
        &mut self,
        fields: Vec<FieldDef>,
        defaults: &[Option<Value>],
    ) -> Result<(), DbError> {
        self.ensure_writable()?;
        if !self.free.is_empty() {
            return Err(DbError::CantAddOrRemoveFieldWithDeletedRecords);
        }
        if fields.is_empty() {
            return Err(DbError::FieldListIsEmpty);
        }

        let old_len = self.schema.len();
        let mut new_fields: Vec<FieldDef> = self.schema.fields().to_vec();
        let mut field_defaults = Vec::with_capacity(fields.len());
        for (i, mut field) in fields.into_iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(DbError::FieldNameIsEmpty);
            }
            if new_fields.iter().any(|f| f.is_named(&field.name)) {
                return Err(DbError::FieldNameAlreadyExists {
                    name: field.name.clone(),
                });
            }
            if field.primary_key {
                return Err(DbError::PrimaryKeyCannotBeAdded);
            }
            if field.is_autoinc() && (field.data_type != DataType::Int32 || field.array) {
                return Err(DbError::InvalidTypeInSchema {
                    field: field.name.clone(),
                    reason: "autoincrement requires a non-array Int32 field".into(),
                });
            }
            if field.autoinc_current.is_none() {
                field.autoinc_current = field.autoinc_start;
            }
            field.ordinal = new_fields.len();

            let default = match defaults.get(i).cloned().flatten() {
                Some(value) => self.convert_for_field(&field, &value)?,
                None => Value::Null,
            };
            field_defaults.push(default);
            new_fields.push(field);
        }

        let added = new_fields.len() - old_len;
        let source: Vec<Option<usize>> = (0..new_fields.len())
            .map(|i| (i < old_len).then_some(i))
            .collect();
        let mut defaults_by_ordinal = vec![Value::Null; old_len];
        defaults_by_ordinal.extend(field_defaults);

        self.rewrite(
            Schema::new(new_fields),
            &Transform::Reencode {
                source,
                defaults: defaults_by_ordinal,
            },
        )?;
        tracing::info!(added, "added fields");
        Ok(())
    }

    /// Removes fields from the schema and every record.
    pub fn delete_fields(&mut self, names: &[&str]) -> Result<(), DbError> {
        self.ensure_writable()?;
        if !self.free.is_empty() {
            return Err(DbError::CantAddOrRemoveFieldWithDeletedRecords);
        }
        if names.is_empty() {
            return Err(DbError::FieldListIsEmpty);
        }

        let mut drop_ordinals = Vec::with_capacity(names.len());
        for name in names {
            let ordinal =
                self.schema
                    .ordinal_of(name)
                    .ok_or_else(|| DbError::InvalidFieldName {
                        name: (*name).to_string(),
                    })?;
            if self.schema.fields()[ordinal].primary_key {
                return Err(DbError::CannotDeletePrimaryKeyField {
                    name: (*name).to_string(),
                });
            }
            drop_ordinals.push(ordinal);
        }

        let mut new_fields = Vec::new();
        let mut source = Vec::new();
        for (ordinal, field) in self.schema.fields().iter().enumerate() {
            if drop_ordinals.contains(&ordinal) {
                continue;
            }
            let mut kept = field.clone();
            kept.ordinal = new_fields.len();
            new_fields.push(kept);
            source.push(Some(ordinal));
        }
        if new_fields.is_empty() {
            return Err(DbError::FieldListIsEmpty);
        }

        let defaults = vec![Value::Null; new_fields.len()];
        self.rewrite(
            Schema::new(new_fields),
            &Transform::Reencode { source, defaults },
        )?;
        tracing::info!(dropped = names.len(), "deleted fields");
        Ok(())
    }

    /// Renames a field; record bytes are unchanged.
    pub fn rename_field(&mut self, old: &str, new: &str) -> Result<(), DbError> {
        self.ensure_writable()?;
        let ordinal = self
            .schema
            .ordinal_of(old)
            .ok_or_else(|| DbError::InvalidFieldName {
                name: old.to_string(),
            })?;
        if new.trim().is_empty() {
            return Err(DbError::FieldNameIsEmpty);
        }
        if !old.eq_ignore_ascii_case(new) && self.schema.field(new).is_some() {
            return Err(DbError::FieldNameAlreadyExists {
                name: new.to_string(),
            });
        }

        let mut new_fields = self.schema.fields().to_vec();
        new.clone_into(&mut new_fields[ordinal].name);
        self.rewrite(Schema::new(new_fields), &Transform::Verbatim)?;
        tracing::info!(old, new, "renamed field");
        Ok(())
    }

    /// The shared rewrite pass; see the module docs.
    fn rewrite(&mut self, new_schema: Schema, transform: &Transform) -> Result<(), DbError> {
        let mut staging = MemoryBacking::new();
        let mut hdr = Header {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            encrypted: self.header.encrypted,
            num_records: self.live.len() as u32,
            num_deleted: 0,
            index_start: 0,
            user_version: self.header.user_version,
        };
        let layout = write_full_header(&mut staging, &hdr, &new_schema)?;

        let mut pos = layout.data_start;
        let mut new_offsets = Vec::with_capacity(self.live.len());
        let offsets: Vec<u32> = self.live.iter().collect();
        for offset in offsets {
            let sealed = match transform {
                Transform::Verbatim => {
                    let (size, raw) = read_raw(self.backing.as_mut(), u64::from(offset))?;
                    if size < 0 {
                        return Err(DbError::corrupted(
                            "live index references a tombstone",
                        ));
                    }
                    raw
                }
                Transform::Reencode { source, defaults } => {
                    let frame = read_frame(
                        self.backing.as_mut(),
                        u64::from(offset),
                        &self.schema,
                        self.cipher.as_deref(),
                    )?;
                    if frame.tombstone {
                        return Err(DbError::corrupted(
                            "live index references a tombstone",
                        ));
                    }
                    let values: Vec<Value> = source
                        .iter()
                        .enumerate()
                        .map(|(new_ordinal, old_ordinal)| match old_ordinal {
                            Some(old) => frame.values[*old].clone(),
                            None => defaults[new_ordinal].clone(),
                        })
                        .collect();
                    let payload = encode_payload(&new_schema, &values)?;
                    seal_payload(payload, self.cipher.as_deref())
                }
            };
            write_frame(&mut staging, pos, &sealed)?;
            new_offsets.push(pos as u32);
            pos += 4 + sealed.len() as u64;
        }

        hdr.index_start = pos as u32;
        write_counters(&mut staging, &layout, &hdr)?;
        write_tail(
            &mut staging,
            hdr.index_start,
            &LiveIndex::from_offsets(new_offsets),
            &FreeList::new(),
            self.user_data.as_ref(),
        )?;

        // Swap: the open database changes only if everything above worked.
        let image = staging.into_bytes();
        self.backing.replace_all(&image)?;
        self.reload_state()?;
        self.backing.flush()?;

        debug_assert_eq!(self.header.num_deleted, 0);
        debug_assert_eq!(self.header.num_records as usize, self.live.len());
        Ok(())
    }
}
