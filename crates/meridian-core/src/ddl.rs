//! The replicable DDL model.
//!
//! Parsing SQL is out of scope for this crate; statements arrive already
//! shaped as [`DdlStatement`] values and travel through the replication log
//! as canonical JSON. The authoritative catalog stores one
//! [`TableDefinition`] per object, canonicalized so that every replica can
//! rebind it locally:
//!
//! - the object's UUID is baked in,
//! - the table name is replaced with a sentinel placeholder,
//! - the database name is cleared (each replica binds its local name).
//!
//! Canonical text is sorted-key JSON, so byte equality of two definitions is
//! meaningful and stable across processes.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Sentinel stored in place of the table name inside group metadata.
pub const TABLE_NAME_PLACEHOLDER: &str = "_";

// ============================================================================
// Object definitions
// ============================================================================

/// A single column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Data type, kept as the engine's textual type name.
    pub data_type: String,
    /// Optional default expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    /// Optional column comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// Creates a column with just a name and a type.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            default_expression: None,
            comment: None,
        }
    }
}

/// The storage engine backing an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TableEngine {
    /// Local merge-tree storage.
    MergeTree,
    /// Merge-tree storage replicated at the table level; divergent metadata
    /// for the same UUID reconciles through storage-level replication.
    ReplicatedMergeTree {
        /// Coordination path of the table-level replication.
        path: String,
        /// Replica name within the table-level replication.
        replica: String,
    },
    /// Purely in-memory storage; nothing survives a restart.
    Memory,
    /// A dictionary definition; contents are loaded from its source.
    Dictionary,
}

impl TableEngine {
    /// Whether dropping the object risks losing on-disk data.
    #[must_use]
    pub fn persists_data(&self) -> bool {
        matches!(self, Self::MergeTree | Self::ReplicatedMergeTree { .. })
    }

    /// Whether the engine belongs to the replicated merge-tree family.
    #[must_use]
    pub fn is_replicated_family(&self) -> bool {
        matches!(self, Self::ReplicatedMergeTree { .. })
    }
}

/// The canonical definition of a table or dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Database the object belongs to; empty in the stored canonical form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Object name; [`TABLE_NAME_PLACEHOLDER`] in the stored canonical form.
    pub table: String,
    /// Object UUID; always present in the stored canonical form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// Storage engine.
    pub engine: TableEngine,
    /// Column list.
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    /// Sorting key column names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<String>,
    /// Table-level TTL expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// Whether this definition attaches existing data instead of creating.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attach: bool,
}

impl TableDefinition {
    /// Creates a minimal definition with the given name and engine.
    #[must_use]
    pub fn new(table: impl Into<String>, engine: TableEngine) -> Self {
        Self {
            database: None,
            table: table.into(),
            uuid: None,
            engine,
            columns: Vec::new(),
            order_by: Vec::new(),
            ttl: None,
            attach: false,
        }
    }

    /// Returns whether this definition describes a dictionary.
    #[must_use]
    pub fn is_dictionary(&self) -> bool {
        matches!(self.engine, TableEngine::Dictionary)
    }

    /// Produces the form stored in the group's authoritative catalog:
    /// UUID baked in, table name replaced with the placeholder, database
    /// cleared, attach flag dropped.
    ///
    /// # Errors
    ///
    /// Returns a logical error if the definition has no UUID; a definition
    /// must have its identity assigned before it can be published.
    pub fn canonical_for_group(&self) -> Result<Self> {
        if self.uuid.is_none() {
            return Err(Error::logical(format!(
                "definition of {:?} has no uuid and cannot be published",
                self.table
            )));
        }
        let mut canonical = self.clone();
        canonical.database = None;
        canonical.table = TABLE_NAME_PLACEHOLDER.to_string();
        canonical.attach = false;
        Ok(canonical)
    }

    /// Rebinds a stored canonical definition to a local database and table
    /// name, clearing the attach flag.
    ///
    /// # Errors
    ///
    /// Returns a logical error if the stored form is not canonical (missing
    /// UUID, table name not the placeholder, or database set).
    pub fn rebind(mut self, database: &str, table: &str) -> Result<Self> {
        if self.uuid.is_none() || self.table != TABLE_NAME_PLACEHOLDER || self.database.is_some() {
            return Err(Error::logical(format!(
                "stored definition for {table:?} is not in canonical form"
            )));
        }
        self.database = Some(database.to_string());
        self.table = table.to_string();
        self.attach = false;
        Ok(self)
    }

    /// Renders the definition as canonical (sorted-key) JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if JSON encoding fails.
    pub fn to_canonical_text(&self) -> Result<String> {
        to_canonical_json(self)
    }

    /// Parses a definition from its canonical text. Unknown fields are
    /// ignored for forward compatibility.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the text is not a valid definition.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies a schema alteration in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the command references a missing column, would
    /// duplicate an existing one, or is not a schema alteration at all.
    pub fn apply(&mut self, command: &AlterCommand) -> Result<()> {
        match command {
            AlterCommand::AddColumn { column, after } => {
                if self.column_index(&column.name).is_some() {
                    return Err(Error::invalid_name(format!(
                        "column {:?} already exists in {:?}",
                        column.name, self.table
                    )));
                }
                match after {
                    Some(anchor) => {
                        let idx = self.column_index(anchor).ok_or_else(|| {
                            Error::invalid_name(format!(
                                "column {anchor:?} not found in {:?}",
                                self.table
                            ))
                        })?;
                        self.columns.insert(idx + 1, column.clone());
                    }
                    None => self.columns.push(column.clone()),
                }
            }
            AlterCommand::DropColumn { name } => {
                let idx = self.require_column(name)?;
                self.columns.remove(idx);
            }
            AlterCommand::ModifyColumn { column } => {
                let idx = self.require_column(&column.name)?;
                self.columns[idx] = column.clone();
            }
            AlterCommand::RenameColumn { from, to } => {
                if self.column_index(to).is_some() {
                    return Err(Error::invalid_name(format!(
                        "column {to:?} already exists in {:?}",
                        self.table
                    )));
                }
                let idx = self.require_column(from)?;
                self.columns[idx].name.clone_from(to);
                for key in &mut self.order_by {
                    if key == from {
                        key.clone_from(to);
                    }
                }
            }
            AlterCommand::CommentColumn { name, comment } => {
                let idx = self.require_column(name)?;
                self.columns[idx].comment = Some(comment.clone());
            }
            AlterCommand::ModifyTtl { ttl } => {
                self.ttl = Some(ttl.clone());
            }
            other => {
                return Err(Error::logical(format!(
                    "{} mutates data and cannot be applied to a definition",
                    other.describe()
                )));
            }
        }
        Ok(())
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            Error::invalid_name(format!("column {name:?} not found in {:?}", self.table))
        })
    }
}

// ============================================================================
// Statements
// ============================================================================

/// An alteration of a table.
///
/// Only schema alterations replicate through the schema log; commands that
/// manipulate physical data are listed so callers can reject them precisely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlterCommand {
    /// Add a column, optionally after an existing one.
    AddColumn {
        /// The column to add.
        column: ColumnDefinition,
        /// Place the new column after this one; append when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
    },
    /// Drop a column.
    DropColumn {
        /// Name of the column to drop.
        name: String,
    },
    /// Replace a column definition.
    ModifyColumn {
        /// The new definition; matched to the old one by name.
        column: ColumnDefinition,
    },
    /// Rename a column.
    RenameColumn {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Set a column comment.
    CommentColumn {
        /// Name of the column.
        name: String,
        /// The comment text.
        comment: String,
    },
    /// Replace the table-level TTL expression.
    ModifyTtl {
        /// The new TTL expression.
        ttl: String,
    },
    /// Delete rows matching a predicate (data manipulation).
    DeleteWhere {
        /// Row predicate.
        predicate: String,
    },
    /// Update rows matching a predicate (data manipulation).
    UpdateWhere {
        /// Row predicate.
        predicate: String,
    },
    /// Drop a partition (data manipulation).
    DropPartition {
        /// Partition expression.
        partition: String,
    },
    /// Attach a detached partition (data manipulation).
    AttachPartition {
        /// Partition expression.
        partition: String,
    },
}

impl AlterCommand {
    /// Whether the command only alters schema or TTL, which is the subset a
    /// replicated group accepts.
    #[must_use]
    pub fn is_schema_alteration(&self) -> bool {
        matches!(
            self,
            Self::AddColumn { .. }
                | Self::DropColumn { .. }
                | Self::ModifyColumn { .. }
                | Self::RenameColumn { .. }
                | Self::CommentColumn { .. }
                | Self::ModifyTtl { .. }
        )
    }

    /// A short human-readable name for error messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AddColumn { .. } => "ADD COLUMN",
            Self::DropColumn { .. } => "DROP COLUMN",
            Self::ModifyColumn { .. } => "MODIFY COLUMN",
            Self::RenameColumn { .. } => "RENAME COLUMN",
            Self::CommentColumn { .. } => "COMMENT COLUMN",
            Self::ModifyTtl { .. } => "MODIFY TTL",
            Self::DeleteWhere { .. } => "DELETE WHERE",
            Self::UpdateWhere { .. } => "UPDATE WHERE",
            Self::DropPartition { .. } => "DROP PARTITION",
            Self::AttachPartition { .. } => "ATTACH PARTITION",
        }
    }
}

/// A schema-modifying statement, the unit carried by the replication log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum DdlStatement {
    /// Create a table.
    CreateTable {
        /// The full definition of the table.
        definition: TableDefinition,
    },
    /// Drop a table.
    DropTable {
        /// Database qualifier; stripped before the statement is logged.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        /// Table to drop.
        table: String,
    },
    /// Rename a table, optionally exchanging two names atomically.
    RenameTable {
        /// Database qualifier; stripped before the statement is logged.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        /// Current table name.
        from: String,
        /// Database qualifier of the destination, when the caller wrote one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_database: Option<String>,
        /// New table name.
        to: String,
        /// Exchange the two names instead of a one-way rename.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        exchange: bool,
    },
    /// Alter a table's schema.
    AlterTable {
        /// Database qualifier; stripped before the statement is logged.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        /// Table to alter.
        table: String,
        /// Commands to apply, in order.
        commands: Vec<AlterCommand>,
    },
    /// Create a dictionary.
    CreateDictionary {
        /// The full definition of the dictionary.
        definition: TableDefinition,
    },
    /// Drop a dictionary.
    DropDictionary {
        /// Database qualifier; stripped before the statement is logged.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        /// Dictionary to drop.
        name: String,
    },
    /// Detach a table permanently (it will not reattach on restart).
    DetachTablePermanently {
        /// Database qualifier; stripped before the statement is logged.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        /// Table to detach.
        table: String,
    },
}

impl DdlStatement {
    /// Removes any embedded database name so the receiving replica binds the
    /// statement to its local database.
    pub fn strip_database(&mut self) {
        match self {
            Self::CreateTable { definition } | Self::CreateDictionary { definition } => {
                definition.database = None;
            }
            Self::RenameTable {
                database,
                to_database,
                ..
            } => {
                *database = None;
                *to_database = None;
            }
            Self::DropTable { database, .. }
            | Self::AlterTable { database, .. }
            | Self::DropDictionary { database, .. }
            | Self::DetachTablePermanently { database, .. } => {
                *database = None;
            }
        }
    }

    /// Serializes the statement to its wire text (canonical JSON).
    ///
    /// # Errors
    ///
    /// Returns a serialization error if JSON encoding fails.
    pub fn to_wire(&self) -> Result<String> {
        to_canonical_json(self)
    }

    /// Parses a statement from wire text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the text is not a valid statement.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl fmt::Display for DdlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { definition } => write!(f, "CREATE TABLE {}", definition.table),
            Self::DropTable { table, .. } => write!(f, "DROP TABLE {table}"),
            Self::RenameTable {
                from, to, exchange, ..
            } => {
                if *exchange {
                    write!(f, "EXCHANGE TABLES {from} AND {to}")
                } else {
                    write!(f, "RENAME TABLE {from} TO {to}")
                }
            }
            Self::AlterTable {
                table, commands, ..
            } => write!(f, "ALTER TABLE {table} ({} commands)", commands.len()),
            Self::CreateDictionary { definition } => {
                write!(f, "CREATE DICTIONARY {}", definition.table)
            }
            Self::DropDictionary { name, .. } => write!(f, "DROP DICTIONARY {name}"),
            Self::DetachTablePermanently { table, .. } => {
                write!(f, "DETACH TABLE {table} PERMANENTLY")
            }
        }
    }
}

/// Serializes a value as canonical JSON: object keys sorted, no extra
/// whitespace. Sorting falls out of `serde_json`'s default map representation
/// once the value passes through `serde_json::Value`.
fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> TableDefinition {
        let mut def = TableDefinition::new("events", TableEngine::MergeTree);
        def.columns.push(ColumnDefinition::new("id", "UInt64"));
        def.columns.push(ColumnDefinition::new("ts", "DateTime"));
        def.order_by = vec!["id".into()];
        def
    }

    #[test]
    fn canonical_form_bakes_uuid_and_placeholder() {
        let mut def = sample_definition();
        def.database = Some("analytics".into());
        def.uuid = Some(Uuid::new_v4());

        let canonical = def.canonical_for_group().unwrap();
        assert_eq!(canonical.table, TABLE_NAME_PLACEHOLDER);
        assert!(canonical.database.is_none());
        assert_eq!(canonical.uuid, def.uuid);
    }

    #[test]
    fn canonical_form_requires_uuid() {
        assert!(sample_definition().canonical_for_group().is_err());
    }

    #[test]
    fn rebind_restores_local_names() {
        let mut def = sample_definition();
        def.uuid = Some(Uuid::new_v4());
        let stored = def.canonical_for_group().unwrap();
        let text = stored.to_canonical_text().unwrap();

        let rebound = TableDefinition::parse(&text)
            .unwrap()
            .rebind("analytics", "events")
            .unwrap();
        assert_eq!(rebound.database.as_deref(), Some("analytics"));
        assert_eq!(rebound.table, "events");
        assert!(!rebound.attach);
        assert_eq!(rebound.columns, def.columns);
    }

    #[test]
    fn rebind_rejects_non_canonical_input() {
        let mut def = sample_definition();
        def.uuid = Some(Uuid::new_v4());
        // Table name was never replaced with the placeholder.
        assert!(def.clone().rebind("db", "events").is_err());
    }

    #[test]
    fn canonical_text_is_deterministic() {
        let mut def = sample_definition();
        def.uuid = Some(Uuid::new_v4());
        let a = def.to_canonical_text().unwrap();
        let b = TableDefinition::parse(&a).unwrap().to_canonical_text().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn alter_add_and_drop_column() {
        let mut def = sample_definition();
        def.apply(&AlterCommand::AddColumn {
            column: ColumnDefinition::new("value", "Float64"),
            after: Some("id".into()),
        })
        .unwrap();
        assert_eq!(def.columns[1].name, "value");

        def.apply(&AlterCommand::DropColumn { name: "ts".into() }).unwrap();
        assert!(def.columns.iter().all(|c| c.name != "ts"));

        // Duplicates and unknown columns are rejected.
        assert!(def
            .apply(&AlterCommand::AddColumn {
                column: ColumnDefinition::new("id", "UInt64"),
                after: None,
            })
            .is_err());
        assert!(def.apply(&AlterCommand::DropColumn { name: "nope".into() }).is_err());
    }

    #[test]
    fn alter_rename_updates_sorting_key() {
        let mut def = sample_definition();
        def.apply(&AlterCommand::RenameColumn {
            from: "id".into(),
            to: "event_id".into(),
        })
        .unwrap();
        assert_eq!(def.order_by, vec!["event_id".to_string()]);
    }

    #[test]
    fn data_manipulation_commands_are_not_schema_alterations() {
        let delete = AlterCommand::DeleteWhere {
            predicate: "ts < now()".into(),
        };
        assert!(!delete.is_schema_alteration());
        assert!(sample_definition().apply(&delete).is_err());

        let add = AlterCommand::AddColumn {
            column: ColumnDefinition::new("x", "UInt8"),
            after: None,
        };
        assert!(add.is_schema_alteration());
    }

    #[test]
    fn statement_wire_roundtrip() {
        let mut def = sample_definition();
        def.uuid = Some(Uuid::new_v4());
        let statement = DdlStatement::CreateTable { definition: def };

        let wire = statement.to_wire().unwrap();
        let parsed = DdlStatement::parse(&wire).unwrap();
        assert_eq!(parsed, statement);
    }

    #[test]
    fn strip_database_clears_every_variant() {
        let mut statements = vec![
            DdlStatement::DropTable {
                database: Some("db".into()),
                table: "t".into(),
            },
            DdlStatement::RenameTable {
                database: Some("db".into()),
                from: "a".into(),
                to_database: Some("db".into()),
                to: "b".into(),
                exchange: false,
            },
            DdlStatement::CreateTable {
                definition: {
                    let mut d = sample_definition();
                    d.database = Some("db".into());
                    d
                },
            },
        ];
        for statement in &mut statements {
            statement.strip_database();
            let wire = statement.to_wire().unwrap();
            assert!(!wire.contains("\"db\""), "database survived in {wire}");
        }
    }
}
