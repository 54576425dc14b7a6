//! Hand-registered table descriptors.
//!
//! Each persisted entity type is described once: its table, column list (in
//! row order), and foreign keys. Many-to-many links are described by
//! [`JunctionSchema`]. The bulk engine never inspects the database catalog;
//! everything it needs to order writes and resolve link tables lives here.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoralError, Result};

/// Every entity type the bulk engine knows how to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// A registered library root.
    Library,
    Artist,
    /// An artist credited in one role (main, guest, remixer).
    ArtistWithRole,
    RecordLabel,
    Album,
    /// Cover image of an album.
    Artwork,
    Genre,
    /// Technical stream properties of one audio file.
    AudioMetadata,
    AudioFile,
    Track,
    /// One search keyword, shared by every track that contains it.
    Keyword,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Library => "MusicLibrary",
            EntityKind::Artist => "Artist",
            EntityKind::ArtistWithRole => "ArtistWithRole",
            EntityKind::RecordLabel => "RecordLabel",
            EntityKind::Album => "Album",
            EntityKind::Artwork => "Artwork",
            EntityKind::Genre => "Genre",
            EntityKind::AudioMetadata => "AudioMetadata",
            EntityKind::AudioFile => "AudioFile",
            EntityKind::Track => "Track",
            EntityKind::Keyword => "Keyword",
        };
        f.write_str(name)
    }
}

/// Storage type of a column, matching the [`Value`](super::Value) variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    /// 64-bit integer.
    Int,
    /// UTC timestamp with microsecond precision.
    Timestamp,
}

/// One column of a [`TableSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    /// Uuid column.
    pub const fn uuid(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Uuid,
        }
    }

    /// Text column.
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Text,
        }
    }

    /// Integer column.
    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Int,
        }
    }

    /// Timestamp column.
    pub const fn timestamp(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Timestamp,
        }
    }
}

/// `column` holds the id of a `references` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: EntityKind,
}

/// Table layout for one entity type. The first column is always the primary
/// key `id`.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub kind: EntityKind,
    pub table: &'static str,
    pub columns: &'static [Column],
    pub foreign_keys: &'static [ForeignKey],
}

impl TableSchema {
    /// Position of `name` in the row layout.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Entity types this table references, excluding itself.
    pub fn dependencies(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references)
            .filter(move |kind| *kind != self.kind)
    }
}

/// Join table linking two entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JunctionSchema {
    pub left: EntityKind,
    pub right: EntityKind,
    pub table: &'static str,
    pub left_column: &'static str,
    pub right_column: &'static str,
}

impl JunctionSchema {
    /// Label used in insert statistics, e.g. `Track <-> ArtistWithRole`.
    pub fn label(&self) -> String {
        format!("{} <-> {}", self.left, self.right)
    }
}

/// Registry of every table and junction the engine may write to.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<EntityKind, TableSchema>,
    junctions: Vec<JunctionSchema>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `table`, replacing any table of the same kind.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.kind, table);
        self
    }

    /// Register a link table.
    pub fn with_junction(mut self, junction: JunctionSchema) -> Self {
        self.junctions.push(junction);
        self
    }

    /// Table of `kind`, or a configuration error if unregistered.
    pub fn table(&self, kind: EntityKind) -> Result<&TableSchema> {
        self.tables.get(&kind).ok_or_else(|| {
            CoralError::Configuration(format!("no table registered for entity type {kind}"))
        })
    }

    /// Registered tables ordered by kind.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Registered link tables.
    pub fn junctions(&self) -> &[JunctionSchema] {
        &self.junctions
    }

    /// Find the junction linking `a` and `b` in either orientation. The
    /// returned flag is `true` when the junction's left side is `b`.
    pub fn junction_between(&self, a: EntityKind, b: EntityKind) -> Result<(JunctionSchema, bool)> {
        self.junctions
            .iter()
            .find_map(|junction| {
                if junction.left == a && junction.right == b {
                    Some((*junction, false))
                } else if junction.left == b && junction.right == a {
                    Some((*junction, true))
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                CoralError::Configuration(format!(
                    "no many-to-many relationship registered between {a} and {b}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT_COLUMNS: &[Column] = &[Column::uuid("id")];

    #[test]
    fn resolves_junction_in_both_orientations() {
        let registry = SchemaRegistry::new().with_junction(JunctionSchema {
            left: EntityKind::Track,
            right: EntityKind::Keyword,
            table: "track_keywords",
            left_column: "track_id",
            right_column: "keyword_id",
        });

        let (junction, swapped) = registry
            .junction_between(EntityKind::Track, EntityKind::Keyword)
            .unwrap();
        assert_eq!(junction.table, "track_keywords");
        assert!(!swapped);

        let (_, swapped) = registry
            .junction_between(EntityKind::Keyword, EntityKind::Track)
            .unwrap();
        assert!(swapped);

        let missing = registry.junction_between(EntityKind::Track, EntityKind::Genre);
        assert!(matches!(missing, Err(CoralError::Configuration(_))));
    }

    #[test]
    fn unknown_table_is_a_configuration_error() {
        let registry = SchemaRegistry::new().with_table(TableSchema {
            kind: EntityKind::Genre,
            table: "genres",
            columns: LEFT_COLUMNS,
            foreign_keys: &[],
        });

        assert!(registry.table(EntityKind::Genre).is_ok());
        assert!(matches!(
            registry.table(EntityKind::Album),
            Err(CoralError::Configuration(_))
        ));
    }
}
