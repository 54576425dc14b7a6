use std::collections::BTreeSet;

use tracing::error;

use super::schema::{EntityKind, SchemaRegistry};
use crate::error::{CoralError, Result};

/// Order `kinds` so every type comes after the types it references through a
/// foreign key. Only references between members of `kinds` are considered.
pub fn dependency_order(kinds: &[EntityKind], schema: &SchemaRegistry) -> Result<Vec<EntityKind>> {
    let present: BTreeSet<EntityKind> = kinds.iter().copied().collect();
    let mut walk = Walk {
        present: &present,
        schema,
        visited: BTreeSet::new(),
        visiting: BTreeSet::new(),
        ordered: Vec::with_capacity(present.len()),
    };

    for kind in &present {
        walk.visit(*kind)?;
    }

    Ok(walk.ordered)
}

struct Walk<'a> {
    present: &'a BTreeSet<EntityKind>,
    schema: &'a SchemaRegistry,
    visited: BTreeSet<EntityKind>,
    visiting: BTreeSet<EntityKind>,
    ordered: Vec<EntityKind>,
}

impl Walk<'_> {
    fn visit(&mut self, kind: EntityKind) -> Result<()> {
        if self.visited.contains(&kind) {
            return Ok(());
        }

        if !self.visiting.insert(kind) {
            error!(entity = %kind, "circular foreign key dependency");
            return Err(CoralError::CyclicDependency(kind));
        }

        let table = self.schema.table(kind)?;
        let dependencies: Vec<EntityKind> = table
            .dependencies()
            .filter(|dep| self.present.contains(dep))
            .collect();

        for dependency in dependencies {
            self.visit(dependency)?;
        }

        self.visiting.remove(&kind);
        self.visited.insert(kind);
        self.ordered.push(kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::schema::{Column, ForeignKey, TableSchema};

    const ID: &[Column] = &[Column::uuid("id")];

    fn table(kind: EntityKind, foreign_keys: &'static [ForeignKey]) -> TableSchema {
        TableSchema {
            kind,
            table: "t",
            columns: ID,
            foreign_keys,
        }
    }

    fn position(order: &[EntityKind], kind: EntityKind) -> usize {
        order.iter().position(|k| *k == kind).unwrap()
    }

    #[test]
    fn referenced_types_come_first() {
        let registry = crate::database::library_schema();
        let kinds = [
            EntityKind::Track,
            EntityKind::Keyword,
            EntityKind::AudioFile,
            EntityKind::Album,
            EntityKind::Genre,
            EntityKind::ArtistWithRole,
            EntityKind::Artist,
            EntityKind::AudioMetadata,
            EntityKind::RecordLabel,
            EntityKind::Artwork,
        ];

        let order = dependency_order(&kinds, &registry).unwrap();
        assert_eq!(order.len(), kinds.len());

        for table in registry.tables() {
            if !kinds.contains(&table.kind) {
                continue;
            }
            for dep in table.dependencies().filter(|dep| kinds.contains(dep)) {
                assert!(
                    position(&order, dep) < position(&order, table.kind),
                    "{dep} must precede {}",
                    table.kind
                );
            }
        }
    }

    #[test]
    fn ignores_references_to_types_outside_the_set() {
        let registry = crate::database::library_schema();
        let order = dependency_order(&[EntityKind::AudioFile], &registry).unwrap();
        assert_eq!(order, vec![EntityKind::AudioFile]);
    }

    #[test]
    fn cyclic_schema_fails_every_time() {
        const ALBUM_TO_ARTIST: &[ForeignKey] = &[ForeignKey {
            column: "artist_id",
            references: EntityKind::Artist,
        }];
        const ARTIST_TO_ALBUM: &[ForeignKey] = &[ForeignKey {
            column: "album_id",
            references: EntityKind::Album,
        }];

        let registry = SchemaRegistry::new()
            .with_table(table(EntityKind::Album, ALBUM_TO_ARTIST))
            .with_table(table(EntityKind::Artist, ARTIST_TO_ALBUM))
            .with_table(table(EntityKind::Genre, &[]));

        for _ in 0..3 {
            let result = dependency_order(
                &[EntityKind::Genre, EntityKind::Album, EntityKind::Artist],
                &registry,
            );
            assert!(matches!(
                result,
                Err(CoralError::CyclicDependency(EntityKind::Artist))
            ));
        }
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        const SELF_REF: &[ForeignKey] = &[ForeignKey {
            column: "parent_id",
            references: EntityKind::Genre,
        }];
        let registry = SchemaRegistry::new().with_table(table(EntityKind::Genre, SELF_REF));
        let order = dependency_order(&[EntityKind::Genre], &registry).unwrap();
        assert_eq!(order, vec![EntityKind::Genre]);
    }
}
