use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coral_model::{Artwork, AudioFile, LibraryID, MusicLibrary, Track};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder, Row as _};
use tracing::debug;
use uuid::Uuid;

use super::ports::{
    DeletedTrack, EmbeddingCandidate, EmbeddingRepository, KnownFile, LibraryRepository,
    RenameOutcome, StoredTrack, TrackUpdate,
};
use super::schema::{ARTWORKS, AUDIO_FILES, LIBRARIES, TRACKS};
use crate::bulk::{BulkEntity, ColumnType, EntityStore, JunctionSchema, Row, TableSchema, Value};
use crate::error::{CoralError, Result};

/// Embedded migrations for the library schema.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

fn db_error(context: &str, err: sqlx::Error) -> CoralError {
    CoralError::Database(format!("{context}: {err}"))
}

fn column_list(table: &TableSchema, alias: Option<&str>) -> String {
    table
        .columns
        .iter()
        .map(|column| match alias {
            Some(alias) => format!("{alias}.{}", column.name),
            None => column.name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_statement(table: &TableSchema) -> String {
    let placeholders = (1..=table.columns.len())
        .map(|index| format!("${index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.table,
        column_list(table, None),
        placeholders
    )
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Uuid(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Int(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Uuid(v) => builder.push_bind(*v),
        Value::Text(v) => builder.push_bind(v.clone()),
        Value::Int(v) => builder.push_bind(*v),
        Value::Timestamp(v) => builder.push_bind(*v),
    };
}

/// Read the leading `table.columns.len()` columns of a result row.
fn decode_row(table: &TableSchema, row: &PgRow) -> Result<Row> {
    let mut values = Vec::with_capacity(table.columns.len());
    for (index, column) in table.columns.iter().enumerate() {
        let decode = |err: sqlx::Error| {
            CoralError::Decode(format!("{}.{}: {}", table.table, column.name, err))
        };
        let value = match column.ty {
            ColumnType::Uuid => Value::Uuid(row.try_get(index).map_err(decode)?),
            ColumnType::Text => Value::Text(row.try_get(index).map_err(decode)?),
            ColumnType::Int => Value::Int(row.try_get(index).map_err(decode)?),
            ColumnType::Timestamp => Value::Timestamp(row.try_get(index).map_err(decode)?),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

fn decode_entity<T: BulkEntity>(table: &TableSchema, row: &PgRow) -> Result<T> {
    T::from_row(&decode_row(table, row)?)
}

/// Postgres implementation of the store ports.
#[derive(Clone, Debug)]
pub struct PostgresLibraryStore {
    pool: PgPool,
}

impl PostgresLibraryStore {
    /// Wrap an existing pool. Call [`Self::migrate`] before first use.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|err| CoralError::Database(format!("failed to run migrations: {err}")))
    }

    async fn track_for_audio_file(&self, audio_file_id: Uuid) -> Result<Option<Track>> {
        let sql = format!(
            "SELECT {} FROM tracks WHERE audio_file_id = $1",
            column_list(&TRACKS, None)
        );
        let row = sqlx::query(&sql)
            .bind(audio_file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("failed to load track for audio file", e))?;
        row.map(|row| decode_entity::<Track>(&TRACKS, &row))
            .transpose()
    }
}

#[async_trait]
impl EntityStore for PostgresLibraryStore {
    async fn find_one(
        &self,
        table: &TableSchema,
        predicate: &[(&'static str, Value)],
    ) -> Result<Option<Row>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT ");
        builder.push(column_list(table, None));
        builder.push(" FROM ");
        builder.push(table.table);

        for (index, (column, value)) in predicate.iter().enumerate() {
            builder.push(if index == 0 { " WHERE " } else { " AND " });
            builder.push(*column);
            if value.is_null() {
                builder.push(" IS NULL");
            } else {
                builder.push(" = ");
                push_value(&mut builder, value);
            }
        }
        builder.push(" LIMIT 1");

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("lookup in {} failed", table.table), e))?;

        row.map(|row| decode_row(table, &row)).transpose()
    }

    async fn insert_batch(&self, table: &TableSchema, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = insert_statement(table);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin insert transaction", e))?;

        for row in rows {
            let mut query = sqlx::query(&sql);
            for value in row.values() {
                query = bind_value(query, value);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error(&format!("insert into {} failed", table.table), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error(&format!("commit of {} batch failed", table.table), e))?;

        debug!(table = table.table, rows = rows.len(), "committed insert batch");
        Ok(rows.len() as u64)
    }

    async fn insert_links(&self, junction: &JunctionSchema, pairs: &[(Uuid, Uuid)]) -> Result<u64> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let (left, right): (Vec<Uuid>, Vec<Uuid>) = pairs.iter().copied().unzip();
        let sql = format!(
            "INSERT INTO {} ({}, {}) SELECT * FROM UNNEST($1::uuid[], $2::uuid[]) ON CONFLICT DO NOTHING",
            junction.table, junction.left_column, junction.right_column
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin link transaction", e))?;
        let result = sqlx::query(&sql)
            .bind(left)
            .bind(right)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(&format!("insert into {} failed", junction.table), e))?;
        tx.commit()
            .await
            .map_err(|e| db_error(&format!("commit of {} batch failed", junction.table), e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LibraryRepository for PostgresLibraryStore {
    async fn create_library(&self, library: &MusicLibrary) -> Result<()> {
        self.insert_batch(&LIBRARIES, &[library.to_row()]).await?;
        Ok(())
    }

    async fn get_library(&self, id: LibraryID) -> Result<Option<MusicLibrary>> {
        let sql = format!(
            "SELECT {} FROM music_libraries WHERE id = $1",
            column_list(&LIBRARIES, None)
        );
        let row = sqlx::query(&sql)
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("failed to load library {id}"), e))?;
        row.map(|row| decode_entity::<MusicLibrary>(&LIBRARIES, &row))
            .transpose()
    }

    async fn list_libraries(&self) -> Result<Vec<MusicLibrary>> {
        let sql = format!(
            "SELECT {} FROM music_libraries ORDER BY created_at",
            column_list(&LIBRARIES, None)
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("failed to list libraries", e))?;
        rows.iter()
            .map(|row| decode_entity::<MusicLibrary>(&LIBRARIES, row))
            .collect()
    }

    async fn set_last_scan(&self, id: LibraryID, at: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE music_libraries SET last_scan = $2, updated_at = $3 WHERE id = $1")
                .bind(id.to_uuid())
                .bind(at)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error(&format!("failed to stamp library {id}"), e))?;

        if result.rows_affected() == 0 {
            return Err(CoralError::NotFound(format!("library {id}")));
        }
        Ok(())
    }

    async fn known_files(&self, id: LibraryID) -> Result<Vec<KnownFile>> {
        let rows =
            sqlx::query("SELECT id, path, modified_at FROM audio_files WHERE library_id = $1")
                .bind(id.to_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("failed to load known files", e))?;

        rows.iter()
            .map(|row| {
                Ok(KnownFile {
                    audio_file_id: row
                        .try_get("id")
                        .map_err(|e| db_error("audio_files.id", e))?,
                    path: row
                        .try_get("path")
                        .map_err(|e| db_error("audio_files.path", e))?,
                    modified_at: row
                        .try_get("modified_at")
                        .map_err(|e| db_error("audio_files.modified_at", e))?,
                })
            })
            .collect()
    }

    async fn find_track_by_path(&self, path: &str) -> Result<Option<StoredTrack>> {
        let sql = format!(
            "SELECT {} FROM audio_files WHERE path = $1",
            column_list(&AUDIO_FILES, None)
        );
        let Some(file_row) = sqlx::query(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("failed to look up audio file", e))?
        else {
            return Ok(None);
        };
        let audio_file = decode_entity::<AudioFile>(&AUDIO_FILES, &file_row)?;

        let Some(track) = self.track_for_audio_file(audio_file.id).await? else {
            return Ok(None);
        };

        let mut artist_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT artist_with_role_id FROM track_artists WHERE track_id = $1",
        )
        .bind(track.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("failed to load track artists", e))?;
        artist_ids.sort_unstable();

        Ok(Some(StoredTrack {
            track,
            audio_file,
            artist_ids,
        }))
    }

    async fn update_track(&self, update: &TrackUpdate) -> Result<()> {
        let track = &update.track;
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin track update", e))?;

        sqlx::query(
            r#"
            UPDATE tracks
            SET title = $2, duration_secs = $3, disc_number = $4, track_number = $5,
                comment = $6, isrc = $7, album_id = $8, genre_id = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(track.id)
        .bind(&track.title)
        .bind(i64::from(track.duration_secs))
        .bind(track.disc_number.map(i64::from))
        .bind(track.track_number.map(i64::from))
        .bind(&track.comment)
        .bind(&track.isrc)
        .bind(track.album_id)
        .bind(track.genre_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("failed to update track {}", track.id), e))?;

        sqlx::query(
            r#"
            UPDATE audio_files
            SET size_bytes = $2, modified_at = $3, audio_metadata_id = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(track.audio_file_id)
        .bind(update.size_bytes)
        .bind(update.modified_at)
        .bind(update.audio_metadata_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("failed to update audio file", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit track update", e))
    }

    async fn replace_track_artists(&self, track_id: Uuid, artist_ids: &[Uuid]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin artist replacement", e))?;

        sqlx::query("DELETE FROM track_artists WHERE track_id = $1")
            .bind(track_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("failed to clear track artists", e))?;

        sqlx::query(
            "INSERT INTO track_artists (track_id, artist_with_role_id) \
             SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
        )
        .bind(track_id)
        .bind(artist_ids.to_vec())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("failed to link track artists", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit artist replacement", e))
    }

    async fn replace_track_keywords(&self, track_id: Uuid, keywords: &[String]) -> Result<()> {
        let ids: Vec<Uuid> = keywords.iter().map(|_| Uuid::now_v7()).collect();
        let values = keywords.to_vec();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin keyword replacement", e))?;

        sqlx::query(
            "INSERT INTO keywords (id, value, created_at, updated_at) \
             SELECT k.id, k.value, $3, $3 FROM UNNEST($1::uuid[], $2::text[]) AS k(id, value) \
             ON CONFLICT (value) DO NOTHING",
        )
        .bind(ids)
        .bind(&values)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("failed to insert keywords", e))?;

        sqlx::query("DELETE FROM track_keywords WHERE track_id = $1")
            .bind(track_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("failed to clear track keywords", e))?;

        sqlx::query(
            "INSERT INTO track_keywords (track_id, keyword_id) \
             SELECT $1, k.id FROM keywords k WHERE k.value = ANY($2::text[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(track_id)
        .bind(&values)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("failed to link track keywords", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit keyword replacement", e))
    }

    async fn delete_audio_files(&self, audio_file_ids: &[Uuid]) -> Result<Vec<DeletedTrack>> {
        if audio_file_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = audio_file_ids.to_vec();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin file deletion", e))?;

        let track_sql = format!(
            "SELECT {} FROM tracks WHERE audio_file_id = ANY($1)",
            column_list(&TRACKS, None)
        );
        let tracks = sqlx::query(&track_sql)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| db_error("failed to load tracks for deletion", e))?
            .iter()
            .map(|row| decode_entity::<Track>(&TRACKS, row))
            .collect::<Result<Vec<_>>>()?;

        let files: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, path FROM audio_files WHERE id = ANY($1)")
                .bind(&ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| db_error("failed to load files for deletion", e))?;

        sqlx::query("DELETE FROM tracks WHERE audio_file_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("failed to delete tracks", e))?;
        sqlx::query("DELETE FROM audio_files WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("failed to delete audio files", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit file deletion", e))?;

        Ok(files
            .into_iter()
            .map(|(id, path)| DeletedTrack {
                track: tracks
                    .iter()
                    .find(|track| track.audio_file_id == id)
                    .cloned(),
                path,
            })
            .collect())
    }

    async fn delete_orphaned_artist_roles(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM artists_with_roles awr WHERE NOT EXISTS \
             (SELECT 1 FROM track_artists ta WHERE ta.artist_with_role_id = awr.id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("failed to delete orphaned artist roles", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_orphaned_artists(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM artists a WHERE NOT EXISTS \
             (SELECT 1 FROM artists_with_roles awr WHERE awr.artist_id = a.id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("failed to delete orphaned artists", e))?;
        Ok(result.rows_affected())
    }

    async fn orphaned_album_artworks(&self) -> Result<Vec<Artwork>> {
        let sql = format!(
            "SELECT {} FROM artworks aw WHERE NOT EXISTS \
             (SELECT 1 FROM tracks t WHERE t.album_id = aw.album_id)",
            column_list(&ARTWORKS, Some("aw"))
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("failed to load orphaned artwork", e))?;
        rows.iter()
            .map(|row| decode_entity::<Artwork>(&ARTWORKS, row))
            .collect()
    }

    async fn delete_orphaned_albums(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM albums al WHERE NOT EXISTS \
             (SELECT 1 FROM tracks t WHERE t.album_id = al.id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("failed to delete orphaned albums", e))?;
        Ok(result.rows_affected())
    }

    async fn rename_audio_file(
        &self,
        old_path: &str,
        new_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<RenameOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin rename", e))?;

        let Some(file_id) =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM audio_files WHERE path = $1 FOR UPDATE")
                .bind(old_path)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("failed to look up renamed file", e))?
        else {
            return Ok(RenameOutcome::NotFound);
        };

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM audio_files WHERE path = $1 AND id <> $2)",
        )
        .bind(new_path)
        .bind(file_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("failed to check rename target", e))?;
        if taken {
            return Ok(RenameOutcome::TargetExists);
        }

        sqlx::query(
            "UPDATE audio_files SET path = $2, modified_at = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(file_id)
        .bind(new_path)
        .bind(modified_at)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("failed to rename audio file", e))?;

        let track_sql = format!(
            "SELECT {} FROM tracks WHERE audio_file_id = $1",
            column_list(&TRACKS, None)
        );
        let track_row = sqlx::query(&track_sql)
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("failed to load renamed track", e))?;

        let Some(track_row) = track_row else {
            return Ok(RenameOutcome::NotFound);
        };
        let track = decode_entity::<Track>(&TRACKS, &track_row)?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit rename", e))?;
        Ok(RenameOutcome::Renamed(track))
    }
}

#[async_trait]
impl EmbeddingRepository for PostgresLibraryStore {
    async fn store_embedding(&self, track_id: Uuid, embedding: &[f32]) -> Result<()> {
        sqlx::query(
            "INSERT INTO track_embeddings (track_id, embedding, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (track_id) DO UPDATE SET embedding = EXCLUDED.embedding",
        )
        .bind(track_id)
        .bind(embedding.to_vec())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&format!("failed to store embedding for {track_id}"), e))?;
        Ok(())
    }

    async fn has_embedding(&self, track_id: Uuid) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM track_embeddings WHERE track_id = $1)")
            .bind(track_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("failed to check embedding", e))
    }

    async fn tracks_missing_embeddings(
        &self,
        library: LibraryID,
    ) -> Result<Vec<EmbeddingCandidate>> {
        let sql = format!(
            "SELECT {}, af.path FROM tracks t \
             JOIN audio_files af ON af.id = t.audio_file_id \
             LEFT JOIN track_embeddings e ON e.track_id = t.id \
             WHERE af.library_id = $1 AND e.track_id IS NULL",
            column_list(&TRACKS, Some("t"))
        );
        let rows = sqlx::query(&sql)
            .bind(library.to_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("failed to load tracks without embeddings", e))?;

        rows.iter()
            .map(|row| {
                let track = decode_entity::<Track>(&TRACKS, row)?;
                let path: String = row
                    .try_get(TRACKS.columns.len())
                    .map_err(|e| db_error("audio_files.path", e))?;
                Ok(EmbeddingCandidate { track, path })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::{ALBUMS, TRACK_ARTISTS};

    #[test]
    fn insert_statement_lists_every_column() {
        let sql = insert_statement(&ALBUMS);
        assert!(sql.starts_with("INSERT INTO albums (id, name, release_year"));
        assert!(sql.ends_with("VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"));
    }

    #[test]
    fn qualified_column_list_uses_alias() {
        let list = column_list(&ARTWORKS, Some("aw"));
        assert_eq!(list, "aw.id, aw.album_id, aw.path, aw.created_at, aw.updated_at");
        assert_eq!(TRACK_ARTISTS.left_column, "track_id");
    }
}
