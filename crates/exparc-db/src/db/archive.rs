//! Archive record repository. Records are insert-only.

use chrono::{DateTime, Utc};
use exparc_core::models::{Archive, NewArchive};
use exparc_core::AppError;
use sqlx::{PgPool, Postgres};

/// Row type for archives table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct ArchiveRow {
    pub id: i64,
    pub experiment_id: i64,
    pub experiment_title: String,
    pub experiment_owner: String,
    pub experiment_url: String,
    pub archive_url: String,
    pub archive_created: DateTime<Utc>,
}

impl ArchiveRow {
    pub fn to_archive(self) -> Archive {
        Archive {
            id: self.id,
            experiment_id: self.experiment_id,
            experiment_title: self.experiment_title,
            experiment_owner: self.experiment_owner,
            experiment_url: self.experiment_url,
            archive_url: self.archive_url,
            archive_created: self.archive_created,
        }
    }
}

#[derive(Clone)]
pub struct ArchiveRepository {
    pool: PgPool,
}

impl ArchiveRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, archive), fields(db.table = "archives", experiment_id = archive.experiment_id))]
    pub async fn create(&self, archive: NewArchive) -> Result<Archive, AppError> {
        let row: ArchiveRow = sqlx::query_as::<Postgres, ArchiveRow>(
            r#"
            INSERT INTO archives (experiment_id, experiment_title, experiment_owner, experiment_url, archive_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, experiment_id, experiment_title, experiment_owner, experiment_url, archive_url, archive_created
            "#,
        )
        .bind(archive.experiment_id)
        .bind(&archive.experiment_title)
        .bind(&archive.experiment_owner)
        .bind(&archive.experiment_url)
        .bind(&archive.archive_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.to_archive())
    }

    /// Archive records of `experiment_id`, oldest first.
    #[tracing::instrument(skip(self), fields(db.table = "archives"))]
    pub async fn for_experiment(&self, experiment_id: i64) -> Result<Vec<Archive>, AppError> {
        let rows: Vec<ArchiveRow> = sqlx::query_as::<Postgres, ArchiveRow>(
            r#"
            SELECT id, experiment_id, experiment_title, experiment_owner, experiment_url, archive_url, archive_created
            FROM archives
            WHERE experiment_id = $1
            ORDER BY archive_created, id
            "#,
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ArchiveRow::to_archive).collect())
    }
}
