//! Experiment repository: experiments, their datasets and datafiles, owners.

use exparc_core::models::{Datafile, Dataset, Experiment};
use exparc_core::AppError;
use sqlx::{PgPool, Postgres};

use crate::db::transaction::{with_transaction, TransactionGuard};

/// Row type for experiments table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct ExperimentRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub created_by: i64,
    pub url: Option<String>,
}

impl ExperimentRow {
    pub fn to_experiment(self) -> Experiment {
        Experiment {
            id: self.id,
            title: self.title,
            description: self.description,
            created_by: self.created_by,
            url: self.url,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DatasetRow {
    pub id: i64,
    pub description: String,
}

impl DatasetRow {
    pub fn to_dataset(self) -> Dataset {
        Dataset {
            id: self.id,
            description: self.description,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DatafileRow {
    pub id: i64,
    pub dataset_id: i64,
    pub filename: String,
    pub size: Option<i64>,
    pub checksum: Option<String>,
}

impl DatafileRow {
    pub fn to_datafile(self) -> Datafile {
        Datafile {
            id: self.id,
            dataset_id: self.dataset_id,
            filename: self.filename,
            size: self.size,
            checksum: self.checksum,
        }
    }
}

/// Repository for experiments, datasets, datafiles and the experiment/dataset
/// ownership links.
#[derive(Clone)]
pub struct ExperimentRepository {
    pool: PgPool,
}

impl ExperimentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "experiments", db.record_id = id))]
    pub async fn get(&self, id: i64) -> Result<Option<Experiment>, AppError> {
        let row: Option<ExperimentRow> = sqlx::query_as::<Postgres, ExperimentRow>(
            "SELECT id, title, description, created_by, url FROM experiments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ExperimentRow::to_experiment))
    }

    #[tracing::instrument(skip(self), fields(db.table = "users", db.record_id = user_id))]
    pub async fn get_username(&self, user_id: i64) -> Result<Option<String>, AppError> {
        let username: Option<String> =
            sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(username)
    }

    /// Datasets linked to `experiment_id`, in id order.
    #[tracing::instrument(skip(self), fields(db.table = "datasets"))]
    pub async fn datasets_for_experiment(
        &self,
        experiment_id: i64,
    ) -> Result<Vec<Dataset>, AppError> {
        let rows: Vec<DatasetRow> = sqlx::query_as::<Postgres, DatasetRow>(
            r#"
            SELECT d.id, d.description
            FROM datasets d
            JOIN experiment_datasets ed ON ed.dataset_id = d.id
            WHERE ed.experiment_id = $1
            ORDER BY d.id
            "#,
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DatasetRow::to_dataset).collect())
    }

    /// Number of experiments owning `dataset_id`.
    #[tracing::instrument(skip(self), fields(db.table = "experiment_datasets"))]
    pub async fn experiment_count_for_dataset(&self, dataset_id: i64) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM experiment_datasets WHERE dataset_id = $1")
                .bind(dataset_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "datafiles"))]
    pub async fn datafiles_for_dataset(&self, dataset_id: i64) -> Result<Vec<Datafile>, AppError> {
        let rows: Vec<DatafileRow> = sqlx::query_as::<Postgres, DatafileRow>(
            r#"
            SELECT id, dataset_id, filename, size, checksum
            FROM datafiles
            WHERE dataset_id = $1
            ORDER BY id
            "#,
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DatafileRow::to_datafile).collect())
    }

    /// Unlink `dataset_id` from `experiment_id`. The dataset itself persists.
    #[tracing::instrument(skip(self), fields(db.table = "experiment_datasets"))]
    pub async fn detach_dataset(&self, experiment_id: i64, dataset_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM experiment_datasets WHERE experiment_id = $1 AND dataset_id = $2")
            .bind(experiment_id)
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a dataset with its datafiles, their replica rows and every
    /// ownership link, in one transaction.
    #[tracing::instrument(skip(self), fields(db.table = "datasets", db.record_id = dataset_id))]
    pub async fn delete_dataset(&self, dataset_id: i64) -> Result<(), AppError> {
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move {
                sqlx::query(
                    "DELETE FROM replicas WHERE datafile_id IN (SELECT id FROM datafiles WHERE dataset_id = $1)",
                )
                .bind(dataset_id)
                .execute(&mut **tx)
                .await?;
                sqlx::query("DELETE FROM datafiles WHERE dataset_id = $1")
                    .bind(dataset_id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM experiment_datasets WHERE dataset_id = $1")
                    .bind(dataset_id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM datasets WHERE id = $1")
                    .bind(dataset_id)
                    .execute(&mut **tx)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .await?;
        Ok(())
    }

    /// Delete an experiment and its remaining dataset links. Datasets are
    /// left alone; callers purge or detach them first.
    #[tracing::instrument(skip(self), fields(db.table = "experiments", db.record_id = experiment_id))]
    pub async fn delete_experiment(&self, experiment_id: i64) -> Result<(), AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        sqlx::query("DELETE FROM experiment_datasets WHERE experiment_id = $1")
            .bind(experiment_id)
            .execute(tx.connection()?)
            .await?;
        let result = sqlx::query("DELETE FROM experiments WHERE id = $1")
            .bind(experiment_id)
            .execute(tx.connection()?)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("experiment {}", experiment_id)));
        }
        tx.commit().await?;
        Ok(())
    }
}
