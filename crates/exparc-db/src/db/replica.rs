//! Replica and location repositories.

use exparc_core::models::{LocatedReplica, Location, NewReplica, Replica};
use exparc_core::{AppError, LocationKind};
use sqlx::{PgPool, Postgres};

/// Row type for locations table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct LocationRow {
    pub id: i64,
    pub name: String,
    pub kind: LocationKind,
    pub url: String,
}

impl LocationRow {
    pub fn to_location(self) -> Location {
        Location {
            id: self.id,
            name: self.name,
            kind: self.kind,
            url: self.url,
        }
    }
}

/// Row type for replicas table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct ReplicaRow {
    pub id: i64,
    pub datafile_id: i64,
    pub url: String,
    pub protocol: String,
    pub verified: bool,
    pub stay_remote: bool,
    pub location_id: i64,
}

impl ReplicaRow {
    pub fn to_replica(self) -> Replica {
        Replica {
            id: self.id,
            datafile_id: self.datafile_id,
            url: self.url,
            protocol: self.protocol,
            verified: self.verified,
            stay_remote: self.stay_remote,
            location_id: self.location_id,
        }
    }
}

/// A replica joined with its location.
#[derive(Debug, sqlx::FromRow)]
struct LocatedReplicaRow {
    id: i64,
    datafile_id: i64,
    url: String,
    protocol: String,
    verified: bool,
    stay_remote: bool,
    location_id: i64,
    location_name: String,
    location_kind: LocationKind,
    location_url: String,
}

impl LocatedReplicaRow {
    fn to_located(self) -> LocatedReplica {
        LocatedReplica {
            location: Location {
                id: self.location_id,
                name: self.location_name,
                kind: self.location_kind,
                url: self.location_url,
            },
            replica: Replica {
                id: self.id,
                datafile_id: self.datafile_id,
                url: self.url,
                protocol: self.protocol,
                verified: self.verified,
                stay_remote: self.stay_remote,
                location_id: self.location_id,
            },
        }
    }
}

/// Repository for locations table.
#[derive(Clone)]
pub struct LocationRepository {
    pool: PgPool,
}

impl LocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "locations"))]
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Location>, AppError> {
        let row: Option<LocationRow> = sqlx::query_as::<Postgres, LocationRow>(
            "SELECT id, name, kind, url FROM locations WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LocationRow::to_location))
    }
}

/// Repository for replicas table.
#[derive(Clone)]
pub struct ReplicaRepository {
    pool: PgPool,
}

impl ReplicaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replicas of `datafile_id` with their locations, optionally restricted
    /// to one location kind, in id order.
    #[tracing::instrument(skip(self), fields(db.table = "replicas"))]
    pub async fn for_datafile(
        &self,
        datafile_id: i64,
        kind: Option<LocationKind>,
    ) -> Result<Vec<LocatedReplica>, AppError> {
        let rows: Vec<LocatedReplicaRow> = sqlx::query_as::<Postgres, LocatedReplicaRow>(
            r#"
            SELECT r.id, r.datafile_id, r.url, r.protocol, r.verified, r.stay_remote,
                   r.location_id, l.name AS location_name, l.kind AS location_kind,
                   l.url AS location_url
            FROM replicas r
            JOIN locations l ON l.id = r.location_id
            WHERE r.datafile_id = $1 AND ($2::location_kind IS NULL OR l.kind = $2)
            ORDER BY r.id
            "#,
        )
        .bind(datafile_id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LocatedReplicaRow::to_located).collect())
    }

    /// Insert a new replica and return it. Commits on its own, so a staged
    /// replacement survives a failure of the following retire step.
    #[tracing::instrument(skip(self, replica), fields(db.table = "replicas", datafile_id = replica.datafile_id))]
    pub async fn create(&self, replica: NewReplica) -> Result<Replica, AppError> {
        let row: ReplicaRow = sqlx::query_as::<Postgres, ReplicaRow>(
            r#"
            INSERT INTO replicas (datafile_id, url, protocol, verified, stay_remote, location_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, datafile_id, url, protocol, verified, stay_remote, location_id
            "#,
        )
        .bind(replica.datafile_id)
        .bind(&replica.url)
        .bind(&replica.protocol)
        .bind(replica.verified)
        .bind(replica.stay_remote)
        .bind(replica.location_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.to_replica())
    }

    /// Bulk delete replica rows. Returns the number of rows removed.
    #[tracing::instrument(skip(self, ids), fields(db.table = "replicas", count = ids.len()))]
    pub async fn delete_many(&self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM replicas WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
