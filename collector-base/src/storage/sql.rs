use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ConnectionTrait, Database, DbConn, EntityTrait, Statement, TransactionTrait,
};
use tracing::instrument;

use super::entities::{counter, gauge};
use super::{MetricStore, StoreError};

const CREATE_GAUGES: &str = "CREATE TABLE IF NOT EXISTS gauges (\
     name varchar(40) PRIMARY KEY, value double precision NOT NULL)";
const CREATE_COUNTERS: &str = "CREATE TABLE IF NOT EXISTS counters (\
     name varchar(40) PRIMARY KEY, value bigint NOT NULL)";

/// The relational repository over Postgres. Gauges are plain UPSERTs;
/// counter ingest adds the delta to the stored value in the conflict
/// clause, so concurrent writers cannot lose increments.
#[derive(Clone, Debug)]
pub struct SqlStore {
    db: DbConn,
}

impl SqlStore {
    /// Connect to `dsn` and make sure the two tables exist. Schema
    /// management beyond that is left to external migration tooling.
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let db = Database::connect(dsn).await?;
        for ddl in [CREATE_GAUGES, CREATE_COUNTERS] {
            db.execute(Statement::from_string(
                db.get_database_backend(),
                ddl.to_owned(),
            ))
            .await?;
        }
        Ok(Self { db })
    }

    async fn upsert_gauge<C: ConnectionTrait>(
        conn: &C,
        name: &str,
        value: f64,
    ) -> Result<(), StoreError> {
        let model = gauge::ActiveModel {
            name: Set(name.to_owned()),
            value: Set(value),
        };
        gauge::Entity::insert(model)
            .on_conflict(
                OnConflict::column(gauge::Column::Name)
                    .update_column(gauge::Column::Value)
                    .to_owned(),
            )
            .exec(conn)
            .await?;
        Ok(())
    }

    async fn upsert_counter<C: ConnectionTrait>(
        conn: &C,
        name: &str,
        delta: i64,
        replace: bool,
    ) -> Result<(), StoreError> {
        let model = counter::ActiveModel {
            name: Set(name.to_owned()),
            value: Set(delta),
        };
        let mut conflict = OnConflict::column(counter::Column::Name);
        if replace {
            conflict.update_column(counter::Column::Value);
        } else {
            conflict.value(
                counter::Column::Value,
                Expr::col((counter::Entity, counter::Column::Value)).add(delta),
            );
        }
        counter::Entity::insert(model)
            .on_conflict(conflict)
            .exec(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for SqlStore {
    async fn add_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        Self::upsert_gauge(&self.db, name, value).await
    }

    async fn add_counter(&self, name: &str, delta: i64, replace: bool) -> Result<i64, StoreError> {
        Self::upsert_counter(&self.db, name, delta, replace).await?;
        let stored = counter::Entity::find_by_id(name.to_owned())
            .one(&self.db)
            .await?;
        Ok(stored.map(|m| m.value).unwrap_or(delta))
    }

    async fn gauge(&self, name: &str) -> Result<Option<f64>, StoreError> {
        let row = gauge::Entity::find_by_id(name.to_owned()).one(&self.db).await?;
        Ok(row.map(|m| m.value))
    }

    async fn counter(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let row = counter::Entity::find_by_id(name.to_owned())
            .one(&self.db)
            .await?;
        Ok(row.map(|m| m.value))
    }

    async fn all_gauges(&self) -> Result<HashMap<String, f64>, StoreError> {
        let rows = gauge::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|m| (m.name, m.value)).collect())
    }

    async fn all_counters(&self) -> Result<HashMap<String, i64>, StoreError> {
        let rows = counter::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|m| (m.name, m.value)).collect())
    }

    async fn apply(
        &self,
        gauges: &[(String, f64)],
        counters: &[(String, i64)],
        replace: bool,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;
        for (name, value) in gauges {
            Self::upsert_gauge(&txn, name, *value).await?;
        }
        for (name, delta) in counters {
            Self::upsert_counter(&txn, name, *delta, replace).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.ping().await?;
        Ok(())
    }
}
