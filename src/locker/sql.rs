use crate::locker::Error;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, SqlErr, Statement, Value};
use std::time::Duration;
use tracing::{debug, info};

const SQLITE_NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// Lock backend representing each held lock as a uniquely named row
///
/// The unique index is on `name` alone, so an expired row keeps blocking
/// acquisition until a reclamation pass deletes it. All timestamps are
/// computed by the database clock.
#[derive(Debug, Clone)]
pub struct Backend {
    conn: DatabaseConnection,
    table: String,
}

pub fn is_valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table.len() <= 64
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn create_table_sql(db_backend: DbBackend, table: &str) -> Vec<String> {
    match db_backend {
        DbBackend::MySql => vec![format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INT NOT NULL AUTO_INCREMENT,
                name VARCHAR(255) NOT NULL,
                expire_at TIMESTAMP(3) NOT NULL,
                created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
                PRIMARY KEY (id),
                UNIQUE KEY uk_name (name),
                KEY idx_expire_at (expire_at)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
        )],
        DbBackend::Postgres => vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    expire_at TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
                )"
            ),
            format!("CREATE UNIQUE INDEX IF NOT EXISTS uk_{table}_name ON {table} (name)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_expire_at ON {table} (expire_at)"),
        ],
        DbBackend::Sqlite => vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    expire_at TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT ({SQLITE_NOW})
                )"
            ),
            format!("CREATE UNIQUE INDEX IF NOT EXISTS uk_{table}_name ON {table} (name)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_expire_at ON {table} (expire_at)"),
        ],
    }
}

fn insert_sql(db_backend: DbBackend, table: &str) -> String {
    match db_backend {
        DbBackend::MySql => format!(
            "INSERT INTO {table} (name, expire_at, created_at) \
             VALUES (?, TIMESTAMPADD(MICROSECOND, ?, CURRENT_TIMESTAMP(3)), CURRENT_TIMESTAMP(3))"
        ),
        DbBackend::Postgres => format!(
            "INSERT INTO {table} (name, expire_at, created_at) \
             VALUES ($1, CURRENT_TIMESTAMP + make_interval(secs => $2), CURRENT_TIMESTAMP)"
        ),
        DbBackend::Sqlite => format!(
            "INSERT INTO {table} (name, expire_at, created_at) \
             VALUES (?, strftime('%Y-%m-%d %H:%M:%f', 'now', ?), {SQLITE_NOW})"
        ),
    }
}

// Each dialect takes the lease in the unit its date arithmetic expects.
fn lease_value(db_backend: DbBackend, lease: Duration) -> Value {
    match db_backend {
        DbBackend::MySql => i64::try_from(lease.as_micros()).unwrap_or(i64::MAX).into(),
        DbBackend::Postgres => lease.as_secs_f64().into(),
        DbBackend::Sqlite => format!("+{:.3} seconds", lease.as_secs_f64()).into(),
    }
}

fn delete_sql(db_backend: DbBackend, table: &str) -> String {
    match db_backend {
        DbBackend::MySql => format!("DELETE FROM {table} WHERE name = ? LIMIT 1"),
        DbBackend::Postgres => format!("DELETE FROM {table} WHERE name = $1"),
        DbBackend::Sqlite => format!("DELETE FROM {table} WHERE name = ?"),
    }
}

fn reclaim_sql(db_backend: DbBackend, table: &str) -> String {
    let now = match db_backend {
        DbBackend::MySql => "CURRENT_TIMESTAMP(3)",
        DbBackend::Postgres => "CURRENT_TIMESTAMP",
        DbBackend::Sqlite => SQLITE_NOW,
    };
    format!("DELETE FROM {table} WHERE expire_at < {now}")
}

impl Backend {
    pub fn new(conn: DatabaseConnection, table: String) -> Result<Self, Error> {
        if !is_valid_table_name(&table) {
            return Err(Error::Initialization(format!(
                "Invalid lock table name '{table}'"
            )));
        }
        Ok(Backend { conn, table })
    }

    fn db_backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    /// Create the lock table and its indexes if they do not exist yet
    pub async fn provision(&self) -> Result<(), Error> {
        info!("Provisioning lock table '{}'", self.table);
        for sql in create_table_sql(self.db_backend(), &self.table) {
            self.conn
                .execute(Statement::from_string(self.db_backend(), sql))
                .await?;
        }
        Ok(())
    }

    /// Insert the lock row for `name`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if the row was inserted
    /// * `Ok(false)` if a row with the same name already exists
    ///
    /// # Errors
    ///
    /// * `Error::StoreUnavailable` on any other database failure
    pub async fn try_acquire(&self, name: &str, lease: Duration) -> Result<bool, Error> {
        let db_backend = self.db_backend();
        let statement = Statement::from_sql_and_values(
            db_backend,
            insert_sql(db_backend, &self.table),
            [name.into(), lease_value(db_backend, lease)],
        );

        match self.conn.execute(statement).await {
            Ok(_) => Ok(true),
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    debug!("Lock row already exists");
                    Ok(false)
                }
                _ => Err(err.into()),
            },
        }
    }

    /// Delete the lock row for `name`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if a row was deleted
    /// * `Ok(false)` if no row was found, i.e. it was already reclaimed
    pub async fn release(&self, name: &str) -> Result<bool, Error> {
        let db_backend = self.db_backend();
        let statement = Statement::from_sql_and_values(
            db_backend,
            delete_sql(db_backend, &self.table),
            [name.into()],
        );

        let result = self.conn.execute(statement).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every lock row whose expiry has passed, according to the database clock
    pub async fn reclaim(&self) -> Result<u64, Error> {
        let db_backend = self.db_backend();
        let statement = Statement::from_string(db_backend, reclaim_sql(db_backend, &self.table));

        let result = self.conn.execute(statement).await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!(deleted, "Reclaimed expired lock rows");
        }
        Ok(deleted)
    }

    #[cfg(test)]
    pub(crate) async fn count_rows(&self, name: &str) -> i64 {
        let row = self
            .conn
            .query_one(Statement::from_sql_and_values(
                self.db_backend(),
                format!("SELECT COUNT(*) AS cnt FROM {} WHERE name = ?", self.table),
                [name.into()],
            ))
            .await
            .expect("Failed to count rows")
            .expect("COUNT returned no row");
        row.try_get::<i64>("", "cnt").expect("Failed to read count")
    }
}
