use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::models::{HealthCheckRecord, NewHealthCheck, NewUser, User};

/// Postgres SQLSTATE for a UNIQUE constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// True when `err` wraps a database error raised by a UNIQUE constraint.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Pool that only connects on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id SERIAL PRIMARY KEY,
                full_name TEXT NOT NULL,
                gender TEXT NOT NULL,
                birth_date DATE NOT NULL,
                id_number VARCHAR(10) NOT NULL UNIQUE,
                password TEXT NOT NULL,
                phone_number VARCHAR(10) NOT NULL,
                email VARCHAR(100) NOT NULL,
                role VARCHAR(20) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS health_checks (
                id BIGSERIAL PRIMARY KEY,
                id_number VARCHAR(10) NOT NULL REFERENCES users(id_number),
                check_date DATE NOT NULL,
                extracted_text TEXT NOT NULL,
                upload_timestamp TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_health_checks_owner_date
            ON health_checks(id_number, check_date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn id_number_exists(&self, id_number: &str) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE id_number = $1 AND id_number <> ''",
        )
        .bind(id_number)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("id_number {} exists: {}", id_number, count > 0);
        Ok(count > 0)
    }

    pub async fn insert_user(&self, user: &NewUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users
            (full_name, gender, birth_date, id_number, password, phone_number, email, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&user.full_name)
        .bind(&user.gender)
        .bind(user.birth_date)
        .bind(&user.id_number)
        .bind(&user.password_hash)
        .bind(&user.phone_number)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::info!("Inserted user {}", user.id_number);
        Ok(())
    }

    pub async fn find_user(&self, id_number: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id_number = $1")
            .bind(id_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn verify_id_and_email(&self, id_number: &str, email: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE id_number = $1 AND email = $2")
                .bind(id_number)
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    pub async fn update_password(&self, id_number: &str, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password = $1 WHERE id_number = $2")
            .bind(password_hash)
            .bind(id_number)
            .execute(&self.pool)
            .await?;

        tracing::info!("Updated password for {}", id_number);
        Ok(())
    }

    pub async fn insert_health_check(&self, record: &NewHealthCheck) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO health_checks (id_number, check_date, extracted_text, upload_timestamp, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&record.id_number)
        .bind(record.check_date)
        .bind(&record.extracted_text)
        .bind(Utc::now())
        .bind(&record.data)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Stored health check {} for {} dated {}",
            id,
            record.id_number,
            record.check_date
        );
        Ok(id)
    }

    /// Records for one person, newest first. Both bounds are inclusive and optional.
    pub async fn health_checks_for(
        &self,
        id_number: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<HealthCheckRecord>> {
        let records = sqlx::query_as::<_, HealthCheckRecord>(
            r#"
            SELECT check_date, extracted_text
            FROM health_checks
            WHERE id_number = $1
              AND ($2::date IS NULL OR check_date >= $2)
              AND ($3::date IS NULL OR check_date <= $3)
            ORDER BY check_date DESC, id DESC
            "#,
        )
        .bind(id_number)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!("Fetched {} health checks for {}", records.len(), id_number);
        Ok(records)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::auth::validation::random_id_number;
    use crate::models::Role;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&anyhow::anyhow!("boom")));
        assert!(!is_unique_violation(&anyhow::Error::from(sqlx::Error::RowNotFound)));
    }

    #[tokio::test]
    #[ignore = "needs Postgres at TEST_DATABASE_URL"]
    async fn user_round_trip() {
        let db = database().await;
        let id = random_id_number();

        assert!(!db.id_number_exists(&id).await.unwrap());
        db.insert_user(&new_user(&id, Role::HealthCenter)).await.unwrap();
        assert!(db.id_number_exists(&id).await.unwrap());

        let user = db.find_user(&id).await.unwrap().unwrap();
        assert_eq!(user.role, "health_center");
        assert_eq!(user.birth_date, NaiveDate::from_ymd_opt(1990, 5, 17).unwrap());

        assert!(db.verify_id_and_email(&id, "ming@example.com").await.unwrap());
        assert!(!db.verify_id_and_email(&id, "other@example.com").await.unwrap());

        db.update_password(&id, "new-hash").await.unwrap();
        assert_eq!(db.find_user(&id).await.unwrap().unwrap().password, "new-hash");

        purge(&db, &id).await;
        assert!(db.find_user(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "needs Postgres at TEST_DATABASE_URL"]
    async fn duplicate_insert_is_a_unique_violation() {
        let db = database().await;
        let id = random_id_number();

        db.insert_user(&new_user(&id, Role::User)).await.unwrap();
        let err = db.insert_user(&new_user(&id, Role::Other)).await.unwrap_err();
        assert!(is_unique_violation(&err), "{err:#}");

        purge(&db, &id).await;
    }

    #[tokio::test]
    #[ignore = "needs Postgres at TEST_DATABASE_URL"]
    async fn health_checks_are_newest_first_within_inclusive_bounds() {
        let db = database().await;
        let id = random_id_number();
        db.insert_user(&new_user(&id, Role::User)).await.unwrap();

        for (d, text) in [(5, "third"), (1, "first"), (3, "second"), (9, "fourth")] {
            db.insert_health_check(&NewHealthCheck {
                id_number: id.clone(),
                check_date: day(d),
                extracted_text: text.to_string(),
                data: serde_json::json!({ "extracted_text": text }),
            })
            .await
            .unwrap();
        }

        let texts = |records: Vec<HealthCheckRecord>| -> Vec<String> {
            records.into_iter().map(|r| r.extracted_text).collect()
        };

        let all = db.health_checks_for(&id, None, None).await.unwrap();
        assert_eq!(texts(all), ["fourth", "third", "second", "first"]);

        let bounded = db.health_checks_for(&id, Some(day(3)), Some(day(5))).await.unwrap();
        assert_eq!(texts(bounded), ["third", "second"]);

        let from = db.health_checks_for(&id, Some(day(5)), None).await.unwrap();
        assert_eq!(texts(from), ["fourth", "third"]);

        let until = db.health_checks_for(&id, None, Some(day(1))).await.unwrap();
        assert_eq!(texts(until), ["first"]);

        let empty = db.health_checks_for(&id, Some(day(6)), Some(day(8))).await.unwrap();
        assert!(empty.is_empty());

        purge(&db, &id).await;
    }
}
