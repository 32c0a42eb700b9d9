use super::{OidcMapping, TrustRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use tracing::{info_span, Instrument};

/// Postgres-backed repository over the `trust` table.
///
/// Every statement runs in a transaction that first executes
/// `set_config('app.tenant_id', $1, true)`, so a row-level security policy on
/// `current_setting('app.tenant_id')` confines each call to its tenant.
#[derive(Clone, Debug)]
pub struct PgTrustRepository {
    pool: PgPool,
}

impl PgTrustRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn scoped(&self, tenant_id: &str) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| Error::server("failed to begin trust transaction", err))?;

        let query = "SELECT set_config('app.tenant_id', $1, true)";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(tenant_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| Error::server("failed to scope transaction to tenant", err))?;

        Ok(tx)
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<()> {
        tx.commit()
            .await
            .map_err(|err| Error::server("failed to commit trust transaction", err))
    }
}

fn not_found(tenant_id: &str) -> Error {
    Error::not_found(format!("no mapping for tenant {tenant_id}"))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn encode_properties(properties: &BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(properties)
        .map_err(|err| Error::server("failed to encode mapping properties", err))
}

fn mapping_from_row(row: &PgRow) -> Result<OidcMapping> {
    let properties: Option<String> = row.get("properties");
    let properties = match properties {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|err| Error::server("failed to decode mapping properties", err))?,
        None => BTreeMap::new(),
    };
    let audiences: Option<Vec<String>> = row.get("audiences");

    Ok(OidcMapping {
        tenant_id: row.get("tenant_id"),
        issuer_url: row.get("issuer"),
        blocked: row.get("blocked"),
        jwks_uri: row.get("jwks_uri"),
        audiences: audiences.unwrap_or_default(),
        properties,
    })
}

#[async_trait]
impl TrustRepository for PgTrustRepository {
    async fn get(&self, tenant_id: &str) -> Result<OidcMapping> {
        let mut tx = self.scoped(tenant_id).await?;

        let query = r"
            SELECT tenant_id, blocked, issuer, jwks_uri, audiences, properties::text AS properties
            FROM trust
            WHERE tenant_id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| Error::server("failed to load mapping", err))?;

        Self::commit(tx).await?;

        row.as_ref()
            .map(mapping_from_row)
            .transpose()?
            .ok_or_else(|| not_found(tenant_id))
    }

    async fn create(&self, mapping: &OidcMapping) -> Result<()> {
        let properties = encode_properties(&mapping.properties)?;
        let mut tx = self.scoped(&mapping.tenant_id).await?;

        let query = r"
            INSERT INTO trust
                (tenant_id, blocked, issuer, jwks_uri, audiences, properties)
            VALUES ($1, $2, $3, $4, $5, $6::jsonb)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&mapping.tenant_id)
            .bind(mapping.blocked)
            .bind(&mapping.issuer_url)
            .bind(mapping.jwks_uri.as_deref())
            .bind(&mapping.audiences)
            .bind(properties)
            .execute(&mut *tx)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Self::commit(tx).await,
            Err(err) if is_unique_violation(&err) => {
                let _ = tx.rollback().await;
                Err(Error::Conflict(format!(
                    "mapping for tenant {} already exists",
                    mapping.tenant_id
                )))
            }
            Err(err) => Err(Error::server("failed to insert mapping", err)),
        }
    }

    async fn update(&self, mapping: &OidcMapping) -> Result<()> {
        let properties = encode_properties(&mapping.properties)?;
        let mut tx = self.scoped(&mapping.tenant_id).await?;

        let query = r"
            UPDATE trust
            SET issuer = $2, jwks_uri = $3, audiences = $4, properties = $5::jsonb
            WHERE tenant_id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&mapping.tenant_id)
            .bind(&mapping.issuer_url)
            .bind(mapping.jwks_uri.as_deref())
            .bind(&mapping.audiences)
            .bind(properties)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| Error::server("failed to update mapping", err))?;

        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(not_found(&mapping.tenant_id));
        }
        Self::commit(tx).await
    }

    async fn delete(&self, tenant_id: &str) -> Result<()> {
        let mut tx = self.scoped(tenant_id).await?;

        let query = "DELETE FROM trust WHERE tenant_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(tenant_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| Error::server("failed to delete mapping", err))?;

        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(not_found(tenant_id));
        }
        Self::commit(tx).await
    }

    async fn set_blocked(&self, tenant_id: &str, blocked: bool) -> Result<()> {
        let mut tx = self.scoped(tenant_id).await?;

        let query = "UPDATE trust SET blocked = $2 WHERE tenant_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(tenant_id)
            .bind(blocked)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| Error::server("failed to update block flag", err))?;

        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(not_found(tenant_id));
        }
        Self::commit(tx).await
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|_| ())
            .map_err(|err| Error::server("database ping failed", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    #[test]
    fn unique_violation_is_detected_by_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23503"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    // Runs only when SESSIOND_TEST_DSN points at a disposable database.
    #[tokio::test]
    async fn tenant_scoped_round_trip() {
        let Ok(dsn) = std::env::var("SESSIOND_TEST_DSN") else {
            return;
        };
        let pool = PgPool::connect(&dsn).await.expect("connect");
        sqlx::raw_sql(include_str!("../../sql/schema.sql"))
            .execute(&pool)
            .await
            .expect("schema");

        let repo = PgTrustRepository::new(pool);
        let tenant = format!("it-{}", ulid::Ulid::new().to_string().to_lowercase());
        let mapping = OidcMapping::new(tenant.as_str(), "https://idp.example")
            .with_audiences(["web"])
            .with_property("client_id", "web");

        repo.create(&mapping).await.expect("create");
        assert!(repo.create(&mapping).await.unwrap_err().is_conflict());
        assert_eq!(repo.get(&tenant).await.expect("get"), mapping);

        repo.set_blocked(&tenant, true).await.expect("block");
        assert!(repo.get(&tenant).await.expect("get").blocked);

        repo.delete(&tenant).await.expect("delete");
        assert!(repo.get(&tenant).await.unwrap_err().is_not_found());
    }

    #[test]
    fn properties_encode_as_json_object() {
        let mut properties = BTreeMap::new();
        properties.insert("client_secret".to_string(), "s".to_string());
        assert_eq!(
            encode_properties(&properties).expect("encode"),
            r#"{"client_secret":"s"}"#
        );
    }
}
