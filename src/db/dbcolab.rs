use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{Error as SqlxError, Row, Transaction};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::auth::is_cloud_admin;
use crate::db::util::escape_sql_string_literal;
use crate::models::{CollabError, Identity, NewSnapshot, TokenKind};
use crate::services::ports::{DocumentStore, PermissionChecker};

/// Split a room id of the form `{org}/{document uuid}`.
pub fn parse_room_id(room_id: &str) -> Option<(&str, Uuid)> {
    let (org, doc) = room_id.split_once('/')?;
    if org.is_empty() {
        return None;
    }
    Uuid::parse_str(doc).ok().map(|id| (org, id))
}

/// Postgres backed document store
pub struct DbColab {
    pool: PgPool,
}

impl DbColab {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Begin a transaction scoped to one organization
    async fn begin_for_org(&self, org: &str, action: &str) -> Result<Transaction<'static, Postgres>, SqlxError> {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{} for org {}. Pool connections: {} idle, {} in use",
            action,
            org,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool: {}. Pool state: {} idle, {} total",
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                return Err(e);
            }
        };

        // SET LOCAL doesn't support bind parameters
        let policy_sql = format!("SET LOCAL app.orgs = '{}'", escape_sql_string_literal(org));
        sqlx::query(&policy_sql).execute(&mut *tx).await?;

        Ok(tx)
    }
}

#[async_trait]
impl PermissionChecker for DbColab {
    async fn check_permission(&self, room_id: &str, identity: &Identity) -> Result<bool, CollabError> {
        let Some((org, document_id)) = parse_room_id(room_id) else {
            warn!("Room id '{}' does not name a document", room_id);
            return Ok(false);
        };

        let principals = identity.principals();
        if identity.kind == TokenKind::User && identity.firm_id != org && !is_cloud_admin(&principals) {
            return Ok(false);
        }

        let mut tx = self.begin_for_org(org, &format!("Checking edit access to {}", document_id)).await?;

        let query_sql = r#"
            SELECT EXISTS (
                SELECT 1
                FROM documents d
                LEFT JOIN document_acl da ON d.id = da.document
                WHERE
                    d.org = $1
                    AND (
                            (da.permission = 'edit' AND da.prpl = ANY($2::text[])) OR
                            d.owner = ANY($2::text[]) OR
                            CONCAT($1, '/f/admin') = ANY($2::text[]) OR
                            'r/Colabri-CloudAdmin' = ANY($2::text[])
                    )
                    AND d.id = $3
                    AND d.deleted = FALSE
            ) AS allowed
        "#;

        let row = sqlx::query(query_sql)
            .bind(org)
            .bind(&principals)
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row.try_get("allowed")?)
    }
}

#[async_trait]
impl DocumentStore for DbColab {
    async fn load_document_state(&self, room_id: &str) -> Result<Option<Vec<u8>>, CollabError> {
        let (org, document_id) =
            parse_room_id(room_id).ok_or_else(|| CollabError::NotFound(room_id.to_string()))?;

        let mut tx = self.begin_for_org(org, &format!("Loading document {}", document_id)).await?;

        let query_sql = r#"
            SELECT
                d.current_version,
                v.content
            FROM documents d
                LEFT JOIN document_versions v ON v.document = d.id AND v.version = d.current_version
            WHERE
                d.org = $1
                AND d.id = $2
                AND d.deleted = FALSE
        "#;

        let row = sqlx::query(query_sql)
            .bind(org)
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        match row {
            Some(row) => {
                let content: Option<Vec<u8>> = row.try_get("content")?;
                let version: i32 = row.try_get("current_version")?;
                info!("Document {} loaded at version {}", room_id, version);
                Ok(content)
            }
            None => Err(CollabError::NotFound(room_id.to_string())),
        }
    }

    async fn current_version(&self, room_id: &str) -> Result<Option<u32>, CollabError> {
        let Some((org, document_id)) = parse_room_id(room_id) else {
            return Ok(None);
        };

        let mut tx = self.begin_for_org(org, &format!("Reading version of {}", document_id)).await?;

        let row = sqlx::query(
            "SELECT current_version FROM documents WHERE org = $1 AND id = $2 AND deleted = FALSE",
        )
        .bind(org)
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        match row {
            Some(row) => {
                let version: i32 = row.try_get("current_version")?;
                Ok(Some(version.max(0) as u32))
            }
            None => Ok(None),
        }
    }

    async fn persist_snapshot(&self, room_id: &str, snapshot: &NewSnapshot) -> Result<(), CollabError> {
        let (org, document_id) =
            parse_room_id(room_id).ok_or_else(|| CollabError::NotFound(room_id.to_string()))?;

        let mut tx = self
            .begin_for_org(org, &format!("Writing version {} of {}", snapshot.version, document_id))
            .await?;

        // Lock the document row so concurrent writers serialize on the pointer
        let row = sqlx::query(
            "SELECT current_version FROM documents WHERE org = $1 AND id = $2 AND deleted = FALSE FOR UPDATE",
        )
        .bind(org)
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(CollabError::NotFound(room_id.to_string()));
        };
        let current: i32 = row.try_get("current_version")?;
        if current + 1 != snapshot.version as i32 {
            error!(
                "Version conflict on {}: current {}, writing {}",
                room_id, current, snapshot.version
            );
            return Err(CollabError::Persistence(format!(
                "Version conflict on {}: current {}, writing {}",
                room_id, current, snapshot.version
            )));
        }

        let insert_sql = r#"
            INSERT INTO document_versions(org, document, version, content, plain_text, contributors, size, description, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;
        sqlx::query(insert_sql)
            .bind(org)
            .bind(document_id)
            .bind(snapshot.version as i32)
            .bind(&snapshot.content)
            .bind(&snapshot.plain_text)
            .bind(Json(snapshot.contributors.clone()))
            .bind(snapshot.content.len() as i64)
            .bind(snapshot.description.as_deref())
            .bind(snapshot.created_at)
            .bind(&snapshot.created_by)
            .execute(&mut *tx)
            .await?;

        let update_sql = r#"
            UPDATE documents
            SET current_version = $1,
                updated_at = NOW(),
                updated_by = $2
            WHERE org = $3
                AND id = $4
        "#;
        sqlx::query(update_sql)
            .bind(snapshot.version as i32)
            .bind(&snapshot.created_by)
            .bind(org)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("Document {} moved to version {}", room_id, snapshot.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_ids_need_org_and_uuid() {
        let id = Uuid::new_v4();
        let room = format!("acme/{}", id);
        assert_eq!(parse_room_id(&room), Some(("acme", id)));
        assert_eq!(parse_room_id("draft-1"), None);
        assert_eq!(parse_room_id("acme/not-a-uuid"), None);
        assert_eq!(parse_room_id(&format!("/{}", id)), None);
    }
}
