//! Database layer for Sweeper.
//!
//! Uses PostgreSQL via sqlx. [`PgJobStore`] implements every job's store
//! contract against the shared schema (`posts`, `answers`, `approaches`,
//! `comments`, `notifications`, `claim_tokens`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, Result, SweeperError};
use crate::jobs::cleanup::ClaimTokenStore;
use crate::jobs::embedding::{ContentType, EmbeddingCandidate, EmbeddingStore};
use crate::jobs::moderation::{ModerationCandidate, ModerationStore, MODERATOR_AUTHOR_ID};
use crate::jobs::stale::StaleContentStore;
use crate::jobs::translation::{TranslationCandidate, TranslationStore, MAX_TRANSLATION_ATTEMPTS};

/// Notification type used for stale-approach warnings.
pub const ABANDONMENT_WARNING: &str = "approach_abandonment_warning";

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(SweeperError::new(
                ErrorCode::MissingConfiguration,
                "database url is required",
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(config.url.expose())
            .await?;

        debug!(max_connections = config.max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Format a vector as a pgvector literal, e.g. `[0.1,0.2,0.3]`.
pub fn vector_literal(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn cutoff(older_than: Duration) -> Result<DateTime<Utc>> {
    let age = chrono::Duration::from_std(older_than).map_err(|e| {
        SweeperError::invalid_input(format!("threshold out of range: {:?}", older_than))
            .with_source(e)
    })?;
    Ok(Utc::now() - age)
}

fn count(n: i64) -> u64 {
    n.max(0) as u64
}

/// Store implementation shared by all jobs.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Embedding
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl EmbeddingStore for PgJobStore {
    async fn count_without_embedding(&self, kind: ContentType) -> Result<u64> {
        let sql = match kind {
            ContentType::Posts => {
                "SELECT COUNT(*) FROM posts WHERE deleted_at IS NULL AND embedding IS NULL"
            }
            ContentType::Answers => {
                "SELECT COUNT(*) FROM answers WHERE deleted_at IS NULL AND embedding IS NULL"
            }
            ContentType::Approaches => {
                "SELECT COUNT(*) FROM approaches WHERE deleted_at IS NULL AND embedding IS NULL"
            }
        };
        let n: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count(n))
    }

    async fn fetch_without_embedding(
        &self,
        kind: ContentType,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<EmbeddingCandidate>> {
        let limit = i64::from(limit);
        let offset = offset as i64;

        let items = match kind {
            ContentType::Posts => sqlx::query_as::<_, (String, String, String)>(
                r#"
                SELECT id::text, title, description FROM posts
                WHERE deleted_at IS NULL AND embedding IS NULL
                ORDER BY created_at ASC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(id, title, description)| EmbeddingCandidate::Post {
                id,
                title,
                description,
            })
            .collect(),

            ContentType::Answers => sqlx::query_as::<_, (String, String)>(
                r#"
                SELECT id::text, content FROM answers
                WHERE deleted_at IS NULL AND embedding IS NULL
                ORDER BY created_at ASC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(id, content)| EmbeddingCandidate::Answer { id, content })
            .collect(),

            ContentType::Approaches => sqlx::query_as::<_, (String, String, String, String, String)>(
                r#"
                SELECT id::text, COALESCE(angle, ''), COALESCE(method, ''),
                       COALESCE(outcome, ''), COALESCE(solution, '')
                FROM approaches
                WHERE deleted_at IS NULL AND embedding IS NULL
                ORDER BY created_at ASC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(id, angle, method, outcome, solution)| EmbeddingCandidate::Approach {
                id,
                angle,
                method,
                outcome,
                solution,
            })
            .collect(),
        };

        Ok(items)
    }

    async fn update_embedding(&self, kind: ContentType, id: &str, embedding: &[f32]) -> Result<()> {
        let sql = match kind {
            ContentType::Posts => {
                "UPDATE posts SET embedding = $1::vector, updated_at = NOW() WHERE id = $2::uuid AND deleted_at IS NULL"
            }
            ContentType::Answers => {
                "UPDATE answers SET embedding = $1::vector WHERE id = $2::uuid AND deleted_at IS NULL"
            }
            ContentType::Approaches => {
                "UPDATE approaches SET embedding = $1::vector WHERE id = $2::uuid AND deleted_at IS NULL"
            }
        };
        sqlx::query(sql)
            .bind(vector_literal(embedding))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Moderation
// ═══════════════════════════════════════════════════════════════════════════════

impl PgJobStore {
    async fn set_post_status(&self, post_id: &str, status: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = $1, moderated_at = NOW(), updated_at = NOW()
            WHERE id = $2::uuid AND deleted_at IS NULL
            "#,
        )
        .bind(status)
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        ensure_post_updated(post_id, result.rows_affected())
    }
}

fn ensure_post_updated(post_id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        return Err(SweeperError::new(ErrorCode::RecordNotFound, "Post not found")
            .with_internal_message(format!("post {} not found", post_id)));
    }
    Ok(())
}

#[async_trait]
impl ModerationStore for PgJobStore {
    async fn count_open_posts(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE status = 'open' AND moderated_at IS NULL AND deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }

    async fn fetch_open_posts(&self, limit: u32, offset: u64) -> Result<Vec<ModerationCandidate>> {
        let rows = sqlx::query_as::<_, (String, String, String, Vec<String>)>(
            r#"
            SELECT id::text, title, description, COALESCE(tags, '{}')
            FROM posts
            WHERE status = 'open' AND moderated_at IS NULL AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, description, tags)| ModerationCandidate {
                id,
                title,
                description,
                tags,
            })
            .collect())
    }

    async fn mark_moderated(&self, post_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE posts SET moderated_at = NOW() WHERE id = $1::uuid AND deleted_at IS NULL",
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        ensure_post_updated(post_id, result.rows_affected())
    }

    async fn reject_post(&self, post_id: &str) -> Result<()> {
        self.set_post_status(post_id, "rejected").await
    }

    async fn publish_post(&self, post_id: &str) -> Result<()> {
        self.set_post_status(post_id, "open").await
    }

    async fn create_system_comment(&self, post_id: &str, content: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO comments (target_type, target_id, author_type, author_id, content)
            VALUES ('post', $1::uuid, 'system', $2, $3)
            "#,
        )
        .bind(post_id)
        .bind(MODERATOR_AUTHOR_ID)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Translation
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TranslationStore for PgJobStore {
    async fn count_needing_translation(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM posts
            WHERE status = 'draft'
              AND original_language IS NOT NULL
              AND translation_attempts < $1
              AND deleted_at IS NULL
            "#,
        )
        .bind(MAX_TRANSLATION_ATTEMPTS)
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }

    async fn fetch_needing_translation(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<TranslationCandidate>> {
        let rows = sqlx::query_as::<_, (String, String, String, Vec<String>, Option<String>)>(
            r#"
            SELECT id::text, title, description, COALESCE(tags, '{}'), original_language
            FROM posts
            WHERE status = 'draft'
              AND original_language IS NOT NULL
              AND translation_attempts < $1
              AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(MAX_TRANSLATION_ATTEMPTS)
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, title, description, tags, original_language)| TranslationCandidate {
                    id,
                    title,
                    description,
                    tags,
                    original_language,
                },
            )
            .collect())
    }

    async fn apply_translation(&self, post_id: &str, title: &str, description: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET original_title       = COALESCE(original_title, title),
                original_description = COALESCE(original_description, description),
                title                = $2,
                description          = $3,
                status               = 'pending_review',
                translation_attempts = translation_attempts + 1,
                updated_at           = NOW()
            WHERE id = $1::uuid AND deleted_at IS NULL
            "#,
        )
        .bind(post_id)
        .bind(title)
        .bind(description)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SweeperError::new(ErrorCode::RecordNotFound, "Post not found")
                .with_internal_message(format!("post {} not found", post_id)));
        }
        Ok(())
    }

    async fn increment_translation_attempts(&self, post_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET translation_attempts = translation_attempts + 1, updated_at = NOW()
            WHERE id = $1::uuid AND deleted_at IS NULL
            "#,
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stale Content
// ═══════════════════════════════════════════════════════════════════════════════

/// Approaches idle between the two cutoffs with no recent warning.
/// Binds: `$1` warning cutoff, `$2` abandon cutoff, `$3` notification type.
const WARNABLE_APPROACHES: &str = r#"
    FROM approaches a
    JOIN posts p ON p.id = a.problem_id
    WHERE a.status IN ('working', 'starting')
      AND a.updated_at < $1
      AND a.updated_at >= $2
      AND a.deleted_at IS NULL
      AND NOT EXISTS (
        SELECT 1 FROM notifications n
        WHERE n.type = $3
          AND n.body LIKE '%' || a.id::text || '%'
          AND n.created_at > $2
      )
"#;

const STALE_APPROACHES: &str = r#"
    WHERE status IN ('working', 'starting')
      AND updated_at < $1
      AND deleted_at IS NULL
"#;

const DORMANT_CANDIDATES: &str = r#"
    WHERE type = 'problem'
      AND status = 'open'
      AND created_at < $1
      AND deleted_at IS NULL
      AND NOT EXISTS (
        SELECT 1 FROM approaches
        WHERE approaches.problem_id = posts.id
          AND approaches.deleted_at IS NULL
      )
"#;

#[derive(sqlx::FromRow)]
struct WarnableApproach {
    id: String,
    author_type: String,
    author_id: String,
    problem_id: String,
    problem_title: String,
}

#[async_trait]
impl StaleContentStore for PgJobStore {
    async fn warn_approaching_abandonment(
        &self,
        warn_after: Duration,
        abandon_after: Duration,
    ) -> Result<u64> {
        let warning_cutoff = cutoff(warn_after)?;
        let abandon_cutoff = cutoff(abandon_after)?;
        let days_left = abandon_after.saturating_sub(warn_after).as_secs() / 86_400;

        let approaches = sqlx::query_as::<_, WarnableApproach>(&format!(
            r#"
            SELECT a.id::text AS id, a.author_type, a.author_id,
                   a.problem_id::text AS problem_id, p.title AS problem_title
            {}
            "#,
            WARNABLE_APPROACHES
        ))
        .bind(warning_cutoff)
        .bind(abandon_cutoff)
        .bind(ABANDONMENT_WARNING)
        .fetch_all(&self.pool)
        .await?;

        let mut warned = 0u64;
        for approach in approaches {
            let (user_id, agent_id) = if approach.author_type == "agent" {
                (None, Some(approach.author_id.as_str()))
            } else {
                (Some(approach.author_id.as_str()), None)
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO notifications (user_id, agent_id, type, title, body, link)
                VALUES ($1::uuid, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(user_id)
            .bind(agent_id)
            .bind(ABANDONMENT_WARNING)
            .bind(format!(
                "Your approach on \"{}\" will be auto-abandoned in {} days",
                approach.problem_title, days_left
            ))
            .bind(format!(
                "Approach {} has been inactive. Update it to prevent auto-abandonment.",
                approach.id
            ))
            .bind(format!("/problems/{}", approach.problem_id))
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => warned += 1,
                Err(err) => warn!(
                    approach_id = %approach.id,
                    error = %err,
                    "Failed to create abandonment warning"
                ),
            }
        }

        Ok(warned)
    }

    async fn abandon_stale_approaches(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE approaches SET status = 'abandoned', updated_at = NOW() {}",
            STALE_APPROACHES
        ))
        .bind(cutoff(older_than)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_dormant_posts(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE posts SET status = 'dormant', updated_at = NOW() {}",
            DORMANT_CANDIDATES
        ))
        .bind(cutoff(older_than)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_approaching_abandonment(
        &self,
        warn_after: Duration,
        abandon_after: Duration,
    ) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", WARNABLE_APPROACHES))
            .bind(cutoff(warn_after)?)
            .bind(cutoff(abandon_after)?)
            .bind(ABANDONMENT_WARNING)
            .fetch_one(&self.pool)
            .await?;
        Ok(count(n))
    }

    async fn count_stale_approaches(&self, older_than: Duration) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM approaches {}",
            STALE_APPROACHES
        ))
        .bind(cutoff(older_than)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }

    async fn count_dormant_posts(&self, older_than: Duration) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM posts {}", DORMANT_CANDIDATES))
            .bind(cutoff(older_than)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(count(n))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cleanup
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ClaimTokenStore for PgJobStore {
    async fn delete_expired_tokens(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM claim_tokens WHERE expires_at < NOW() AND used_at IS NULL",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_expired_tokens(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM claim_tokens WHERE expires_at < NOW() AND used_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[]), "[]");
        assert_eq!(vector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(vector_literal(&[1.0, -2.5]), "[1,-2.5]");
    }

    #[test]
    fn test_cutoff_is_in_the_past() {
        let c = cutoff(Duration::from_secs(86_400)).unwrap();
        let age = Utc::now() - c;
        assert!(age >= chrono::Duration::seconds(86_399));
    }

    #[test]
    fn test_negative_count_clamps() {
        assert_eq!(count(-1), 0);
        assert_eq!(count(7), 7);
    }
}
