use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    ReviewableId, ReviewableKind, ReviewableStatus, TopicId, UserId, UserSummary,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewReviewable {
    pub kind: ReviewableKind,
    pub topic_id: Option<TopicId>,
    pub target_id: Option<i64>,
    pub created_by: Option<UserId>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct StoredReviewable {
    pub reviewable_id: ReviewableId,
    pub kind: ReviewableKind,
    pub status: ReviewableStatus,
    pub version: i64,
    pub topic_id: Option<TopicId>,
    pub target_id: Option<i64>,
    pub created_by: Option<UserId>,
    pub claimed_by: Option<UserId>,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActionRecord {
    pub action_id: String,
    pub user_id: UserId,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct StoredAction {
    pub reviewable_id: ReviewableId,
    pub action_id: String,
    pub user_id: UserId,
    pub status_after: ReviewableStatus,
    pub version_after: i64,
    pub args: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Result of a version compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Committed { version: i64 },
    VersionMismatch,
}

const REVIEWABLE_COLUMNS: &str = "r.id, r.kind, r.status, r.version, r.topic_id, r.target_id, r.created_by, c.user_id AS claimed_by, r.fields, r.created_at, r.updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str, moderator: bool) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username, moderator) VALUES (?, ?)
             ON CONFLICT(username) DO UPDATE SET moderator = excluded.moderator
             RETURNING id",
        )
        .bind(username)
        .bind(moderator)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn load_user(&self, user_id: UserId) -> Result<Option<UserSummary>> {
        let row = sqlx::query("SELECT id, username, moderator FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserSummary {
            user_id: UserId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
            moderator: r.get::<bool, _>(2),
        }))
    }

    pub async fn create_reviewable(&self, reviewable: &NewReviewable) -> Result<ReviewableId> {
        let fields = serde_json::to_string(&reviewable.fields)?;
        let rec = sqlx::query(
            "INSERT INTO reviewables (kind, status, version, topic_id, target_id, created_by, fields)
             VALUES (?, 'pending', 0, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(reviewable.kind.as_str())
        .bind(reviewable.topic_id.map(|t| t.0))
        .bind(reviewable.target_id)
        .bind(reviewable.created_by.map(|u| u.0))
        .bind(fields)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert reviewable")?;
        Ok(ReviewableId(rec.get::<i64, _>(0)))
    }

    pub async fn load_reviewable(
        &self,
        reviewable_id: ReviewableId,
    ) -> Result<Option<StoredReviewable>> {
        let row = sqlx::query(&format!(
            "SELECT {REVIEWABLE_COLUMNS}
             FROM reviewables r
             LEFT JOIN reviewable_claims c ON c.reviewable_id = r.id
             WHERE r.id = ?"
        ))
        .bind(reviewable_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_reviewable).transpose()
    }

    /// Pending reviewables in id order, optionally restricted to one topic.
    pub async fn list_pending_reviewables(
        &self,
        topic_id: Option<TopicId>,
    ) -> Result<Vec<StoredReviewable>> {
        let rows = if let Some(topic_id) = topic_id {
            sqlx::query(&format!(
                "SELECT {REVIEWABLE_COLUMNS}
                 FROM reviewables r
                 LEFT JOIN reviewable_claims c ON c.reviewable_id = r.id
                 WHERE r.status = 'pending' AND r.topic_id = ?
                 ORDER BY r.id ASC"
            ))
            .bind(topic_id.0)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {REVIEWABLE_COLUMNS}
                 FROM reviewables r
                 LEFT JOIN reviewable_claims c ON c.reviewable_id = r.id
                 WHERE r.status = 'pending'
                 ORDER BY r.id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };
        rows.iter().map(map_reviewable).collect()
    }

    /// Replaces the stored fields and bumps the version by one, but only if
    /// the stored version still equals `expected_version` and the reviewable
    /// is pending. The check and the write are one statement.
    pub async fn update_fields_if_version(
        &self,
        reviewable_id: ReviewableId,
        expected_version: i64,
        fields: &Map<String, Value>,
    ) -> Result<CasOutcome> {
        let fields = serde_json::to_string(fields)?;
        let row = sqlx::query(
            "UPDATE reviewables
             SET fields = ?, version = version + 1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND version = ? AND status = 'pending'
             RETURNING version",
        )
        .bind(fields)
        .bind(reviewable_id.0)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to update fields of reviewable {}", reviewable_id.0))?;

        Ok(match row {
            Some(row) => CasOutcome::Committed {
                version: row.get::<i64, _>(0),
            },
            None => CasOutcome::VersionMismatch,
        })
    }

    /// Moves a pending reviewable to `status` and appends the action to its
    /// history in one transaction, guarded by the same version check as
    /// [`Storage::update_fields_if_version`].
    pub async fn transition_if_version(
        &self,
        reviewable_id: ReviewableId,
        expected_version: i64,
        status: ReviewableStatus,
        action: &NewActionRecord,
    ) -> Result<CasOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE reviewables
             SET status = ?, version = version + 1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND version = ? AND status = 'pending'
             RETURNING version",
        )
        .bind(status.as_str())
        .bind(reviewable_id.0)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("failed to transition reviewable {}", reviewable_id.0))?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(CasOutcome::VersionMismatch);
        };
        let version = row.get::<i64, _>(0);

        sqlx::query(
            "INSERT INTO reviewable_actions (reviewable_id, action_id, user_id, status_after, version_after, args)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reviewable_id.0)
        .bind(&action.action_id)
        .bind(action.user_id.0)
        .bind(status.as_str())
        .bind(version)
        .bind(serde_json::to_string(&action.args)?)
        .execute(&mut *tx)
        .await
        .context("failed to record reviewable action")?;

        sqlx::query("DELETE FROM reviewable_claims WHERE reviewable_id = ?")
            .bind(reviewable_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CasOutcome::Committed { version })
    }

    pub async fn list_actions(&self, reviewable_id: ReviewableId) -> Result<Vec<StoredAction>> {
        let rows = sqlx::query(
            "SELECT reviewable_id, action_id, user_id, status_after, version_after, args, created_at
             FROM reviewable_actions
             WHERE reviewable_id = ?
             ORDER BY id ASC",
        )
        .bind(reviewable_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(StoredAction {
                    reviewable_id: ReviewableId(r.get::<i64, _>(0)),
                    action_id: r.get::<String, _>(1),
                    user_id: UserId(r.get::<i64, _>(2)),
                    status_after: parse_status(&r.get::<String, _>(3))?,
                    version_after: r.get::<i64, _>(4),
                    args: parse_fields(&r.get::<String, _>(5))?,
                    created_at: r.get::<DateTime<Utc>, _>(6),
                })
            })
            .collect()
    }

    /// Claims a reviewable for `user_id` unless someone already holds it.
    /// Returns the claimant after the attempt.
    pub async fn claim_reviewable(
        &self,
        reviewable_id: ReviewableId,
        user_id: UserId,
    ) -> Result<UserId> {
        sqlx::query(
            "INSERT INTO reviewable_claims (reviewable_id, user_id) VALUES (?, ?)
             ON CONFLICT(reviewable_id) DO NOTHING",
        )
        .bind(reviewable_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        let claimant: i64 =
            sqlx::query_scalar("SELECT user_id FROM reviewable_claims WHERE reviewable_id = ?")
                .bind(reviewable_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(UserId(claimant))
    }

    pub async fn release_claim(&self, reviewable_id: ReviewableId, user_id: UserId) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM reviewable_claims WHERE reviewable_id = ? AND user_id = ?")
                .bind(reviewable_id.0)
                .bind(user_id.0)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks the reviewable's subject (post or user) as gone.
    pub async fn clear_target(&self, reviewable_id: ReviewableId) -> Result<bool> {
        let result = sqlx::query("UPDATE reviewables SET target_id = NULL WHERE id = ?")
            .bind(reviewable_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_reviewable(r: &SqliteRow) -> Result<StoredReviewable> {
    Ok(StoredReviewable {
        reviewable_id: ReviewableId(r.get::<i64, _>("id")),
        kind: ReviewableKind::from_str(&r.get::<String, _>("kind")).map_err(|e| anyhow!(e))?,
        status: parse_status(&r.get::<String, _>("status"))?,
        version: r.get::<i64, _>("version"),
        topic_id: r.get::<Option<i64>, _>("topic_id").map(TopicId),
        target_id: r.get::<Option<i64>, _>("target_id"),
        created_by: r.get::<Option<i64>, _>("created_by").map(UserId),
        claimed_by: r.get::<Option<i64>, _>("claimed_by").map(UserId),
        fields: parse_fields(&r.get::<String, _>("fields"))?,
        created_at: r.get::<DateTime<Utc>, _>("created_at"),
        updated_at: r.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn parse_status(raw: &str) -> Result<ReviewableStatus> {
    ReviewableStatus::from_str(raw).map_err(|e| anyhow!(e))
}

fn parse_fields(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).context("stored reviewable fields are not a JSON object")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
