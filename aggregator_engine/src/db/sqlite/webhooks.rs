use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewWebhookRetryAttempt, WebhookAttemptStatus, WebhookRetryAttempt},
    traits::{StorageError, WebhookFailure},
};

pub async fn insert_attempt(
    attempt: NewWebhookRetryAttempt,
    conn: &mut SqliteConnection,
) -> Result<WebhookRetryAttempt, StorageError> {
    let now = Utc::now();
    let attempt = sqlx::query_as::<_, WebhookRetryAttempt>(
        r#"
        INSERT INTO webhook_retry_attempts (
            event,
            url,
            payload,
            signature,
            attempt_number,
            next_retry_time,
            status,
            last_error,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, 1, $5, $6, $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(attempt.event)
    .bind(attempt.url)
    .bind(attempt.payload)
    .bind(attempt.signature)
    .bind(attempt.next_retry_time)
    .bind(attempt.status)
    .bind(attempt.last_error)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| StorageError::InsertError(e.to_string()))?;
    debug!("🗃️ Webhook retry #{} ({}) scheduled for {}", attempt.id, attempt.event, attempt.next_retry_time);
    Ok(attempt)
}

pub async fn fetch_attempt(id: i64, conn: &mut SqliteConnection) -> Result<Option<WebhookRetryAttempt>, StorageError> {
    let attempt =
        sqlx::query_as("SELECT * FROM webhook_retry_attempts WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(attempt)
}

pub async fn fetch_due_attempts(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<WebhookRetryAttempt>, StorageError> {
    let attempts = sqlx::query_as(
        r#"SELECT * FROM webhook_retry_attempts
        WHERE status = $1 AND next_retry_time <= $2
        ORDER BY next_retry_time ASC, id ASC
        LIMIT $3"#,
    )
    .bind(WebhookAttemptStatus::Pending)
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(attempts)
}

pub async fn fetch_attempts_by_status(
    status: WebhookAttemptStatus,
    conn: &mut SqliteConnection,
) -> Result<Vec<WebhookRetryAttempt>, StorageError> {
    let attempts = sqlx::query_as("SELECT * FROM webhook_retry_attempts WHERE status = $1 ORDER BY id ASC")
        .bind(status)
        .fetch_all(conn)
        .await?;
    Ok(attempts)
}

pub async fn claim_attempt(
    id: i64,
    expected_next_retry: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"UPDATE webhook_retry_attempts SET next_retry_time = $1, updated_at = $2
        WHERE id = $3 AND status = $4 AND next_retry_time = $5"#,
    )
    .bind(lease_until)
    .bind(Utc::now())
    .bind(id)
    .bind(WebhookAttemptStatus::Pending)
    .bind(expected_next_retry)
    .execute(conn)
    .await?;
    let claimed = result.rows_affected() == 1;
    if !claimed {
        trace!("🗃️ Webhook retry #{id} was claimed by another worker");
    }
    Ok(claimed)
}

pub async fn record_success(
    id: i64,
    expected_attempt_number: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<WebhookRetryAttempt>, StorageError> {
    let attempt = sqlx::query_as::<_, WebhookRetryAttempt>(
        r#"UPDATE webhook_retry_attempts SET status = $1, last_error = NULL, updated_at = $2
        WHERE id = $3 AND status = $4 AND attempt_number = $5
        RETURNING *"#,
    )
    .bind(WebhookAttemptStatus::Success)
    .bind(Utc::now())
    .bind(id)
    .bind(WebhookAttemptStatus::Pending)
    .bind(expected_attempt_number)
    .fetch_optional(conn)
    .await?;
    Ok(attempt)
}

pub async fn record_failure(
    failure: WebhookFailure,
    conn: &mut SqliteConnection,
) -> Result<Option<WebhookRetryAttempt>, StorageError> {
    let attempt = sqlx::query_as::<_, WebhookRetryAttempt>(
        r#"
        UPDATE webhook_retry_attempts SET
            attempt_number = attempt_number + 1,
            status = $1,
            next_retry_time = $2,
            last_error = $3,
            updated_at = $4
        WHERE id = $5 AND status = $6 AND attempt_number = $7
        RETURNING *
        "#,
    )
    .bind(failure.next_status)
    .bind(failure.next_retry_time)
    .bind(&failure.error)
    .bind(Utc::now())
    .bind(failure.attempt_id)
    .bind(WebhookAttemptStatus::Pending)
    .bind(failure.expected_attempt_number)
    .fetch_optional(conn)
    .await?;
    if let Some(a) = &attempt {
        debug!("🗃️ Webhook retry #{} now at attempt {} ({})", a.id, a.attempt_number, a.status);
    }
    Ok(attempt)
}
