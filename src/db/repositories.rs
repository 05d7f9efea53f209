//! Queries: messages, chats (+ unread counters), visitor_stats (+ unique, hourly).

use crate::error::{AppError, AppResult};
use crate::models::{
    Attachment, Conversation, ConversationKey, DailyStats, HourlySlot, Message, MessageId,
    MessageStatus, MessageType, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};

use super::DbPool;

// ---- Messages ----

#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub message_type: String,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let status: MessageStatus = row
            .status
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
        let message_type: MessageType = row
            .message_type
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
        let attachment = row.attachment_url.map(|url| Attachment {
            url,
            name: row.attachment_name,
        });
        Ok(Message {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            body: row.body,
            message_type,
            attachment,
            status,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
            seen_at: row.seen_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, body, message_type, attachment_url, \
     attachment_name, status, created_at, delivered_at, seen_at";

async fn message_insert(conn: &mut sqlx::PgConnection, m: &Message) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO messages (id, sender_id, recipient_id, body, message_type,
                              attachment_url, attachment_name, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&m.id)
    .bind(&m.sender_id)
    .bind(&m.recipient_id)
    .bind(&m.body)
    .bind(m.message_type.as_str())
    .bind(m.attachment.as_ref().map(|a| a.url.as_str()))
    .bind(m.attachment.as_ref().and_then(|a| a.name.as_deref()))
    .bind(m.status.as_str())
    .bind(m.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert the message and record it in its chat in one transaction.
pub async fn message_insert_with_chat(
    pool: &DbPool,
    key: &ConversationKey,
    m: &Message,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    message_insert(&mut *tx, m).await?;
    chat_record_message(&mut *tx, key, m).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn message_get(pool: &DbPool, id: &str) -> AppResult<Option<Message>> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {} FROM messages WHERE id = $1",
        MESSAGE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(Message::try_from).transpose()
}

pub async fn messages_mark_delivered(
    pool: &DbPool,
    ids: &[MessageId],
    at: DateTime<Utc>,
) -> AppResult<Vec<MessageId>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        UPDATE messages SET status = 'delivered', delivered_at = $2
        WHERE id = ANY($1) AND status = 'sent'
        RETURNING id
        "#,
    )
    .bind(ids)
    .bind(at)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn messages_deliver_pending(
    pool: &DbPool,
    recipient: &str,
    from: Option<&str>,
    at: DateTime<Utc>,
) -> AppResult<Vec<(UserId, MessageId)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        UPDATE messages SET status = 'delivered', delivered_at = $2
        WHERE recipient_id = $1 AND status = 'sent' AND ($3::text IS NULL OR sender_id = $3)
        RETURNING sender_id, id
        "#,
    )
    .bind(recipient)
    .bind(at)
    .bind(from)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn messages_mark_seen(
    conn: &mut sqlx::PgConnection,
    sender: &str,
    viewer: &str,
    at: DateTime<Utc>,
) -> AppResult<Vec<MessageId>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        UPDATE messages
        SET status = 'seen', seen_at = $3, delivered_at = COALESCE(delivered_at, $3)
        WHERE sender_id = $1 AND recipient_id = $2 AND status IN ('sent', 'delivered')
        RETURNING id
        "#,
    )
    .bind(sender)
    .bind(viewer)
    .bind(at)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Mark `sender -> viewer` messages seen and reset the viewer's unread counter
/// in one transaction.
pub async fn messages_mark_seen_with_chat(
    pool: &DbPool,
    key: &ConversationKey,
    sender: &str,
    viewer: &str,
    at: DateTime<Utc>,
) -> AppResult<Vec<MessageId>> {
    let mut tx = pool.begin().await?;
    let seen = messages_mark_seen(&mut *tx, sender, viewer, at).await?;
    chat_reset_unread(&mut *tx, key, viewer).await?;
    tx.commit().await?;
    Ok(seen)
}

pub async fn messages_between(
    pool: &DbPool,
    a: &str,
    b: &str,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        r#"
        SELECT {} FROM messages
        WHERE (sender_id = $1 AND recipient_id = $2) OR (sender_id = $2 AND recipient_id = $1)
        ORDER BY created_at ASC, id ASC
        LIMIT $3 OFFSET $4
        "#,
        MESSAGE_COLUMNS
    ))
    .bind(a)
    .bind(b)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Message::try_from).collect()
}

// ---- Chats ----

#[derive(Debug, FromRow)]
pub struct ChatRow {
    pub id: String,
    pub participant_low: String,
    pub participant_high: String,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Upsert the chat row; the last-message pointer only moves to a strictly newer message.
async fn chat_record_message(
    conn: &mut sqlx::PgConnection,
    key: &ConversationKey,
    m: &Message,
) -> AppResult<()> {
    let [low, high] = key.participants();
    sqlx::query(
        r#"
        INSERT INTO chats (id, participant_low, participant_high, last_message_id, last_message_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE
        SET last_message_id = EXCLUDED.last_message_id,
            last_message_at = EXCLUDED.last_message_at
        WHERE chats.last_message_at IS NULL OR chats.last_message_at < EXCLUDED.last_message_at
        "#,
    )
    .bind(key.id())
    .bind(low)
    .bind(high)
    .bind(&m.id)
    .bind(m.created_at)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r#"
        INSERT INTO chat_unread (chat_id, user_id, count)
        VALUES ($1, $2, 1)
        ON CONFLICT (chat_id, user_id) DO UPDATE SET count = chat_unread.count + 1
        "#,
    )
    .bind(key.id())
    .bind(&m.recipient_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn chat_reset_unread(
    conn: &mut sqlx::PgConnection,
    key: &ConversationKey,
    user_id: &str,
) -> AppResult<()> {
    sqlx::query("UPDATE chat_unread SET count = 0 WHERE chat_id = $1 AND user_id = $2")
        .bind(key.id())
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn chat_unread_map(pool: &DbPool, chat_id: &str) -> AppResult<HashMap<UserId, u32>> {
    let rows: Vec<(String, i32)> =
        sqlx::query_as("SELECT user_id, count FROM chat_unread WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(user, count)| (user, count.max(0) as u32))
        .collect())
}

async fn conversation_from_row(pool: &DbPool, row: ChatRow) -> AppResult<Conversation> {
    let unread = chat_unread_map(pool, &row.id).await?;
    Ok(Conversation {
        key: ConversationKey::new(&row.participant_low, &row.participant_high),
        last_message_id: row.last_message_id,
        last_message_at: row.last_message_at,
        unread,
    })
}

pub async fn chat_get(pool: &DbPool, key: &ConversationKey) -> AppResult<Option<Conversation>> {
    let row = sqlx::query_as::<_, ChatRow>(
        "SELECT id, participant_low, participant_high, last_message_id, last_message_at FROM chats WHERE id = $1",
    )
    .bind(key.id())
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(conversation_from_row(pool, row).await?)),
        None => Ok(None),
    }
}

pub async fn chats_list_by_user(pool: &DbPool, user_id: &str) -> AppResult<Vec<Conversation>> {
    let rows = sqlx::query_as::<_, ChatRow>(
        r#"
        SELECT id, participant_low, participant_high, last_message_id, last_message_at
        FROM chats
        WHERE participant_low = $1 OR participant_high = $1
        ORDER BY last_message_at DESC NULLS LAST
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(conversation_from_row(pool, row).await?);
    }
    Ok(out)
}

// ---- Visitor stats ----

#[derive(Debug, FromRow)]
pub struct VisitorStatsRow {
    pub day: NaiveDate,
    pub total_visitors: i64,
    pub peak_visitors: i64,
    pub orders_received: i64,
}

/// Create the day with all 24 zeroed hourly slots if it does not exist yet.
async fn stats_ensure_day<'e, E>(executor: E, day: NaiveDate) -> AppResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        WITH created AS (
            INSERT INTO visitor_stats (day) VALUES ($1)
            ON CONFLICT (day) DO NOTHING
            RETURNING day
        )
        INSERT INTO visitor_stats_hourly (day, hour)
        SELECT created.day, h::smallint FROM created, generate_series(0, 23) AS h
        "#,
    )
    .bind(day)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn stats_record_visitor(
    pool: &DbPool,
    day: NaiveDate,
    hour: u32,
    visitor_key: &str,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    stats_ensure_day(&mut *tx, day).await?;
    sqlx::query("UPDATE visitor_stats SET total_visitors = total_visitors + 1 WHERE day = $1")
        .bind(day)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO visitor_stats_unique (day, visitor_key) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(day)
    .bind(visitor_key)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE visitor_stats_hourly SET visitors = visitors + 1 WHERE day = $1 AND hour = $2")
        .bind(day)
        .bind(hour as i16)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn stats_record_order(pool: &DbPool, day: NaiveDate, hour: u32) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    stats_ensure_day(&mut *tx, day).await?;
    sqlx::query("UPDATE visitor_stats SET orders_received = orders_received + 1 WHERE day = $1")
        .bind(day)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE visitor_stats_hourly SET orders = orders + 1 WHERE day = $1 AND hour = $2")
        .bind(day)
        .bind(hour as i16)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn stats_update_peak(pool: &DbPool, day: NaiveDate, active: u64) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    stats_ensure_day(&mut *tx, day).await?;
    sqlx::query("UPDATE visitor_stats SET peak_visitors = GREATEST(peak_visitors, $2) WHERE day = $1")
        .bind(day)
        .bind(active as i64)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn stats_hydrate(pool: &DbPool, row: VisitorStatsRow) -> AppResult<DailyStats> {
    let keys: Vec<(String,)> =
        sqlx::query_as("SELECT visitor_key FROM visitor_stats_unique WHERE day = $1")
            .bind(row.day)
            .fetch_all(pool)
            .await?;
    let slots: Vec<(i16, i64, i64)> = sqlx::query_as(
        "SELECT hour, visitors, orders FROM visitor_stats_hourly WHERE day = $1 ORDER BY hour",
    )
    .bind(row.day)
    .fetch_all(pool)
    .await?;

    let mut stats = DailyStats::empty(row.day);
    stats.total_visitors = row.total_visitors.max(0) as u64;
    stats.peak_visitors = row.peak_visitors.max(0) as u64;
    stats.orders_received = row.orders_received.max(0) as u64;
    stats.unique_visitors = keys.into_iter().map(|k| k.0).collect::<BTreeSet<_>>();
    for (hour, visitors, orders) in slots {
        if let Some(slot) = stats.hourly.get_mut(hour as usize) {
            *slot = HourlySlot {
                hour: hour as u8,
                visitors: visitors.max(0) as u64,
                orders: orders.max(0) as u64,
            };
        }
    }
    Ok(stats)
}

pub async fn stats_get(pool: &DbPool, day: NaiveDate) -> AppResult<Option<DailyStats>> {
    let row = sqlx::query_as::<_, VisitorStatsRow>(
        "SELECT day, total_visitors, peak_visitors, orders_received FROM visitor_stats WHERE day = $1",
    )
    .bind(day)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(stats_hydrate(pool, row).await?)),
        None => Ok(None),
    }
}

pub async fn stats_range(
    pool: &DbPool,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> AppResult<Vec<DailyStats>> {
    let rows = sqlx::query_as::<_, VisitorStatsRow>(
        r#"
        SELECT day, total_visitors, peak_visitors, orders_received FROM visitor_stats
        WHERE ($1::date IS NULL OR day >= $1) AND ($2::date IS NULL OR day <= $2)
        ORDER BY day DESC
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(stats_hydrate(pool, row).await?);
    }
    Ok(out)
}
