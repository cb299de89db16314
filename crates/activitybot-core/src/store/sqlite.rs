use std::{collections::HashMap, collections::HashSet, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::{debug, info, warn};

use crate::{
    badges,
    stats::{ActivityHours, update_user_stats},
    types::{
        ActivityPattern, Badge, BadgeRequirement, EarnedBadge, MessageRecord, RecordOutcome,
        ResetSummary, UserStats,
    },
};

use super::ActivityStore;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        discord_id TEXT PRIMARY KEY,
        total_messages INTEGER NOT NULL DEFAULT 0,
        streak INTEGER NOT NULL DEFAULT 0,
        best_streak INTEGER NOT NULL DEFAULT 0,
        last_active_at TEXT,
        night_owl_messages INTEGER NOT NULL DEFAULT 0,
        early_bird_messages INTEGER NOT NULL DEFAULT 0,
        weekend_messages INTEGER NOT NULL DEFAULT 0,
        weekday_messages INTEGER NOT NULL DEFAULT 0,
        first_seen_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        discord_message_id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES users(discord_id),
        channel_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        reaction_count INTEGER NOT NULL DEFAULT 0,
        reply_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
    "CREATE TABLE IF NOT EXISTS activity_patterns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL REFERENCES users(discord_id),
        hour INTEGER NOT NULL,
        day_of_week INTEGER NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (user_id, hour, day_of_week)
    )",
    "CREATE TABLE IF NOT EXISTS badges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        emoji TEXT NOT NULL,
        requirement_type TEXT NOT NULL,
        requirement_counter TEXT,
        requirement_value REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_badges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL REFERENCES users(discord_id),
        badge_id INTEGER NOT NULL REFERENCES badges(id),
        earned_at TEXT NOT NULL,
        UNIQUE (user_id, badge_id)
    )",
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const USER_COLUMNS: &str = "discord_id, total_messages, streak, best_streak, last_active_at,
    night_owl_messages, early_bird_messages, weekend_messages, weekday_messages, first_seen_at";

type UserRow = (
    String,
    i64,
    i64,
    i64,
    Option<DateTime<Utc>>,
    i64,
    i64,
    i64,
    i64,
    DateTime<Utc>,
);

type BadgeRow = (i64, String, String, String, String, Option<String>, f64);

#[derive(Debug, Clone)]
pub struct SqliteActivityStore {
    pool: SqlitePool,
}

impl SqliteActivityStore {
    /// Opens (creating if needed) the database and its schema.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let mut options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid DATABASE_URL `{database_url}`"))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        // Every connection to `:memory:` is a separate database, so pin one.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("SQLite schema ready");
        Ok(())
    }

    /// Starts a unit of work. Dropping it without `commit` rolls it back.
    ///
    /// Units that write must issue a write as their first statement so the
    /// write lock is taken (waiting up to the busy timeout) before any read.
    async fn unit_of_work(&self) -> anyhow::Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    async fn load_catalog(
        tx: &mut Transaction<'static, Sqlite>,
    ) -> anyhow::Result<Vec<(i64, Badge)>> {
        let rows = sqlx::query_as::<_, BadgeRow>(
            "SELECT id, name, description, emoji, requirement_type, requirement_counter, requirement_value
             FROM badges
             ORDER BY id",
        )
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, name, description, emoji, kind, counter, value)| {
                badge_from_columns(name, description, emoji, &kind, counter.as_deref(), value)
                    .map(|badge| (id, badge))
            })
            .collect())
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn seed_badges(&self, catalog: &[Badge]) -> anyhow::Result<()> {
        let mut tx = self.unit_of_work().await?;
        for badge in catalog {
            sqlx::query(
                "INSERT INTO badges (name, description, emoji, requirement_type, requirement_counter, requirement_value)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(&badge.name)
            .bind(&badge.description)
            .bind(&badge.emoji)
            .bind(badge.requirement.kind())
            .bind(badge.requirement.counter().map(|counter| counter.as_str()))
            .bind(badge.requirement.value())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn badge_catalog(&self) -> anyhow::Result<Vec<Badge>> {
        let mut tx = self.unit_of_work().await?;
        let catalog = Self::load_catalog(&mut tx).await?;
        tx.commit().await?;
        Ok(catalog.into_iter().map(|(_, badge)| badge).collect())
    }

    async fn record_message(
        &self,
        message: MessageRecord,
        hours: &ActivityHours,
    ) -> anyhow::Result<Option<RecordOutcome>> {
        let mut tx = self.unit_of_work().await?;

        // Write first: takes the write lock before the dedup read.
        let inserted = sqlx::query(
            "INSERT INTO users (discord_id, first_seen_at)
             VALUES (?, ?)
             ON CONFLICT (discord_id) DO NOTHING",
        )
        .bind(&message.user_id)
        .bind(message.timestamp)
        .execute(&mut *tx)
        .await?;
        let created_user = inserted.rows_affected() > 0;

        let seen = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM messages WHERE discord_message_id = ?",
        )
        .bind(&message.message_id)
        .fetch_one(&mut *tx)
        .await?;
        if seen.0 > 0 {
            debug!(message_id = %message.message_id, "message already recorded");
            return Ok(None);
        }

        let mut stats = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE discord_id = ?"
        ))
        .bind(&message.user_id)
        .fetch_one(&mut *tx)
        .await
        .map(user_from_row)?;
        update_user_stats(&mut stats, message.timestamp, hours);

        sqlx::query(
            "INSERT INTO users (discord_id, total_messages, streak, best_streak, last_active_at,
                 night_owl_messages, early_bird_messages, weekend_messages, weekday_messages, first_seen_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (discord_id) DO UPDATE SET
                 total_messages = excluded.total_messages,
                 streak = excluded.streak,
                 best_streak = excluded.best_streak,
                 last_active_at = excluded.last_active_at,
                 night_owl_messages = excluded.night_owl_messages,
                 early_bird_messages = excluded.early_bird_messages,
                 weekend_messages = excluded.weekend_messages,
                 weekday_messages = excluded.weekday_messages",
        )
        .bind(&stats.user_id)
        .bind(stats.total_messages)
        .bind(stats.streak)
        .bind(stats.best_streak)
        .bind(stats.last_active_at)
        .bind(stats.night_owl_messages)
        .bind(stats.early_bird_messages)
        .bind(stats.weekend_messages)
        .bind(stats.weekday_messages)
        .bind(stats.first_seen_at)
        .execute(&mut *tx)
        .await?;

        // Plain INSERT: the unique message id backs up the dedup check.
        sqlx::query(
            "INSERT INTO messages (discord_message_id, user_id, channel_id, timestamp, reaction_count, reply_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.message_id)
        .bind(&message.user_id)
        .bind(&message.channel_id)
        .bind(message.timestamp)
        .bind(message.reaction_count)
        .bind(message.reply_count)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO activity_patterns (user_id, hour, day_of_week, message_count)
             VALUES (?, ?, ?, 1)
             ON CONFLICT (user_id, hour, day_of_week)
             DO UPDATE SET message_count = message_count + 1",
        )
        .bind(&message.user_id)
        .bind(i64::from(message.timestamp.hour()))
        .bind(i64::from(message.timestamp.weekday().num_days_from_monday()))
        .execute(&mut *tx)
        .await?;

        let catalog = Self::load_catalog(&mut tx).await?;
        let held = sqlx::query_as::<_, (String,)>(
            "SELECT b.name
             FROM user_badges ub
             JOIN badges b ON b.id = ub.badge_id
             WHERE ub.user_id = ?",
        )
        .bind(&message.user_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| row.0)
        .collect::<HashSet<_>>();

        let badge_ids = catalog
            .iter()
            .map(|(id, badge)| (badge.name.clone(), *id))
            .collect::<HashMap<_, _>>();
        let catalog = catalog.into_iter().map(|(_, badge)| badge).collect::<Vec<_>>();
        let new_badges = badges::evaluate(&stats, &catalog, &held);

        let earned_at = Utc::now();
        for badge in &new_badges {
            let Some(badge_id) = badge_ids.get(&badge.name) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO user_badges (user_id, badge_id, earned_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT (user_id, badge_id) DO NOTHING",
            )
            .bind(&message.user_id)
            .bind(*badge_id)
            .bind(earned_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Some(RecordOutcome {
            stats,
            created_user,
            new_badges,
        }))
    }

    async fn record_reaction(&self, message_id: &str) -> anyhow::Result<bool> {
        let mut tx = self.unit_of_work().await?;
        let result = sqlx::query(
            "UPDATE messages SET reaction_count = reaction_count + 1 WHERE discord_message_id = ?",
        )
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn message(&self, message_id: &str) -> anyhow::Result<Option<MessageRecord>> {
        let message = sqlx::query_as::<_, (String, String, String, DateTime<Utc>, i64, i64)>(
            "SELECT discord_message_id, user_id, channel_id, timestamp, reaction_count, reply_count
             FROM messages
             WHERE discord_message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .map(
            |(message_id, user_id, channel_id, timestamp, reaction_count, reply_count)| {
                MessageRecord {
                    message_id,
                    user_id,
                    channel_id,
                    timestamp,
                    reaction_count,
                    reply_count,
                }
            },
        );

        Ok(message)
    }

    async fn user_stats(&self, user_id: &str) -> anyhow::Result<Option<UserStats>> {
        let stats = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE discord_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(user_from_row);

        Ok(stats)
    }

    async fn user_badges(&self, user_id: &str) -> anyhow::Result<Vec<EarnedBadge>> {
        let rows = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                String,
                Option<String>,
                f64,
                DateTime<Utc>,
            ),
        >(
            "SELECT b.name, b.description, b.emoji, b.requirement_type, b.requirement_counter,
                    b.requirement_value, ub.earned_at
             FROM user_badges ub
             JOIN badges b ON b.id = ub.badge_id
             WHERE ub.user_id = ?
             ORDER BY ub.earned_at ASC, ub.id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(name, description, emoji, kind, counter, value, earned_at)| {
                badge_from_columns(name, description, emoji, &kind, counter.as_deref(), value)
                    .map(|badge| EarnedBadge { badge, earned_at })
            })
            .collect())
    }

    async fn activity_patterns(&self, user_id: &str) -> anyhow::Result<Vec<ActivityPattern>> {
        let patterns = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT hour, day_of_week, message_count
             FROM activity_patterns
             WHERE user_id = ?
             ORDER BY day_of_week, hour",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(hour, weekday, message_count)| ActivityPattern {
            hour: hour as u32,
            weekday: weekday as u32,
            message_count,
        })
        .collect();

        Ok(patterns)
    }

    async fn ranked_users(&self) -> anyhow::Result<Vec<UserStats>> {
        let users = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users
             ORDER BY total_messages DESC, first_seen_at ASC, discord_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(user_from_row)
        .collect();

        Ok(users)
    }

    async fn badge_glyphs(&self) -> anyhow::Result<HashMap<String, Vec<String>>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT ub.user_id, b.emoji
             FROM user_badges ub
             JOIN badges b ON b.id = ub.badge_id
             ORDER BY ub.earned_at ASC, ub.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut glyphs: HashMap<String, Vec<String>> = HashMap::new();
        for (user_id, emoji) in rows {
            glyphs.entry(user_id).or_default().push(emoji);
        }
        Ok(glyphs)
    }

    async fn message_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashMap<String, i64>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT user_id, COUNT(*)
             FROM messages
             WHERE timestamp >= ?
             GROUP BY user_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        Ok(counts)
    }

    async fn reset(&self) -> anyhow::Result<ResetSummary> {
        let mut tx = self.unit_of_work().await?;
        let user_badges = sqlx::query("DELETE FROM user_badges")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let activity_patterns = sqlx::query("DELETE FROM activity_patterns")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let messages = sqlx::query("DELETE FROM messages")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let users = sqlx::query("DELETE FROM users")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(ResetSummary {
            users,
            messages,
            activity_patterns,
            user_badges,
        })
    }

    async fn backup_to(&self, path: &Path) -> anyhow::Result<()> {
        let target = path
            .to_str()
            .context("backup path is not valid UTF-8")?
            .to_owned();
        sqlx::query("VACUUM INTO ?")
            .bind(target)
            .execute(&self.pool)
            .await?;

        let written = tokio::fs::metadata(path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if written == 0 {
            bail!("VACUUM INTO produced no file at {}", path.display());
        }
        Ok(())
    }

    fn backup_extension(&self) -> &'static str {
        "db"
    }
}

fn user_from_row(row: UserRow) -> UserStats {
    let (
        user_id,
        total_messages,
        streak,
        best_streak,
        last_active_at,
        night_owl_messages,
        early_bird_messages,
        weekend_messages,
        weekday_messages,
        first_seen_at,
    ) = row;

    UserStats {
        user_id,
        total_messages,
        streak,
        best_streak,
        night_owl_messages,
        early_bird_messages,
        weekend_messages,
        weekday_messages,
        last_active_at,
        first_seen_at,
    }
}

fn badge_from_columns(
    name: String,
    description: String,
    emoji: String,
    kind: &str,
    counter: Option<&str>,
    value: f64,
) -> Option<Badge> {
    let Some(requirement) = BadgeRequirement::from_columns(kind, counter, value) else {
        warn!(badge = %name, kind, "skipping badge with unknown requirement");
        return None;
    };
    Some(Badge {
        name,
        description,
        emoji,
        requirement,
    })
}
