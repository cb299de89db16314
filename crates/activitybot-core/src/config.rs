use std::{collections::BTreeSet, collections::HashSet, env, net::SocketAddr, path::PathBuf};

use anyhow::{Context, bail};

use crate::{channels::ChannelPolicy, stats::ActivityHours};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub discord_token: String,
    pub leaderboard_channel_id: Option<u64>,
    pub channels: ChannelPolicy,
    pub admin_ids: HashSet<u64>,
    pub activity_hours: ActivityHours,
    pub command_prefix: String,
    pub command_rate_limit: u32,
    pub command_rate_period_secs: u64,
    pub page_size: usize,
    pub leaderboard_update_interval_secs: u64,
    pub message_fetch_interval_secs: u64,
    pub backfill_limit: usize,
    pub backup_interval_secs: u64,
    pub backup_dir: PathBuf,
    pub storage_backend: StorageBackend,
    pub database_url: String,
    pub http_bind: Option<SocketAddr>,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .context("DISCORD_TOKEN must be set")?;

        let channels = ChannelPolicy {
            tracked: env_id_set("TRACKED_CHANNEL_IDS")?,
            tracked_category: env_optional_id("TRACKED_CATEGORY_ID")?,
            excluded: env_id_set("EXCLUDED_CHANNEL_IDS")?,
            command_channels: env_id_set("COMMAND_CHANNEL_IDS")?,
        };

        let activity_hours = ActivityHours::new(
            parse_hour_set(&env::var("NIGHT_OWL_HOURS").unwrap_or_else(|_| "22-23,0-3".to_owned()))
                .context("invalid NIGHT_OWL_HOURS")?,
            parse_hour_set(&env::var("EARLY_BIRD_HOURS").unwrap_or_else(|_| "5-8".to_owned()))
                .context("invalid EARLY_BIRD_HOURS")?,
        );

        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_owned())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "sqlite" => StorageBackend::Sqlite,
            "memory" => StorageBackend::Memory,
            other => bail!("unknown STORAGE_BACKEND `{other}`; valid values are sqlite|memory"),
        };

        let http_bind = env::var("HTTP_BIND")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.trim().parse::<SocketAddr>())
            .transpose()
            .context("invalid HTTP_BIND")?;

        let page_size = narrow("LEADERBOARD_PAGE_SIZE", env_u64("LEADERBOARD_PAGE_SIZE", 10)?)?;
        if page_size == 0 {
            bail!("LEADERBOARD_PAGE_SIZE must be at least 1");
        }

        Ok(Self {
            discord_token,
            leaderboard_channel_id: env_optional_id("LEADERBOARD_CHANNEL_ID")?,
            channels,
            admin_ids: env_id_set("ADMIN_IDS")?,
            activity_hours,
            command_prefix: env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_owned()),
            command_rate_limit: narrow("COMMAND_RATE_LIMIT", env_u64("COMMAND_RATE_LIMIT", 5)?)?,
            command_rate_period_secs: env_u64("COMMAND_RATE_PERIOD_SECS", 60)?,
            page_size,
            leaderboard_update_interval_secs: env_u64("LEADERBOARD_UPDATE_INTERVAL", 3600)?,
            message_fetch_interval_secs: env_u64("MESSAGE_FETCH_INTERVAL", 900)?,
            backfill_limit: narrow("BACKFILL_LIMIT", env_u64("BACKFILL_LIMIT", 1000)?)?,
            backup_interval_secs: env_u64("BACKUP_INTERVAL", 86_400)?,
            backup_dir: env::var("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("backups")),
            storage_backend,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://leaderboard.db".to_owned()),
            http_bind,
            log_file: env::var("LOG_FILE")
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{name} must be a non-negative integer")),
        _ => Ok(default),
    }
}

/// Rejects values that do not fit the target integer instead of truncating them.
fn narrow<T: TryFrom<u64>>(name: &str, value: u64) -> anyhow::Result<T> {
    T::try_from(value)
        .ok()
        .with_context(|| format!("{name}={value} is out of range"))
}

fn env_optional_id(name: &str) -> anyhow::Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{name} must be a numeric id")),
        _ => Ok(None),
    }
}

fn env_id_set(name: &str) -> anyhow::Result<HashSet<u64>> {
    parse_id_list(&env::var(name).unwrap_or_default()).with_context(|| format!("invalid {name}"))
}

/// Comma-separated numeric ids; blanks are skipped.
pub fn parse_id_list(raw: &str) -> anyhow::Result<HashSet<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<u64>()
                .with_context(|| format!("`{item}` is not a numeric id"))
        })
        .collect()
}

/// Comma-separated hours or inclusive `start-end` ranges, e.g. `22-23,0-3`.
pub fn parse_hour_set(raw: &str) -> anyhow::Result<BTreeSet<u32>> {
    let mut hours = BTreeSet::new();
    for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (start, end) = match item.split_once('-') {
            Some((start, end)) => (parse_hour(start)?, parse_hour(end)?),
            None => {
                let hour = parse_hour(item)?;
                (hour, hour)
            }
        };
        if start > end {
            bail!("hour range `{item}` runs backwards; split it at midnight");
        }
        hours.extend(start..=end);
    }
    Ok(hours)
}

fn parse_hour(raw: &str) -> anyhow::Result<u32> {
    let hour = raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("`{raw}` is not an hour"))?;
    if hour > 23 {
        bail!("hour {hour} is outside 0-23");
    }
    Ok(hour)
}
