pub mod backfill;
pub mod backup;
pub mod badges;
pub mod channels;
pub mod commands;
pub mod config;
pub mod discord_bot;
pub mod embeds;
pub mod http;
pub mod leaderboard;
pub mod pagination;
pub mod rate_limit;
pub mod refresh;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;
