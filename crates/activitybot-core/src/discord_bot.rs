use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serenity::{
    async_trait,
    builder::{CreateMessage, EditMessage, GetMessages},
    cache::Cache,
    http::Http,
    model::{
        Timestamp,
        channel::{Channel, ChannelType, Message, Reaction, ReactionType},
        gateway::{GatewayIntents, Ready},
        id::{ChannelId, GuildId, MessageId, UserId},
    },
    prelude::*,
};
use tracing::{debug, error, info, warn};

use crate::{
    backfill::{Backfiller, ChannelHistory},
    backup::BackupManager,
    channels::ChannelPolicy,
    commands::{self, Command, CommandError},
    config::AppConfig,
    embeds::{self, LEADERBOARD_TITLE},
    leaderboard::LeaderboardPage,
    pagination::{PageDirection, PageTracker},
    rate_limit::{CommandRateLimiter, RateDecision},
    refresh::{GuildView, LeaderboardPublisher, LeaderboardRefresher},
    tracker::ActivityTracker,
    types::MessageRecord,
};

const HISTORY_PAGE: usize = 100;
const MEMBER_PAGE: u64 = 1000;

/// Long-lived services the gateway handler drives.
pub struct BotServices {
    pub tracker: Arc<ActivityTracker>,
    pub backups: Arc<BackupManager>,
}

struct Handler {
    config: Arc<AppConfig>,
    tracker: Arc<ActivityTracker>,
    backups: Arc<BackupManager>,
    pages: Arc<PageTracker>,
    rate_limiter: CommandRateLimiter,
    backfiller: OnceLock<Arc<Backfiller>>,
    started: AtomicBool,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "connected to Discord"
        );

        // Reconnects fire `ready` again; the background loops start once.
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let history = Arc::new(DiscordHistory {
            http: ctx.http.clone(),
            guild_ids: ready.guilds.iter().map(|guild| guild.id).collect(),
            policy: self.config.channels.clone(),
        });
        let backfiller = Arc::new(Backfiller::new(
            self.tracker.clone(),
            history,
            self.config.backfill_limit,
        ));
        backfiller.start(Duration::from_secs(self.config.message_fetch_interval_secs));
        let _ = self.backfiller.set(backfiller);

        let Some(channel_id) = self.config.leaderboard_channel_id else {
            warn!("LEADERBOARD_CHANNEL_ID is not set; scheduled leaderboard refresh is disabled");
            return;
        };
        let resolved = DiscordPublisher::resolve(
            ctx.cache.clone(),
            ctx.http.clone(),
            ChannelId::new(channel_id),
        )
        .await;
        match resolved {
            Ok(publisher) => {
                let refresher = Arc::new(LeaderboardRefresher::new(
                    self.tracker.clone(),
                    Arc::new(publisher),
                    self.pages.clone(),
                    self.config.page_size,
                ));
                refresher.start(self.config.leaderboard_update_interval_secs);
            }
            Err(error) => {
                error!(
                    channel_id,
                    ?error,
                    "cannot use leaderboard channel; scheduled refresh is disabled"
                );
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        if let Some(parsed) = commands::parse(&msg.content, &self.config.command_prefix) {
            self.handle_command(&ctx, &msg, parsed).await;
            return;
        }

        self.track_message(&ctx, &msg).await;
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let Some(user_id) = reaction.user_id else {
            return;
        };
        if user_id == ctx.cache.current_user().id {
            return;
        }

        if let ReactionType::Unicode(emoji) = &reaction.emoji {
            if let Some(direction) = PageDirection::from_emoji(emoji) {
                if self.is_leaderboard_render(&ctx, &reaction).await {
                    self.turn_page(&ctx, &reaction, direction).await;
                    return;
                }
            }
        }

        let reacted_by_bot = match &reaction.member {
            Some(member) => member.user.bot,
            None => reaction.user(&ctx).await.map(|user| user.bot).unwrap_or(false),
        };
        if reacted_by_bot {
            return;
        }

        let message_id = reaction.message_id.to_string();
        match self.tracker.record_reaction(&message_id).await {
            Ok(true) => debug!(%message_id, "reaction counted"),
            Ok(false) => {}
            Err(error) => error!(%message_id, ?error, "failed to count reaction"),
        }
    }
}

impl Handler {
    async fn track_message(&self, ctx: &Context, msg: &Message) {
        if msg.guild_id.is_none() {
            return;
        }

        let parent_id = if self.config.channels.tracked_category.is_some() {
            match msg.channel(ctx).await {
                Ok(Channel::Guild(channel)) => channel.parent_id.map(|id| id.get()),
                Ok(_) => None,
                Err(error) => {
                    warn!(
                        channel_id = %msg.channel_id,
                        ?error,
                        "failed to resolve channel category"
                    );
                    None
                }
            }
        } else {
            None
        };

        if !self.config.channels.is_tracked(msg.channel_id.get(), parent_id) {
            return;
        }

        if let Err(error) = self.tracker.record_message(message_record(msg)).await {
            error!(message_id = %msg.id, ?error, "failed to record message");
        }
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        msg: &Message,
        parsed: Result<Command, CommandError>,
    ) {
        let outcome = match self.admit(msg).await.and(parsed) {
            Ok(command) => self.run_command(ctx, msg, command).await,
            Err(error) => Err(error.into()),
        };

        let Err(error) = outcome else {
            return;
        };
        let reply = match error.downcast_ref::<CommandError>() {
            Some(command_error) => command_error.to_string(),
            None => {
                error!(command = %msg.content, ?error, "command failed");
                "Something went wrong while running that command.".to_owned()
            }
        };
        if let Err(error) = msg.channel_id.say(&ctx.http, reply).await {
            error!(?error, "failed to send command reply");
        }
    }

    /// Guild, channel and rate-limit checks shared by every command.
    async fn admit(&self, msg: &Message) -> Result<(), CommandError> {
        if msg.guild_id.is_none() {
            return Err(CommandError::GuildOnly);
        }
        if !self.config.channels.accepts_commands(msg.channel_id.get()) {
            return Err(CommandError::WrongChannel(
                self.config.channels.command_channel_mentions(),
            ));
        }
        match self.rate_limiter.check(msg.author.id.get()).await {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after } => {
                Err(CommandError::RateLimited(retry_after.as_secs_f64()))
            }
        }
    }

    async fn run_command(
        &self,
        ctx: &Context,
        msg: &Message,
        command: Command,
    ) -> anyhow::Result<()> {
        if command.requires_admin() && !self.config.is_admin(msg.author.id.get()) {
            return Err(CommandError::MissingPermission(command.name()).into());
        }
        let guild_id = msg.guild_id.ok_or(CommandError::GuildOnly)?;
        info!(command = command.name(), user_id = %msg.author.id, "running command");

        match command {
            Command::Leaderboard => {
                let now = Utc::now();
                let source = self.tracker.leaderboard_source(now).await?;
                let guild = guild_view(&ctx.cache, &ctx.http, guild_id).await?;
                let page = source.render(0, self.config.page_size, &guild.members, now);
                let posted =
                    post_render(&ctx.http, msg.channel_id, &page, guild.icon_url.as_deref())
                        .await?;
                self.pages.set(posted.id.get(), 0).await;
            }
            Command::Stats { target } => {
                let user_id = target.map(UserId::new).unwrap_or(msg.author.id);
                let Some(report) = self.tracker.user_report(&user_id.to_string()).await? else {
                    msg.channel_id
                        .say(&ctx.http, format!("No activity recorded for <@{user_id}> yet."))
                        .await?;
                    return Ok(());
                };
                let name = match guild_id.member(ctx, user_id).await {
                    Ok(member) => member.display_name().to_owned(),
                    Err(_) if user_id == msg.author.id => msg.author.name.clone(),
                    Err(_) => format!("User {user_id}"),
                };
                msg.channel_id
                    .send_message(
                        &ctx.http,
                        CreateMessage::new().embed(embeds::user_stats_embed(&name, &report)),
                    )
                    .await?;
            }
            Command::Reset => {
                let backup = self
                    .backups
                    .create_backup(Utc::now())
                    .await
                    .context("backup before reset failed; nothing was deleted")?;
                let summary = self.tracker.reset().await?;
                let file = backup
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                msg.channel_id
                    .say(
                        &ctx.http,
                        format!(
                            "Leaderboard reset. Removed {} users and {} messages. Backup saved as `{file}`.",
                            summary.users, summary.messages
                        ),
                    )
                    .await?;
            }
            Command::Fetch => {
                let backfiller = self.backfiller.get().ok_or(CommandError::NotReady)?;
                msg.channel_id
                    .say(&ctx.http, "Fetching message history. This may take a while...")
                    .await?;
                let report = backfiller.run_once().await?;
                msg.channel_id
                    .say(
                        &ctx.http,
                        format!(
                            "Fetched {} messages from {} channels; {} were new, {} failed.",
                            report.scanned, report.channels, report.ingested, report.failed
                        ),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Renders we posted are tracked; after a restart, fall back to author and title.
    async fn is_leaderboard_render(&self, ctx: &Context, reaction: &Reaction) -> bool {
        if self.pages.contains(reaction.message_id.get()).await {
            return true;
        }

        match reaction.channel_id.message(&ctx.http, reaction.message_id).await {
            Ok(message) => {
                message.author.id == ctx.cache.current_user().id
                    && message
                        .embeds
                        .first()
                        .and_then(|embed| embed.title.as_deref())
                        == Some(LEADERBOARD_TITLE)
            }
            Err(error) => {
                debug!(message_id = %reaction.message_id, ?error, "cannot inspect reacted message");
                false
            }
        }
    }

    async fn turn_page(&self, ctx: &Context, reaction: &Reaction, direction: PageDirection) {
        if let Err(error) = self.render_shifted(ctx, reaction, direction).await {
            error!(message_id = %reaction.message_id, ?error, "failed to turn leaderboard page");
        }
        if let Err(error) = reaction.delete(&ctx.http).await {
            warn!(?error, "failed to remove pagination reaction");
        }
    }

    async fn render_shifted(
        &self,
        ctx: &Context,
        reaction: &Reaction,
        direction: PageDirection,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let source = self.tracker.leaderboard_source(now).await?;
        let total_pages = source.total_pages(self.config.page_size);
        let message_id = reaction.message_id.get();

        let Some(page) = self.pages.shift(message_id, direction, total_pages).await else {
            return Ok(());
        };

        let guild = match reaction.guild_id {
            Some(guild_id) => guild_view(&ctx.cache, &ctx.http, guild_id).await?,
            None => GuildView::default(),
        };
        let rendered = source.render(page, self.config.page_size, &guild.members, now);
        reaction
            .channel_id
            .edit_message(
                &ctx.http,
                reaction.message_id,
                EditMessage::new().embed(embeds::leaderboard_embed(
                    &rendered,
                    guild.icon_url.as_deref(),
                )),
            )
            .await?;
        Ok(())
    }
}

/// Posts automatic renders into the configured leaderboard channel.
struct DiscordPublisher {
    cache: Arc<Cache>,
    http: Arc<Http>,
    channel_id: ChannelId,
    guild_id: GuildId,
}

impl DiscordPublisher {
    async fn resolve(
        cache: Arc<Cache>,
        http: Arc<Http>,
        channel_id: ChannelId,
    ) -> anyhow::Result<Self> {
        let guild_id = channel_id
            .to_channel(&http)
            .await?
            .guild()
            .map(|channel| channel.guild_id)
            .context("leaderboard channel is not a server channel")?;
        Ok(Self {
            cache,
            http,
            channel_id,
            guild_id,
        })
    }
}

#[async_trait]
impl LeaderboardPublisher for DiscordPublisher {
    async fn guild_view(&self) -> anyhow::Result<GuildView> {
        guild_view(&self.cache, &self.http, self.guild_id).await
    }

    async fn publish(&self, page: &LeaderboardPage, icon_url: Option<&str>) -> anyhow::Result<u64> {
        let message = post_render(&self.http, self.channel_id, page, icon_url).await?;
        Ok(message.id.get())
    }

    async fn retract(&self, message_id: u64) -> anyhow::Result<()> {
        self.channel_id
            .delete_message(&self.http, MessageId::new(message_id))
            .await?;
        Ok(())
    }
}

/// History of tracked channels across the guilds the bot is in.
struct DiscordHistory {
    http: Arc<Http>,
    guild_ids: Vec<GuildId>,
    policy: ChannelPolicy,
}

#[async_trait]
impl ChannelHistory for DiscordHistory {
    async fn tracked_channels(&self) -> anyhow::Result<Vec<u64>> {
        let mut channels = self
            .policy
            .tracked
            .iter()
            .copied()
            .filter(|id| self.policy.is_tracked(*id, None))
            .collect::<BTreeSet<_>>();

        if self.policy.tracked_category.is_some() {
            for guild_id in &self.guild_ids {
                let guild_channels = guild_id.channels(&self.http).await?;
                channels.extend(
                    guild_channels
                        .values()
                        .filter(|channel| channel.kind == ChannelType::Text)
                        .filter(|channel| {
                            self.policy
                                .is_tracked(channel.id.get(), channel.parent_id.map(|id| id.get()))
                        })
                        .map(|channel| channel.id.get()),
                );
            }
        }

        Ok(channels.into_iter().collect())
    }

    async fn recent_messages(
        &self,
        channel_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let channel = ChannelId::new(channel_id);
        let mut records = Vec::new();
        let mut fetched = 0;
        let mut before: Option<MessageId> = None;

        while fetched < limit {
            let batch_size = (limit - fetched).min(HISTORY_PAGE);
            let mut request = GetMessages::new().limit(batch_size as u8);
            if let Some(before) = before {
                request = request.before(before);
            }

            let batch = channel.messages(&self.http, request).await?;
            fetched += batch.len();
            before = batch.last().map(|message| message.id);
            records.extend(
                batch
                    .iter()
                    .filter(|message| !message.author.bot)
                    .map(message_record),
            );

            if batch.len() < batch_size {
                break;
            }
        }

        debug!(channel_id, fetched, kept = records.len(), "read channel history");
        Ok(records)
    }
}

async fn post_render(
    http: &Http,
    channel_id: ChannelId,
    page: &LeaderboardPage,
    icon_url: Option<&str>,
) -> anyhow::Result<Message> {
    let message = channel_id
        .send_message(
            http,
            CreateMessage::new().embed(embeds::leaderboard_embed(page, icon_url)),
        )
        .await?;

    for emoji in [PageDirection::BACK_EMOJI, PageDirection::FORWARD_EMOJI] {
        message
            .react(http, ReactionType::Unicode(emoji.to_owned()))
            .await?;
    }
    Ok(message)
}

/// Current members' display names and the guild icon. Served from the gateway
/// cache when it holds every member, otherwise paged over HTTP.
async fn guild_view(cache: &Cache, http: &Http, guild_id: GuildId) -> anyhow::Result<GuildView> {
    if let Some(view) = cached_guild_view(cache, guild_id) {
        debug!(%guild_id, members = view.members.len(), "guild view served from cache");
        return Ok(view);
    }
    fetch_guild_view(http, guild_id).await
}

fn cached_guild_view(cache: &Cache, guild_id: GuildId) -> Option<GuildView> {
    let guild = cache.guild(guild_id)?;
    let members = complete_directory(
        guild.member_count,
        guild
            .members
            .values()
            .map(|member| (member.user.id.to_string(), member.display_name().to_owned())),
    )?;
    Some(GuildView {
        icon_url: guild.icon_url(),
        members,
    })
}

/// `None` while the cache holds fewer members than the guild reports.
fn complete_directory(
    member_count: u64,
    members: impl ExactSizeIterator<Item = (String, String)>,
) -> Option<HashMap<String, String>> {
    if member_count == 0 || (members.len() as u64) < member_count {
        return None;
    }
    Some(members.collect())
}

async fn fetch_guild_view(http: &Http, guild_id: GuildId) -> anyhow::Result<GuildView> {
    let icon_url = guild_id.to_partial_guild(http).await?.icon_url();

    let mut members = HashMap::new();
    let mut after: Option<UserId> = None;
    loop {
        let batch = guild_id.members(http, Some(MEMBER_PAGE), after).await?;
        let last_page = (batch.len() as u64) < MEMBER_PAGE;
        after = batch.last().map(|member| member.user.id);
        for member in batch {
            members.insert(member.user.id.to_string(), member.display_name().to_owned());
        }
        if last_page || after.is_none() {
            break;
        }
    }

    Ok(GuildView { icon_url, members })
}

fn message_record(msg: &Message) -> MessageRecord {
    let mut record = MessageRecord::new(
        msg.id.to_string(),
        msg.author.id.to_string(),
        msg.channel_id.to_string(),
        to_utc(msg.timestamp),
    );
    record.reaction_count = msg
        .reactions
        .iter()
        .map(|reaction| reaction.count as i64)
        .sum();
    record
}

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

pub async fn start_discord_bot(
    config: Arc<AppConfig>,
    services: BotServices,
) -> anyhow::Result<()> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = Handler {
        rate_limiter: CommandRateLimiter::new(
            config.command_rate_limit,
            Duration::from_secs(config.command_rate_period_secs),
        ),
        config: config.clone(),
        tracker: services.tracker,
        backups: services.backups,
        pages: Arc::new(PageTracker::new()),
        backfiller: OnceLock::new(),
        started: AtomicBool::new(false),
    };
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await?;

    info!("starting Discord gateway client");
    client.start().await?;
    Ok(())
}
