use serenity::builder::{CreateEmbed, CreateEmbedFooter};

use crate::{
    leaderboard::{LeaderboardEntry, LeaderboardPage},
    types::{ActivityCounter, UserReport},
};

pub const LEADERBOARD_TITLE: &str = "🏆 Activity Leaderboard 🏆";
const LEADERBOARD_DESCRIPTION: &str = "Most active members in the server!";
const EMPTY_DESCRIPTION: &str = "No activity recorded yet. Start chatting to claim the top spot!";
const LEADERBOARD_COLOR: u32 = 0xFF9300;
const STATS_COLOR: u32 = 0x00FF00;
const LEFT_MARKER: &str = "👋";

pub fn leaderboard_embed(page: &LeaderboardPage, icon_url: Option<&str>) -> CreateEmbed {
    let description = if page.entries.is_empty() && page.total_users == 0 {
        EMPTY_DESCRIPTION
    } else {
        LEADERBOARD_DESCRIPTION
    };

    let mut embed = CreateEmbed::new()
        .title(LEADERBOARD_TITLE)
        .description(description)
        .color(LEADERBOARD_COLOR)
        .footer(CreateEmbedFooter::new(footer_text(page)));

    if let Some(url) = icon_url {
        embed = embed.thumbnail(url);
    }

    for entry in &page.entries {
        embed = embed.field(entry_heading(entry), entry_body(entry), false);
    }
    embed
}

pub fn footer_text(page: &LeaderboardPage) -> String {
    format!(
        "Page {}/{} • Updated at {}",
        page.display_page(),
        page.total_pages.max(1),
        page.generated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// `👋 🥇#1 name 🦉 🔥`, with the marker only for users who left.
pub fn entry_heading(entry: &LeaderboardEntry) -> String {
    let mut heading = String::new();
    let name = match &entry.display_name {
        Some(name) => name.clone(),
        None => {
            heading.push_str(LEFT_MARKER);
            heading.push(' ');
            format!("User left server (ID: {})", entry.user_id)
        }
    };

    if let Some(medal) = entry.medal {
        heading.push_str(medal.glyph());
    }
    heading.push_str(&format!("#{} {name}", entry.rank));

    if !entry.badge_glyphs.is_empty() {
        heading.push(' ');
        heading.push_str(&entry.badge_glyphs.join(" "));
    }
    heading
}

pub fn entry_body(entry: &LeaderboardEntry) -> String {
    format!(
        "Total Messages: **{}**\nLast 24 hours: **{}**\nCurrent Streak: **{}** days\nBest Streak: **{}** days",
        entry.total_messages, entry.recent_messages, entry.streak, entry.best_streak
    )
}

pub fn user_stats_embed(display_name: &str, report: &UserReport) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("📊 Activity Stats for {display_name}"))
        .color(STATS_COLOR)
        .field("📈 Overview", overview_text(report), false)
        .field("⏰ Activity Patterns", patterns_text(report), false);

    if !report.badges.is_empty() {
        embed = embed.field("🏆 Badges Earned", badges_text(report), false);
    }
    embed
}

fn overview_text(report: &UserReport) -> String {
    let stats = &report.stats;
    format!(
        "Total Messages: **{}**\nCurrent Streak: **{}** days\nBest Streak: **{}** days",
        stats.total_messages, stats.streak, stats.best_streak
    )
}

pub fn patterns_text(report: &UserReport) -> String {
    let stats = &report.stats;
    let line = |label: &str, count: i64| {
        format!(
            "{label}: **{count}** messages ({:.1}%)",
            stats.share_of_total(count)
        )
    };

    let mut lines = vec![
        line(
            "Night Owl Activity",
            stats.counter(ActivityCounter::NightOwl),
        ),
        line(
            "Early Bird Activity",
            stats.counter(ActivityCounter::EarlyBird),
        ),
        line("Weekend Activity", stats.counter(ActivityCounter::Weekend)),
        line("Weekday Activity", stats.weekday_messages),
    ];
    if let Some(hour) = report.peak_hour() {
        lines.push(format!("Most Active Hour: **{hour:02}:00 UTC**"));
    }
    lines.join("\n")
}

fn badges_text(report: &UserReport) -> String {
    report
        .badges
        .iter()
        .map(|earned| {
            format!(
                "{} {} - {}",
                earned.badge.emoji, earned.badge.name, earned.badge.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{entry_body, entry_heading, footer_text, patterns_text};
    use crate::{
        leaderboard::{LeaderboardEntry, LeaderboardPage, Medal},
        types::{ActivityPattern, UserReport, UserStats},
    };

    fn entry(rank: usize, display_name: Option<&str>) -> LeaderboardEntry {
        LeaderboardEntry {
            rank,
            medal: Medal::for_rank(rank),
            user_id: "42".to_owned(),
            display_name: display_name.map(str::to_owned),
            badge_glyphs: vec!["🦉".to_owned(), "🔥".to_owned()],
            total_messages: 120,
            recent_messages: 7,
            streak: 3,
            best_streak: 9,
        }
    }

    #[test]
    fn heading_carries_medal_rank_name_and_badges() {
        assert_eq!(entry_heading(&entry(1, Some("alice"))), "🥇#1 alice 🦉 🔥");
        assert_eq!(entry_heading(&entry(4, Some("bob"))), "#4 bob 🦉 🔥");
    }

    #[test]
    fn heading_marks_members_who_left() {
        assert_eq!(
            entry_heading(&entry(2, None)),
            "👋 🥈#2 User left server (ID: 42) 🦉 🔥"
        );
    }

    #[test]
    fn body_lists_counts_and_streaks() {
        assert_eq!(
            entry_body(&entry(1, Some("alice"))),
            "Total Messages: **120**\nLast 24 hours: **7**\nCurrent Streak: **3** days\nBest Streak: **9** days"
        );
    }

    #[test]
    fn empty_board_footer_reads_page_one_of_one() {
        let page = LeaderboardPage {
            page: 0,
            total_pages: 0,
            total_users: 0,
            entries: Vec::new(),
            generated_at: Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
        };
        assert_eq!(footer_text(&page), "Page 1/1 • Updated at 2024-02-03 04:05:06");
    }

    #[test]
    fn patterns_show_shares_and_peak_hour() {
        let mut stats = UserStats::new("u1", Utc::now());
        stats.total_messages = 4;
        stats.night_owl_messages = 1;
        stats.weekend_messages = 2;
        stats.weekday_messages = 2;
        let report = UserReport {
            stats,
            badges: Vec::new(),
            patterns: vec![
                ActivityPattern {
                    hour: 9,
                    weekday: 0,
                    message_count: 3,
                },
                ActivityPattern {
                    hour: 23,
                    weekday: 5,
                    message_count: 1,
                },
            ],
        };

        let text = patterns_text(&report);
        assert!(text.contains("Night Owl Activity: **1** messages (25.0%)"));
        assert!(text.contains("Weekend Activity: **2** messages (50.0%)"));
        assert!(text.contains("Most Active Hour: **09:00 UTC**"));
    }
}
