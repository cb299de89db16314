use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Leaderboard,
    Stats { target: Option<u64> },
    Reset,
    Fetch,
}

impl Command {
    pub fn requires_admin(&self) -> bool {
        matches!(self, Command::Reset | Command::Fetch)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Leaderboard => "leaderboard",
            Command::Stats { .. } => "stats",
            Command::Reset => "reset",
            Command::Fetch => "fetch",
        }
    }
}

/// User-facing command failures. The `Display` text is sent back as the reply.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command `{0}`. Available: leaderboard (lb), stats [user], reset, fetch.")]
    Unknown(String),

    #[error("Could not understand `{0}` as a user. Mention them or pass their id.")]
    InvalidUser(String),

    #[error("You don't have permission to use `{0}`.")]
    MissingPermission(&'static str),

    #[error("Commands can only be used in {0}.")]
    WrongChannel(String),

    #[error("Commands can only be used in a server channel, not in direct messages.")]
    GuildOnly,

    #[error("Rate limit exceeded. Please try again in {0:.1} seconds.")]
    RateLimited(f64),

    #[error("Still connecting to Discord. Try again in a moment.")]
    NotReady,
}

/// Parses `content` as a prefixed command. Returns `None` for ordinary chat.
pub fn parse(content: &str, prefix: &str) -> Option<Result<Command, CommandError>> {
    let body = content.trim().strip_prefix(prefix)?;
    let mut parts = body.split_whitespace();
    let name = parts.next()?.to_lowercase();

    let command = match name.as_str() {
        "leaderboard" | "lb" => Ok(Command::Leaderboard),
        "stats" => match parts.next() {
            None => Ok(Command::Stats { target: None }),
            Some(raw) => parse_user_reference(raw)
                .map(|id| Command::Stats { target: Some(id) })
                .ok_or_else(|| CommandError::InvalidUser(raw.to_owned())),
        },
        "reset" => Ok(Command::Reset),
        "fetch" => Ok(Command::Fetch),
        _ => Err(CommandError::Unknown(name)),
    };
    Some(command)
}

/// Accepts `<@123>`, `<@!123>` or a bare `123`.
pub fn parse_user_reference(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let id = trimmed
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|rest| rest.trim_start_matches('!'))
        .unwrap_or(trimmed);
    id.parse::<u64>().ok().filter(|id| *id != 0)
}

#[cfg(test)]
mod tests {
    use super::{Command, CommandError, parse, parse_user_reference};

    #[test]
    fn parses_leaderboard_aliases() {
        assert_eq!(parse("!leaderboard", "!"), Some(Ok(Command::Leaderboard)));
        assert_eq!(parse("  !LB ", "!"), Some(Ok(Command::Leaderboard)));
    }

    #[test]
    fn parses_stats_with_and_without_target() {
        assert_eq!(parse("!stats", "!"), Some(Ok(Command::Stats { target: None })));
        assert_eq!(
            parse("!stats <@!123456>", "!"),
            Some(Ok(Command::Stats {
                target: Some(123456)
            }))
        );
        assert_eq!(
            parse("!stats bob", "!"),
            Some(Err(CommandError::InvalidUser("bob".to_owned())))
        );
    }

    #[test]
    fn admin_commands_are_flagged() {
        let reset = parse("!reset", "!").and_then(Result::ok);
        let fetch = parse("!fetch", "!").and_then(Result::ok);
        assert!(reset.is_some_and(|command| command.requires_admin()));
        assert!(fetch.is_some_and(|command| command.requires_admin()));
        assert!(!Command::Leaderboard.requires_admin());
    }

    #[test]
    fn ignores_plain_chat_and_reports_unknown_commands() {
        assert_eq!(parse("hello there", "!"), None);
        assert_eq!(parse("!", "!"), None);
        assert_eq!(
            parse("!dance", "!"),
            Some(Err(CommandError::Unknown("dance".to_owned())))
        );
    }

    #[test]
    fn user_references() {
        assert_eq!(parse_user_reference("<@42>"), Some(42));
        assert_eq!(parse_user_reference("42"), Some(42));
        assert_eq!(parse_user_reference("<#42>"), None);
        assert_eq!(parse_user_reference("0"), None);
    }

    #[test]
    fn error_text_is_the_reply() {
        assert_eq!(
            CommandError::RateLimited(12.34).to_string(),
            "Rate limit exceeded. Please try again in 12.3 seconds."
        );
        assert_eq!(
            CommandError::MissingPermission("reset").to_string(),
            "You don't have permission to use `reset`."
        );
    }

    #[test]
    fn retry_delays_compare_by_value() {
        assert_eq!(
            CommandError::RateLimited(1.5),
            CommandError::RateLimited(1.5)
        );
        assert_ne!(
            CommandError::RateLimited(1.5),
            CommandError::RateLimited(2.0)
        );
    }
}
