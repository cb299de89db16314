use std::collections::HashSet;

use crate::types::{ActivityCounter, Badge, BadgeRequirement, UserStats};

/// Badge catalog seeded into the store on startup.
pub fn default_catalog() -> Vec<Badge> {
    vec![
        Badge {
            name: "Night Owl".to_owned(),
            description: "30% of messages during night hours (10 PM - 4 AM)".to_owned(),
            emoji: "🦉".to_owned(),
            requirement: BadgeRequirement::Percentage {
                counter: ActivityCounter::NightOwl,
                threshold: 30.0,
            },
        },
        Badge {
            name: "Early Bird".to_owned(),
            description: "30% of messages during early hours (5 AM - 9 AM)".to_owned(),
            emoji: "🌅".to_owned(),
            requirement: BadgeRequirement::Percentage {
                counter: ActivityCounter::EarlyBird,
                threshold: 30.0,
            },
        },
        Badge {
            name: "Weekend Warrior".to_owned(),
            description: "40% of messages during weekends".to_owned(),
            emoji: "🎮".to_owned(),
            requirement: BadgeRequirement::Percentage {
                counter: ActivityCounter::Weekend,
                threshold: 40.0,
            },
        },
        Badge {
            name: "Consistent Contributor".to_owned(),
            description: "Maintained a 7-day streak".to_owned(),
            emoji: "🔥".to_owned(),
            requirement: BadgeRequirement::Streak { days: 7 },
        },
    ]
}

pub fn qualifies(stats: &UserStats, requirement: &BadgeRequirement) -> bool {
    match requirement {
        BadgeRequirement::Percentage { counter, threshold } => {
            stats.share_of_total(stats.counter(*counter)) >= *threshold
        }
        BadgeRequirement::Streak { days } => stats.streak >= *days,
    }
}

/// Badges from `catalog` that `stats` now qualifies for and that are not in
/// `held` (badge names). Never returns a held badge, so grants stay one-shot.
pub fn evaluate(stats: &UserStats, catalog: &[Badge], held: &HashSet<String>) -> Vec<Badge> {
    catalog
        .iter()
        .filter(|badge| !held.contains(&badge.name))
        .filter(|badge| qualifies(stats, &badge.requirement))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;

    use super::{default_catalog, evaluate};
    use crate::types::UserStats;

    fn stats(total: i64) -> UserStats {
        let mut stats = UserStats::new("u1", Utc::now());
        stats.total_messages = total;
        stats.weekday_messages = total;
        stats
    }

    fn names(badges: &[crate::types::Badge]) -> Vec<&str> {
        badges.iter().map(|badge| badge.name.as_str()).collect()
    }

    #[test]
    fn night_owl_awarded_at_exact_threshold() {
        let mut user = stats(10);
        user.night_owl_messages = 3;
        let awarded = evaluate(&user, &default_catalog(), &HashSet::new());
        assert_eq!(names(&awarded), vec!["Night Owl"]);

        user.night_owl_messages = 2;
        let awarded = evaluate(&user, &default_catalog(), &HashSet::new());
        assert!(awarded.is_empty());
    }

    #[test]
    fn empty_record_earns_nothing() {
        let user = stats(0);
        assert!(evaluate(&user, &default_catalog(), &HashSet::new()).is_empty());
    }

    #[test]
    fn several_badges_in_one_evaluation() {
        let mut user = stats(10);
        user.weekend_messages = 5;
        user.weekday_messages = 5;
        user.early_bird_messages = 4;
        user.streak = 7;
        user.best_streak = 7;

        let awarded = evaluate(&user, &default_catalog(), &HashSet::new());
        assert_eq!(
            names(&awarded),
            vec!["Early Bird", "Weekend Warrior", "Consistent Contributor"]
        );
    }

    #[test]
    fn held_badges_are_never_reissued() {
        let mut user = stats(10);
        user.night_owl_messages = 10;
        user.streak = 9;
        let held: HashSet<String> = ["Night Owl".to_owned()].into_iter().collect();

        let awarded = evaluate(&user, &default_catalog(), &held);
        assert_eq!(names(&awarded), vec!["Consistent Contributor"]);
    }

    #[test]
    fn streak_badge_uses_current_streak() {
        let mut user = stats(30);
        user.streak = 6;
        user.best_streak = 12;
        assert!(evaluate(&user, &default_catalog(), &HashSet::new()).is_empty());
    }
}
