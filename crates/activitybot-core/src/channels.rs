use std::collections::HashSet;

/// Which channels feed statistics and which accept commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelPolicy {
    pub tracked: HashSet<u64>,
    pub tracked_category: Option<u64>,
    pub excluded: HashSet<u64>,
    /// Empty means commands are accepted everywhere.
    pub command_channels: HashSet<u64>,
}

impl ChannelPolicy {
    pub fn is_tracked(&self, channel_id: u64, parent_id: Option<u64>) -> bool {
        if self.excluded.contains(&channel_id) {
            return false;
        }
        let in_category = self.tracked_category.is_some() && self.tracked_category == parent_id;
        self.tracked.contains(&channel_id) || in_category
    }

    pub fn accepts_commands(&self, channel_id: u64) -> bool {
        self.command_channels.is_empty() || self.command_channels.contains(&channel_id)
    }

    /// Channel mentions for the "wrong channel" reply, sorted for stable output.
    pub fn command_channel_mentions(&self) -> String {
        let mut ids = self.command_channels.iter().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids.iter()
            .map(|id| format!("<#{id}>"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
