//! In-memory channel directory used to route incoming batches.

use std::collections::HashMap;

use crate::storage::{Channel, RegionKind, region_for};

/// Channels the host has declared for logging, keyed by id.
///
/// Replaced wholesale on every announcement. Reads never consult it; they
/// resolve types from the persisted channel table.
#[derive(Debug, Default, Clone)]
pub struct ChannelDirectory {
    channels: HashMap<String, Channel>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the directory and repopulate it from `channels`.
    ///
    /// A later entry with the same id wins.
    pub fn replace<I>(&mut self, channels: I)
    where
        I: IntoIterator<Item = Channel>,
    {
        self.channels.clear();
        for channel in channels {
            self.channels.insert(channel.id.clone(), channel);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    /// Region for records of `id`, if the channel is declared.
    pub fn region_of(&self, id: &str) -> Option<RegionKind> {
        self.get(id).map(|c| region_for(c.value_type))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Declared channel ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
