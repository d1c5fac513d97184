use std::collections::BTreeSet;

use fanout_types::{normalize_target_channels, ForwardRecord, MAX_TARGET_CHANNELS};

use crate::FanoutError;

/// Ordered, de-duplicated list of target channels read at fan-out time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    channels: Vec<String>,
}

impl TargetSet {
    /// Builds the set from stored slots, skipping blanks and repeats.
    pub fn from_slots<S: AsRef<str>>(slots: &[S]) -> Self {
        let mut channels = normalize_target_channels(slots);
        channels.truncate(MAX_TARGET_CHANNELS);
        Self { channels }
    }

    /// Validates an operator-supplied channel list.
    pub fn from_update<S: AsRef<str>>(raw: &[S]) -> Result<Self, FanoutError> {
        let channels = normalize_target_channels(raw);
        if channels.len() > MAX_TARGET_CHANNELS {
            return Err(FanoutError::TooManyTargets {
                count: channels.len(),
            });
        }
        Ok(Self { channels })
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.channels
    }

    pub fn into_vec(self) -> Vec<String> {
        self.channels
    }

    /// Channel count a delete reports against: every configured target plus
    /// any channel still holding a copy, plus one for the source post.
    pub fn delete_total(&self, record: &ForwardRecord) -> usize {
        let channels: BTreeSet<&str> = self.iter().chain(record.channels()).collect();
        channels.len() + 1
    }
}
