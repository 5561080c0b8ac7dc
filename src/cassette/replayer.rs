//! Serves recorded interactions back in order.

use std::collections::HashMap;

use super::format::{Cassette, Interaction};
use crate::model::ProviderKind;

type CallKey = (ProviderKind, String);

/// Replays interactions from a loaded cassette, one queue per provider/method pair.
pub struct CassetteReplayer {
    queues: HashMap<CallKey, Vec<Interaction>>,
    cursors: HashMap<CallKey, usize>,
}

impl CassetteReplayer {
    /// Index a loaded cassette for replay.
    #[must_use]
    pub fn new(cassette: &Cassette) -> Self {
        let mut queues: HashMap<CallKey, Vec<Interaction>> = HashMap::new();
        for interaction in &cassette.interactions {
            queues
                .entry((interaction.provider, interaction.method.clone()))
                .or_default()
                .push(interaction.clone());
        }
        let cursors = queues.keys().map(|k| (k.clone(), 0)).collect();
        Self { queues, cursors }
    }

    /// Return the next recorded interaction for `provider` and `method`.
    ///
    /// # Errors
    ///
    /// Returns a message when nothing was recorded for the pair, or every
    /// recorded call has already been served.
    pub fn next_interaction(
        &mut self,
        provider: ProviderKind,
        method: &str,
    ) -> Result<&Interaction, String> {
        let key = (provider, method.to_string());

        let Some(queue) = self.queues.get(&key) else {
            let mut available: Vec<String> =
                self.queues.keys().map(|(p, m)| format!("{p}::{m}")).collect();
            available.sort();
            return Err(format!(
                "Cassette has no interactions recorded for {provider}::{method}. \
                 Available: [{}]",
                available.join(", ")
            ));
        };

        let cursor = self.cursors.entry(key).or_insert(0);
        let Some(interaction) = queue.get(*cursor) else {
            return Err(format!(
                "Cassette exhausted: all {} interactions for {provider}::{method} have been consumed",
                queue.len()
            ));
        };
        *cursor += 1;
        Ok(interaction)
    }
}
