use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// Issues replay-protection nonces, one strictly increasing sequence per battle.
///
/// Shared by handle between every [crate::BattleSession] of a client. Nothing
/// else may advance the counters. Sequences start over when the process does.
#[derive(Debug, Default)]
pub struct NonceSequencer {
    last: Mutex<HashMap<String, u64>>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next nonce for `battle_id` (the first one is 1).
    pub fn next(&self, battle_id: &str) -> u64 {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let nonce = last.entry(battle_id.to_string()).or_insert(0);
        *nonce += 1;
        *nonce
    }

    /// Last nonce issued for `battle_id`, if any.
    pub fn last(&self, battle_id: &str) -> Option<u64> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(battle_id)
            .copied()
    }
}
