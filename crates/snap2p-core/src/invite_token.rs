//! STEALTH invite-token store (spec §3 "Invite-token store", §4.8
//! "Invite-token API"): a `DashMap`-backed concurrent table with a
//! periodic sweep task for expiry, instead of a single global table behind
//! a lock.

use dashmap::DashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

/// Per-token policy and usage state (spec §3).
#[derive(Debug, Clone)]
struct TokenRecord {
    expires_at: i64,
    use_count: u32,
    max_uses: Option<u32>,
    single_use: bool,
}

/// Options controlling a generated or imported invite token (spec §4.8
/// "Invite-token API"; mirrors `peer.generateInviteToken({expiryMs?,
/// maxUses?, singleUse?})` from §6).
#[derive(Debug, Clone, Copy)]
pub struct InviteTokenOptions {
    /// How long the token remains valid.
    pub expiry: Duration,
    /// Optional cap on total successful uses.
    pub max_uses: Option<u32>,
    /// If true, the token is removed after its first successful use.
    pub single_use: bool,
}

impl Default for InviteTokenOptions {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(24 * 60 * 60),
            max_uses: None,
            single_use: false,
        }
    }
}

/// A concurrent store of STEALTH invite tokens (spec §3/§4.8). Validation
/// compares the presented token against every stored token in constant
/// time, rather than stopping at the first byte-for-byte match, to avoid a
/// timing oracle on which prefix of a guessed token is correct.
#[derive(Default)]
pub struct InviteTokenStore {
    tokens: DashMap<Vec<u8>, TokenRecord>,
}

impl InviteTokenStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh random 32-byte token under `options` and store it.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG is unavailable.
    pub fn generate(&self, options: InviteTokenOptions) -> Vec<u8> {
        let token = snap2p_crypto::random::random_32()
            .expect("OS CSPRNG must be available to generate an invite token")
            .to_vec();
        self.insert(token.clone(), options);
        token
    }

    /// Import an externally created token (e.g. shared out-of-band) under
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if `token` is not 16-32 bytes (spec §3 "Invite
    /// token ... 16-32-byte opaque secret").
    pub fn import(&self, token: Vec<u8>, options: InviteTokenOptions) -> Result<(), &'static str> {
        if !(16..=32).contains(&token.len()) {
            return Err("invite token must be 16-32 bytes");
        }
        self.insert(token, options);
        Ok(())
    }

    fn insert(&self, token: Vec<u8>, options: InviteTokenOptions) {
        self.tokens.insert(
            token,
            TokenRecord {
                expires_at: now_secs() + options.expiry.as_secs() as i64,
                use_count: 0,
                max_uses: options.max_uses,
                single_use: options.single_use,
            },
        );
    }

    /// Remove a token, returning whether it was present.
    pub fn revoke(&self, token: &[u8]) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Number of tokens currently tracked (including expired ones not yet
    /// swept).
    #[must_use]
    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    /// Validate `presented` against every stored token in constant time.
    /// On a valid match, increments the use count and removes the token if
    /// it is now exhausted (single-use, or `max_uses` reached).
    pub fn validate(&self, presented: &[u8]) -> bool {
        let now = now_secs();
        let mut matched_key: Option<Vec<u8>> = None;

        for entry in self.tokens.iter() {
            let key = entry.key();
            let record = entry.value();
            let is_match = snap2p_crypto::constant_time::ct_eq(key, presented) && record.expires_at > now;
            // Constant across iterations regardless of whether `is_match` is
            // true: every entry in the map is always compared.
            if is_match {
                matched_key = Some(key.clone());
            }
        }

        let Some(key) = matched_key else {
            return false;
        };

        let mut exhausted = false;
        if let Some(mut record) = self.tokens.get_mut(&key) {
            record.use_count += 1;
            exhausted = record.single_use
                || record.max_uses.is_some_and(|max| record.use_count >= max);
        }
        if exhausted {
            self.tokens.remove(&key);
        }
        true
    }

    /// Remove every token whose `expires_at` has passed. Intended to be
    /// driven by a periodic background task (spec §5 "the invite-token
    /// sweep timer").
    pub fn sweep_expired(&self) {
        let now = now_secs();
        self.tokens.retain(|_, record| record.expires_at > now);
    }
}
