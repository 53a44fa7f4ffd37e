//! Protocol parameters and a live, reloadable handle to them.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::reputation_transfers::TransferMap;
use crate::tally::AgreementWeighting;
use crate::ConfigError;

/// Tunable parameters of the polling layer.
///
/// Durations are in milliseconds. Every field has a default, so an empty
/// `[poller]` table is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Master switch for serving repairs to other peers.
    #[serde(default = "default_true")]
    pub enable_v3_repair: bool,

    /// When false, repairs of open-access AUs are served to anyone.
    #[serde(default)]
    pub open_access_repair_needs_agreement: bool,

    /// Serve repairs to trusted peers regardless of reputation.
    #[serde(default)]
    pub repair_any_trusted_peer: bool,

    /// Minimum reputation a peer needs before we serve it repairs.
    #[serde(default = "default_min_percent_agreement")]
    pub min_percent_agreement_for_repairs: f64,

    /// `source,destination;...` pairs; each destination inherits its source's reputation.
    #[serde(default)]
    pub reputation_transfer_map: String,

    /// Votes required before a poll can be won or lost.
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Weighted fraction of agreement (or disagreement) that decides a poll.
    #[serde(default = "default_vote_margin")]
    pub vote_margin: f64,

    /// How voter reputation scales a vote.
    #[serde(default)]
    pub agreement_weighting: AgreementWeighting,

    /// Reputation assumed for peers we have never polled.
    #[serde(default = "default_reputation")]
    pub default_reputation: f64,

    #[serde(default = "default_min_poll_duration_ms")]
    pub min_poll_duration_ms: u64,

    #[serde(default = "default_max_poll_duration_ms")]
    pub max_poll_duration_ms: u64,

    #[serde(default = "default_vote_duration_multiplier")]
    pub vote_duration_multiplier: u32,

    #[serde(default = "default_padding_ms")]
    pub vote_duration_padding_ms: u64,

    #[serde(default = "default_tally_duration_multiplier")]
    pub tally_duration_multiplier: u32,

    #[serde(default = "default_padding_ms")]
    pub tally_duration_padding_ms: u64,

    /// Extra time a voter waits for its evaluation receipt after the poll ends.
    #[serde(default = "default_receipt_padding_ms")]
    pub receipt_padding_ms: u64,

    /// How long a closed poll's key stays reserved.
    #[serde(default = "default_recent_poll_expiration_ms")]
    pub recent_poll_expiration_ms: u64,

    /// Cap on concurrently running voter polls.
    #[serde(default = "default_max_simultaneous_voters")]
    pub max_simultaneous_voters: usize,

    /// A voter nominates nobody unless it knows at least this many peers.
    #[serde(default = "default_min_nomination_size")]
    pub min_nomination_size: usize,

    /// Most peers a voter nominates for the outer circle.
    #[serde(default = "default_max_nomination_size")]
    pub max_nomination_size: usize,

    /// Number of outer-circle peers a poller aims to invite from nominations.
    #[serde(default = "default_target_outer_circle")]
    pub target_outer_circle: usize,

    /// Drop inner-circle voters whose vote nominates nobody.
    #[serde(default)]
    pub drop_empty_nominators: bool,

    /// Digest algorithm requested by polls we call.
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_min_percent_agreement() -> f64 {
    0.5
}

fn default_quorum() -> usize {
    5
}

fn default_vote_margin() -> f64 {
    0.75
}

fn default_reputation() -> f64 {
    0.5
}

fn default_min_poll_duration_ms() -> u64 {
    10 * 60 * 1000
}

fn default_max_poll_duration_ms() -> u64 {
    21 * 24 * 60 * 60 * 1000
}

fn default_vote_duration_multiplier() -> u32 {
    4
}

fn default_tally_duration_multiplier() -> u32 {
    5
}

fn default_padding_ms() -> u64 {
    5 * 60 * 1000
}

fn default_receipt_padding_ms() -> u64 {
    10 * 60 * 1000
}

fn default_recent_poll_expiration_ms() -> u64 {
    60 * 60 * 1000
}

fn default_max_simultaneous_voters() -> usize {
    60
}

fn default_min_nomination_size() -> usize {
    1
}

fn default_max_nomination_size() -> usize {
    5
}

fn default_target_outer_circle() -> usize {
    10
}

fn default_hash_algorithm() -> String {
    "BLAKE2b-256".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl PollerConfig {
    pub fn min_poll_duration(&self) -> Duration {
        Duration::from_millis(self.min_poll_duration_ms)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_millis(self.max_poll_duration_ms)
    }

    pub fn vote_duration_padding(&self) -> Duration {
        Duration::from_millis(self.vote_duration_padding_ms)
    }

    pub fn tally_duration_padding(&self) -> Duration {
        Duration::from_millis(self.tally_duration_padding_ms)
    }

    pub fn receipt_padding(&self) -> Duration {
        Duration::from_millis(self.receipt_padding_ms)
    }

    pub fn recent_poll_expiration(&self) -> Duration {
        Duration::from_millis(self.recent_poll_expiration_ms)
    }

    /// Reject inconsistent parameters, including an invalid transfer map.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        fraction("min_percent_agreement_for_repairs", self.min_percent_agreement_for_repairs)?;
        fraction("default_reputation", self.default_reputation)?;
        if !(self.vote_margin > 0.0 && self.vote_margin <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "vote_margin must be within (0, 1], got {}",
                self.vote_margin
            )));
        }
        if self.quorum == 0 {
            return Err(ConfigError::Invalid("quorum must be at least 1".into()));
        }
        if self.min_poll_duration_ms > self.max_poll_duration_ms {
            return Err(ConfigError::Invalid(format!(
                "min_poll_duration_ms {} exceeds max_poll_duration_ms {}",
                self.min_poll_duration_ms, self.max_poll_duration_ms
            )));
        }
        if self.min_nomination_size > self.max_nomination_size {
            return Err(ConfigError::Invalid(format!(
                "min_nomination_size {} exceeds max_nomination_size {}",
                self.min_nomination_size, self.max_nomination_size
            )));
        }
        if self.hash_algorithm.trim().is_empty() {
            return Err(ConfigError::Invalid("hash_algorithm must not be empty".into()));
        }
        TransferMap::parse(&self.reputation_transfer_map)?;
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enable_v3_repair: default_true(),
            open_access_repair_needs_agreement: false,
            repair_any_trusted_peer: false,
            min_percent_agreement_for_repairs: default_min_percent_agreement(),
            reputation_transfer_map: String::new(),
            quorum: default_quorum(),
            vote_margin: default_vote_margin(),
            agreement_weighting: AgreementWeighting::default(),
            default_reputation: default_reputation(),
            min_poll_duration_ms: default_min_poll_duration_ms(),
            max_poll_duration_ms: default_max_poll_duration_ms(),
            vote_duration_multiplier: default_vote_duration_multiplier(),
            vote_duration_padding_ms: default_padding_ms(),
            tally_duration_multiplier: default_tally_duration_multiplier(),
            tally_duration_padding_ms: default_padding_ms(),
            receipt_padding_ms: default_receipt_padding_ms(),
            recent_poll_expiration_ms: default_recent_poll_expiration_ms(),
            max_simultaneous_voters: default_max_simultaneous_voters(),
            min_nomination_size: default_min_nomination_size(),
            max_nomination_size: default_max_nomination_size(),
            target_outer_circle: default_target_outer_circle(),
            drop_empty_nominators: false,
            hash_algorithm: default_hash_algorithm(),
        }
    }
}

/// Shared, replaceable configuration.
///
/// Readers take a cheap [`snapshot`](ConfigHandle::snapshot) per operation,
/// so a replacement is observed on the next lookup without restarting polls.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<PollerConfig>>>,
    changed: broadcast::Sender<()>,
}

impl ConfigHandle {
    pub fn new(config: PollerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (changed, _) = broadcast::channel(8);
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            changed,
        })
    }

    pub fn snapshot(&self) -> Arc<PollerConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and install a new configuration.
    pub fn replace(&self, config: PollerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        // Nobody listening is fine.
        let _ = self.changed.send(());
        tracing::info!("poller configuration replaced");
        Ok(())
    }

    /// Apply an edit to a copy of the current configuration and install it.
    pub fn update(&self, edit: impl FnOnce(&mut PollerConfig)) -> Result<(), ConfigError> {
        let mut next = (*self.snapshot()).clone();
        edit(&mut next);
        self.replace(next)
    }

    /// Notified after every successful replacement.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        let (changed, _) = broadcast::channel(8);
        Self {
            current: Arc::new(RwLock::new(Arc::new(PollerConfig::default()))),
            changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PollerConfig::default().validate().unwrap();
    }

    #[test]
    fn default_durations() {
        let config = PollerConfig::default();
        assert_eq!(config.min_poll_duration(), Duration::from_secs(600));
        assert_eq!(config.max_poll_duration(), Duration::from_secs(21 * 24 * 3600));
        assert_eq!(config.receipt_padding(), Duration::from_secs(600));
        assert_eq!(config.max_simultaneous_voters, 60);
        assert_eq!(config.min_percent_agreement_for_repairs, 0.5);
        assert_eq!(
            (config.min_nomination_size, config.max_nomination_size),
            (1, 5)
        );
        assert_eq!(config.target_outer_circle, 10);
        assert!(!config.drop_empty_nominators);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = PollerConfig {
            vote_margin: 0.0,
            ..PollerConfig::default()
        };
        assert!(config.validate().is_err());

        config.vote_margin = 0.75;
        config.min_percent_agreement_for_repairs = 1.5;
        assert!(config.validate().is_err());

        config.min_percent_agreement_for_repairs = 0.5;
        config.min_poll_duration_ms = config.max_poll_duration_ms + 1;
        assert!(config.validate().is_err());

        config.min_poll_duration_ms = 0;
        config.min_nomination_size = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_transfer_map_rejected() {
        let config = PollerConfig {
            reputation_transfer_map: "a,b;c,b".into(),
            ..PollerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TransferMap(_))));
    }

    #[test]
    fn replace_is_visible_to_existing_clones() {
        let handle = ConfigHandle::new(PollerConfig::default()).unwrap();
        let clone = handle.clone();
        let mut rx = clone.subscribe();
        handle.update(|c| c.quorum = 2).unwrap();
        assert_eq!(clone.snapshot().quorum, 2);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn rejected_replacement_keeps_old_config() {
        let handle = ConfigHandle::default();
        let err = handle.update(|c| c.quorum = 0);
        assert!(err.is_err());
        assert_eq!(handle.snapshot().quorum, 5);
    }
}
