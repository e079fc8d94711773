//! Per-channel generation settings.
//!
//! The store keeps an atomically swapped snapshot of every channel's
//! [`ChannelConfig`]. Readers call [`ChannelConfigStore::get`] and always see
//! the latest committed map; writers go through [`ChannelConfigStore::update`],
//! which validates, persists the whole map to disk, and only then swaps the
//! snapshot in.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{BanterError, Result};

pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const MAX_TOKENS_RANGE: RangeInclusive<i64> = 1..=4096;

/// Generation parameters for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChannelConfig {
    /// Resolve the effective config: explicit override > stored channel
    /// config > global default.
    pub fn resolve(
        stored: Option<&ChannelConfig>,
        defaults: &ChannelConfig,
        overrides: &SettingsOverride,
    ) -> ChannelConfig {
        let mut cfg = stored.unwrap_or(defaults).clone();
        overrides.apply_to(&mut cfg);
        cfg
    }

    /// Range-check a config read from disk the same way user input is checked.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        SettingsOverride {
            model: Some(self.model.clone()),
            temperature: Some(self.temperature),
            max_tokens: Some(i64::from(self.max_tokens)),
        }
        .validate(&[])
    }
}

/// Optional per-field overrides, as supplied by the settings command.
///
/// Values are kept in their raw input types so out-of-range input can be
/// reported verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverride {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
}

impl SettingsOverride {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.temperature.is_none() && self.max_tokens.is_none()
    }

    /// Check every supplied field. `available_models` empty means any model.
    pub fn validate(&self, available_models: &[String]) -> std::result::Result<(), ValidationError> {
        if let Some(t) = self.temperature {
            if !TEMPERATURE_RANGE.contains(&t) {
                return Err(ValidationError::Temperature(t));
            }
        }
        if let Some(m) = self.max_tokens {
            if !MAX_TOKENS_RANGE.contains(&m) {
                return Err(ValidationError::MaxTokens(m));
            }
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty()
                || (!available_models.is_empty() && !available_models.contains(model))
            {
                return Err(ValidationError::Model {
                    model: model.clone(),
                    available: available_models.join(", "),
                });
            }
        }
        Ok(())
    }

    /// Copy the supplied fields onto `cfg`. Out-of-range token counts are
    /// clamped; callers validate first when the input comes from users.
    fn apply_to(&self, cfg: &mut ChannelConfig) {
        if let Some(model) = &self.model {
            cfg.model = model.clone();
        }
        if let Some(t) = self.temperature {
            cfg.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            cfg.max_tokens = m.clamp(*MAX_TOKENS_RANGE.start(), *MAX_TOKENS_RANGE.end()) as u32;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("You supplied an invalid temperature: {0}. Temperature must be between 0 and 1.")]
    Temperature(f64),

    #[error("You supplied an invalid max_tokens: {0}. Max tokens must be between 1 and 4096.")]
    MaxTokens(i64),

    #[error("You supplied an unknown model: {model}. Available models: {available}.")]
    Model { model: String, available: String },
}

/// Process-wide channel settings with read-snapshot / write-replace semantics.
pub struct ChannelConfigStore {
    path: PathBuf,
    defaults: ChannelConfig,
    snapshot: ArcSwap<HashMap<u64, ChannelConfig>>,
    /// Serializes writers; readers never take it.
    write_lock: Mutex<()>,
}

impl ChannelConfigStore {
    /// Empty store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>, defaults: ChannelConfig) -> Self {
        Self {
            path: path.into(),
            defaults,
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the settings file wholesale. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>, defaults: ChannelConfig) -> Result<Self> {
        let store = Self::new(path, defaults);
        if !store.path.exists() {
            info!(path = %store.path.display(), "no channel settings file yet");
            return Ok(store);
        }

        let raw = std::fs::read_to_string(&store.path)?;
        let parsed: HashMap<String, ChannelConfig> =
            serde_json::from_str(&raw).map_err(|e| BanterError::Settings {
                path: store.path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut map = HashMap::with_capacity(parsed.len());
        for (key, cfg) in parsed {
            let Ok(channel_id) = key.parse::<u64>() else {
                warn!(key = %key, "skipping non-numeric channel id in settings file");
                continue;
            };
            match cfg.validate() {
                Ok(()) => {
                    map.insert(channel_id, cfg);
                }
                Err(e) => warn!(channel = channel_id, error = %e, "skipping invalid channel settings"),
            }
        }

        info!(path = %store.path.display(), channels = map.len(), "loaded channel settings");
        store.snapshot.store(Arc::new(map));
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &ChannelConfig {
        &self.defaults
    }

    /// Effective config for a channel: stored value or the global defaults.
    pub fn get(&self, channel_id: u64) -> ChannelConfig {
        let snapshot = self.snapshot.load();
        ChannelConfig::resolve(snapshot.get(&channel_id), &self.defaults, &SettingsOverride::default())
    }

    /// Stored config only, `None` when the channel was never configured.
    pub fn stored(&self, channel_id: u64) -> Option<ChannelConfig> {
        self.snapshot.load().get(&channel_id).cloned()
    }

    /// Validate and apply a settings change for one channel.
    ///
    /// The channel entry is created from the defaults on first update. The new
    /// map is written to disk before it becomes visible; on any error nothing
    /// changes.
    pub fn update(
        &self,
        channel_id: u64,
        update: &SettingsOverride,
        available_models: &[String],
    ) -> Result<ChannelConfig> {
        update.validate(available_models)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BanterError::Internal("settings write lock poisoned".to_string()))?;

        let mut next = HashMap::clone(&self.snapshot.load());
        let cfg = next
            .entry(channel_id)
            .or_insert_with(|| self.defaults.clone());
        update.apply_to(cfg);
        let cfg = cfg.clone();

        self.persist(&next)?;
        self.snapshot.store(Arc::new(next));

        info!(
            channel = channel_id,
            model = %cfg.model,
            temperature = cfg.temperature,
            max_tokens = cfg.max_tokens,
            "channel settings updated"
        );
        Ok(cfg)
    }

    /// Rewrite the whole settings file (temp file + rename).
    fn persist(&self, map: &HashMap<u64, ChannelConfig>) -> Result<()> {
        let ordered: BTreeMap<String, &ChannelConfig> =
            map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        let raw = serde_json::to_string_pretty(&ordered)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
