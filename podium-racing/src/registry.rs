//! Lookup table of entrant profiles, loaded once as configuration.

use std::path::Path;

use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use podium::bayes::belief::Tier;
use podium::entrant::EntrantId;
use podium::file::read_json_opt;
use podium::noise::NoiseCoefficients;

use crate::context::TrackType;

/// Static attributes of an entrant that inform its multipliers, noise and prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    /// Score multiplier per track type; absent types are neutral.
    #[serde(default)]
    pub track_affinities: FxHashMap<TrackType, f64>,
    /// Score multiplier in fully wet conditions.
    #[serde(default = "neutral")]
    pub wet_skill: f64,
    /// Probability of finishing a race in benign conditions.
    #[serde(default = "neutral")]
    pub reliability: f64,
    #[serde(default)]
    pub noise: NoiseCoefficients,
}

fn neutral() -> f64 {
    1.0
}

impl EntrantProfile {
    pub fn with_track_affinity(mut self, track_type: TrackType, affinity: f64) -> Self {
        self.track_affinities.insert(track_type, affinity);
        self
    }

    pub fn track_affinity(&self, track_type: TrackType) -> f64 {
        self.track_affinities
            .get(&track_type)
            .copied()
            .unwrap_or_else(neutral)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (track_type, &affinity) in &self.track_affinities {
            if !(affinity > 0.0 && affinity.is_finite()) {
                bail!("{track_type} affinity must be finite and positive, got {affinity}");
            }
        }
        if !(self.wet_skill > 0.0 && self.wet_skill.is_finite()) {
            bail!("wet skill must be finite and positive, got {}", self.wet_skill);
        }
        if !(self.reliability > 0.0 && self.reliability <= 1.0) {
            bail!("reliability must be in (0, 1], got {}", self.reliability);
        }
        self.noise.validate()
    }
}

impl Default for EntrantProfile {
    fn default() -> Self {
        Self {
            name: None,
            group: None,
            tier: Tier::default(),
            track_affinities: FxHashMap::default(),
            wet_skill: neutral(),
            reliability: neutral(),
            noise: NoiseCoefficients::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrantRegistry {
    /// Stands in for any entrant that has no profile of its own.
    #[serde(default)]
    pub default_profile: EntrantProfile,
    #[serde(default)]
    pub entrants: FxHashMap<EntrantId, EntrantProfile>,
}
impl EntrantRegistry {
    /// Loads the registry from `path`, or `None` if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, anyhow::Error> {
        let path = path.as_ref();
        let registry: Option<Self> = read_json_opt(path)
            .with_context(|| format!("reading entrant registry from {}", path.display()))?;
        if let Some(registry) = &registry {
            registry.validate()?;
            debug!("loaded {} entrant profiles from {}", registry.entrants.len(), path.display());
        }
        Ok(registry)
    }

    /// Loads the registry from `path` if given and present, otherwise an empty registry in which
    /// every entrant takes the default profile.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        match path {
            Some(path) => Ok(Self::load(path)?.unwrap_or_else(|| {
                debug!("no entrant registry at {}; using defaults", path.display());
                Self::default()
            })),
            None => Ok(Self::default()),
        }
    }

    pub fn with_profile(mut self, entrant: impl Into<EntrantId>, profile: EntrantProfile) -> Self {
        self.entrants.insert(entrant.into(), profile);
        self
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.default_profile
            .validate()
            .context("in the default profile")?;
        for (entrant, profile) in &self.entrants {
            profile
                .validate()
                .with_context(|| format!("in the profile of {entrant}"))?;
        }
        Ok(())
    }

    pub fn get(&self, entrant: &EntrantId) -> Option<&EntrantProfile> {
        self.entrants.get(entrant)
    }

    /// The entrant's profile, or the default profile if it has none.
    pub fn profile(&self, entrant: &EntrantId) -> &EntrantProfile {
        self.get(entrant).unwrap_or(&self.default_profile)
    }

    pub fn tier(&self, entrant: &EntrantId) -> Tier {
        self.profile(entrant).tier
    }

    pub fn group(&self, entrant: &EntrantId) -> Option<&str> {
        self.profile(entrant).group.as_deref()
    }

    pub fn name<'a>(&'a self, entrant: &'a EntrantId) -> &'a str {
        self.profile(entrant)
            .name
            .as_deref()
            .unwrap_or(entrant.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "default_profile": { "tier": "developing", "reliability": 0.85 },
        "entrants": {
            "VER": {
                "name": "Max Verstappen",
                "group": "red_bull",
                "tier": "elite",
                "track_affinities": { "high_speed": 1.05, "street": 0.98 },
                "wet_skill": 1.15,
                "reliability": 0.95,
                "noise": { "form": 2.0, "failure_rate": 0.02 }
            },
            "SAR": { "group": "williams" }
        }
    }"#;

    fn registry() -> EntrantRegistry {
        serde_json::from_str(REGISTRY).unwrap()
    }

    #[test]
    fn lookup_known_entrant() {
        let registry = registry();
        registry.validate().unwrap();
        let entrant = EntrantId::from("VER");
        assert_eq!("Max Verstappen", registry.name(&entrant));
        assert_eq!(Some("red_bull"), registry.group(&entrant));
        assert_eq!(Tier::Elite, registry.tier(&entrant));
        let profile = registry.profile(&entrant);
        assert_eq!(1.05, profile.track_affinity(TrackType::HighSpeed));
        assert_eq!(1.0, profile.track_affinity(TrackType::Balanced));
        assert_eq!(2.0, profile.noise.form);
        assert_eq!(0.0, profile.noise.consistency);
    }

    #[test]
    fn sparse_profile_takes_neutral_values() {
        let registry = registry();
        let profile = registry.profile(&EntrantId::from("SAR"));
        assert_eq!(Tier::Midfield, profile.tier);
        assert_eq!(1.0, profile.wet_skill);
        assert_eq!(1.0, profile.reliability);
        assert_eq!("SAR", registry.name(&EntrantId::from("SAR")));
    }

    #[test]
    fn unknown_entrant_takes_default_profile() {
        let registry = registry();
        let entrant = EntrantId::from("ROOKIE");
        assert_eq!(None, registry.get(&entrant));
        assert_eq!(Tier::Developing, registry.tier(&entrant));
        assert_eq!(0.85, registry.profile(&entrant).reliability);
        assert_eq!(None, registry.group(&entrant));
        assert_eq!("ROOKIE", registry.name(&entrant));
    }

    #[test]
    fn invalid_profile() {
        let registry = EntrantRegistry::default().with_profile(
            "BAD",
            EntrantProfile {
                reliability: 1.5,
                ..EntrantProfile::default()
            },
        );
        assert_eq!(
            "in the profile of BAD",
            registry.validate().unwrap_err().to_string()
        );
    }

    #[test]
    fn missing_file_is_none() {
        let path = std::env::temp_dir().join("podium-racing-no-such-registry.json");
        assert_eq!(None, EntrantRegistry::load(&path).unwrap());
        assert_eq!(
            EntrantRegistry::default(),
            EntrantRegistry::load_or_default(Some(&path)).unwrap()
        );
    }
}
