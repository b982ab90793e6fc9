//! Entrants in an event, along with the contextual multipliers and noise coefficients that turn a
//! deterministic base score into a trial-level score.

use std::fmt::{Display, Formatter};

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::noise::NoiseCoefficients;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntrantId(String);

impl EntrantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntrantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntrantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Multipliers derived by the caller from the race context. Each is applied to the base score
/// before any per-trial noise is added.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextMultipliers {
    pub track: f64,
    pub weather: f64,
    pub reliability: f64,
}
impl ContextMultipliers {
    pub fn product(&self) -> f64 {
        self.track * self.weather * self.reliability
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, value) in [
            ("track", self.track),
            ("weather", self.weather),
            ("reliability", self.reliability),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("{name} multiplier must be finite and positive, got {value}");
            }
        }
        Ok(())
    }
}

impl Default for ContextMultipliers {
    fn default() -> Self {
        Self {
            track: 1.0,
            weather: 1.0,
            reliability: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    pub id: EntrantId,
    pub name: String,
    pub group: String,
    pub base_score: f64,
    #[serde(default)]
    pub multipliers: ContextMultipliers,
    #[serde(default)]
    pub noise: NoiseCoefficients,
}
impl Entrant {
    pub fn new(id: impl Into<String>, base_score: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: EntrantId(id),
            group: String::new(),
            base_score,
            multipliers: ContextMultipliers::default(),
            noise: NoiseCoefficients::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_multipliers(mut self, multipliers: ContextMultipliers) -> Self {
        self.multipliers = multipliers;
        self
    }

    pub fn with_noise(mut self, noise: NoiseCoefficients) -> Self {
        self.noise = noise;
        self
    }

    /// The base score scaled by the context multipliers.
    pub fn adjusted_score(&self) -> f64 {
        self.base_score * self.multipliers.product()
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.base_score.is_finite() {
            bail!("base score of {} must be finite, got {}", self.id, self.base_score);
        }
        self.multipliers.validate()?;
        self.noise.validate()?;
        Ok(())
    }
}

/// Validates a field of entrants, rejecting an empty field and duplicate identifiers.
pub fn validate_field(entrants: &[Entrant]) -> Result<(), anyhow::Error> {
    if entrants.is_empty() {
        bail!("at least one entrant must be specified");
    }
    for (index, entrant) in entrants.iter().enumerate() {
        entrant.validate()?;
        if entrants[..index].iter().any(|other| other.id == entrant.id) {
            bail!("duplicate entrant {}", entrant.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn adjusted_score() {
        let entrant = Entrant::new("ham", 10.0).with_multipliers(ContextMultipliers {
            track: 1.2,
            weather: 0.5,
            reliability: 0.9,
        });
        assert_float_relative_eq!(5.4, entrant.adjusted_score());
    }

    #[test]
    fn validate_field_rejects_empty() {
        assert_eq!(
            "at least one entrant must be specified",
            validate_field(&[]).unwrap_err().to_string()
        );
    }

    #[test]
    fn validate_field_rejects_duplicates() {
        let field = [Entrant::new("ver", 3.0), Entrant::new("ver", 2.0)];
        assert_eq!(
            "duplicate entrant ver",
            validate_field(&field).unwrap_err().to_string()
        );
    }

    #[test]
    fn validate_rejects_non_finite_score() {
        let entrant = Entrant::new("nor", f64::NAN);
        assert_eq!(
            "base score of nor must be finite, got NaN",
            entrant.validate().unwrap_err().to_string()
        );
    }

    #[test]
    fn validate_rejects_zero_multiplier() {
        let entrant = Entrant::new("lec", 1.0).with_multipliers(ContextMultipliers {
            track: 0.0,
            ..ContextMultipliers::default()
        });
        assert_eq!(
            "track multiplier must be finite and positive, got 0",
            entrant.validate().unwrap_err().to_string()
        );
    }
}
