//! Race conditions and their translation into per-entrant score multipliers.

use std::ops::RangeInclusive;

use anyhow::bail;
use ordinalizer::Ordinal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumCount, EnumIter, EnumString};

use podium::entrant::ContextMultipliers;
use podium::noise::NoiseCoefficients;

use crate::registry::EntrantProfile;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Ordinal,
    EnumCount,
    EnumIter,
    EnumString,
    Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Street,
    HighSpeed,
    HighDownforce,
    Balanced,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Ordinal,
    EnumCount,
    EnumIter,
    EnumString,
    Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Dry,
    Overcast,
    Damp,
    Wet,
}
impl WeatherCondition {
    /// How wet the surface is, from 0 (dry) to 1 (fully wet).
    pub fn wetness(&self) -> f64 {
        match self {
            WeatherCondition::Dry => 0.0,
            WeatherCondition::Overcast => 0.1,
            WeatherCondition::Damp => 0.5,
            WeatherCondition::Wet => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceContext {
    pub track_type: TrackType,
    #[serde(default)]
    pub weather: WeatherCondition,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub wind_kph: Option<f64>,
    #[serde(default)]
    pub precipitation_probability: Option<f64>,
}
impl RaceContext {
    pub fn new(track_type: TrackType, weather: WeatherCondition) -> Self {
        Self {
            track_type,
            weather,
            temperature_c: None,
            wind_kph: None,
            precipitation_probability: None,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(temperature) = self.temperature_c {
            if !(-30.0..=60.0).contains(&temperature) {
                bail!("temperature must be in [-30, 60] °C, got {temperature}");
            }
        }
        if let Some(wind) = self.wind_kph {
            if !(wind >= 0.0 && wind.is_finite()) {
                bail!("wind speed must be finite and non-negative, got {wind}");
            }
        }
        if let Some(precipitation) = self.precipitation_probability {
            if !(0.0..=1.0).contains(&precipitation) {
                bail!("precipitation probability must be in [0, 1], got {precipitation}");
            }
        }
        Ok(())
    }

    /// Expected wetness, taking the larger of the reported condition and the chance of rain.
    pub fn wetness(&self) -> f64 {
        f64::max(
            self.weather.wetness(),
            self.precipitation_probability.unwrap_or_default(),
        )
    }
}

/// Constants governing the translation of a [RaceContext] into multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMapper {
    /// Ambient temperature above which reliability begins to degrade.
    pub heat_threshold_c: f64,
    /// Relative increase of the unreliability per degree above the threshold.
    pub heat_sensitivity: f64,
    /// Wind speed above which weather sensitivity is amplified.
    pub wind_threshold_kph: f64,
    /// Relative increase of the weather noise per km/h above the wind threshold.
    pub wind_sensitivity: f64,
    pub multiplier_bounds: RangeInclusive<f64>,
}
impl ContextMapper {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, value) in [
            ("heat sensitivity", self.heat_sensitivity),
            ("wind sensitivity", self.wind_sensitivity),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                bail!("{name} must be finite and non-negative, got {value}");
            }
        }
        let (start, end) = (*self.multiplier_bounds.start(), *self.multiplier_bounds.end());
        if !(start > 0.0 && start <= end && end.is_finite()) {
            bail!("multiplier bounds must be positive and ordered, got {start}..={end}");
        }
        Ok(())
    }

    /// Multipliers applied to the entrant's base score before simulation.
    pub fn multipliers(&self, profile: &EntrantProfile, context: &RaceContext) -> ContextMultipliers {
        let wetness = context.wetness();
        let track = profile.track_affinity(context.track_type);
        let weather = 1.0 + wetness * (profile.wet_skill - 1.0);
        let heat = context
            .temperature_c
            .map(|temperature| f64::max(0.0, temperature - self.heat_threshold_c))
            .unwrap_or_default();
        let unreliability = (1.0 - profile.reliability) * (1.0 + heat * self.heat_sensitivity);
        ContextMultipliers {
            track: self.bound(track),
            weather: self.bound(weather),
            reliability: self.bound(1.0 - unreliability),
        }
    }

    /// The profile's noise, with the weather terms amplified by wetness and wind, and the failure
    /// rate by heat.
    pub fn noise(&self, profile: &EntrantProfile, context: &RaceContext) -> NoiseCoefficients {
        let mut noise = profile.noise;
        let wind = context
            .wind_kph
            .map(|wind| f64::max(0.0, wind - self.wind_threshold_kph))
            .unwrap_or_default();
        noise.weather *= (1.0 + context.wetness()) * (1.0 + wind * self.wind_sensitivity);
        if let Some(temperature) = context.temperature_c {
            let heat = f64::max(0.0, temperature - self.heat_threshold_c);
            noise.failure_rate =
                f64::min(1.0, noise.failure_rate * (1.0 + heat * self.heat_sensitivity));
        }
        noise
    }

    fn bound(&self, value: f64) -> f64 {
        value.clamp(*self.multiplier_bounds.start(), *self.multiplier_bounds.end())
    }
}

impl Default for ContextMapper {
    fn default() -> Self {
        Self {
            heat_threshold_c: 30.0,
            heat_sensitivity: 0.05,
            wind_threshold_kph: 20.0,
            wind_sensitivity: 0.02,
            multiplier_bounds: 0.5..=1.5,
        }
    }
}
