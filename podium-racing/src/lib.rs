//! Motor-racing front end to the `podium` engine: entrant profiles, race conditions, the feed of
//! resolved races, and a [Forecaster](forecast::Forecaster) serving simulations, predictions,
//! outcome updates and recalibration.

pub mod config;
pub mod context;
pub mod forecast;
pub mod history;
pub mod print;
pub mod registry;
