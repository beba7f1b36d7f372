use crate::slate::TrackArchetype;
use serde::{Deserialize, Serialize};

/// Skeleton-narrative race regime. Drawn first per scenario; every
/// per-driver conditional distribution is parameterized by it, and the
/// label is stored on the scenario for regime-aware allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RaceRegime {
    Dominator = 0,
    Chaos = 1,
    FuelMileage = 2,
    Parity = 3,
}

pub const N_REGIMES: usize = 4;

impl RaceRegime {
    pub fn all() -> [RaceRegime; N_REGIMES] {
        [
            RaceRegime::Dominator,
            RaceRegime::Chaos,
            RaceRegime::FuelMileage,
            RaceRegime::Parity,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<RaceRegime> {
        RaceRegime::all().get(i).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dominator => "dominator",
            Self::Chaos => "chaos",
            Self::FuelMileage => "fuel_mileage",
            Self::Parity => "parity",
        }
    }

    pub fn parse(s: &str) -> Option<RaceRegime> {
        RaceRegime::all().into_iter().find(|r| r.name() == s)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Dominator => "One or two cars control the race; laps led concentrate",
            Self::Chaos => "Wreck-heavy race; finishing order decouples from pace",
            Self::FuelMileage => "Strategy race; track position beats raw speed late",
            Self::Parity => "Spread-out laps led, finish tracks qualifying speed",
        }
    }

    /// Regime-conditional distribution parameters for the generator.
    pub fn params(&self) -> RegimeParams {
        match self {
            Self::Dominator => RegimeParams {
                finish_sigma: 0.12,
                incident_mult: 0.8,
                lap_concentration: 1.2,
                led_skill_sharpness: 4.0,
                lap_budget_frac: 0.82,
            },
            Self::Chaos => RegimeParams {
                finish_sigma: 0.45,
                incident_mult: 2.2,
                lap_concentration: 2.5,
                led_skill_sharpness: 1.5,
                lap_budget_frac: 0.70,
            },
            Self::FuelMileage => RegimeParams {
                finish_sigma: 0.30,
                incident_mult: 0.9,
                lap_concentration: 2.0,
                led_skill_sharpness: 2.0,
                lap_budget_frac: 0.80,
            },
            Self::Parity => RegimeParams {
                finish_sigma: 0.18,
                incident_mult: 1.0,
                lap_concentration: 3.0,
                led_skill_sharpness: 1.0,
                lap_budget_frac: 0.85,
            },
        }
    }
}

/// Per-regime knobs of the causal network.
#[derive(Debug, Clone, Copy)]
pub struct RegimeParams {
    /// Noise stddev on the finish rating (skill is on a [0,1] scale).
    pub finish_sigma: f64,
    /// Multiplier on the base incident rate.
    pub incident_mult: f64,
    /// Gamma shape scale for the laps-led allocation; higher = flatter.
    pub lap_concentration: f64,
    /// Exponential tilt of laps-led weight toward skill.
    pub led_skill_sharpness: f64,
    /// Fraction of race length targeted by the laps-led proposal.
    pub lap_budget_frac: f64,
}

/// Regime mixing weights per track archetype, in `RaceRegime::all()` order.
/// Each row sums to 1.
pub fn track_mixing_weights(track: TrackArchetype) -> [f64; N_REGIMES] {
    match track {
        // Pack racing: wrecks decide, nobody dominates.
        TrackArchetype::Superspeedway => [0.05, 0.55, 0.15, 0.25],
        // Aero tracks: clean-air dominators are the default story.
        TrackArchetype::Intermediate => [0.45, 0.15, 0.15, 0.25],
        TrackArchetype::ShortTrack => [0.30, 0.30, 0.05, 0.35],
        TrackArchetype::RoadCourse => [0.20, 0.20, 0.35, 0.25],
    }
}
