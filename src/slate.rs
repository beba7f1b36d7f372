use crate::error::{ErrorContext, GppError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Bounded [0,1] driver attributes carried over from the ontology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeAttrs {
    /// Raw pace: pushes qualifying and finish ratings up.
    pub skill: f64,
    /// Willingness to race for track position: more laps led, more incidents.
    pub aggression: f64,
    /// Exposure to wrecks/mechanical failures.
    pub shadow_risk: f64,
    /// Grid / pit-stall / equipment positional edge.
    pub realpolitik_pos: f64,
}

impl ArchetypeAttrs {
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.skill,
            self.aggression,
            self.shadow_risk,
            self.realpolitik_pos,
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("skill", self.skill),
            ("aggression", self.aggression),
            ("shadow_risk", self.shadow_risk),
            ("realpolitik_pos", self.realpolitik_pos),
        ] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(format!("attribute {} = {} outside [0,1]", name, v));
            }
        }
        Ok(())
    }
}

/// Track archetype tag. Drives the regime mixing weights of the
/// scenario generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackArchetype {
    Superspeedway,
    Intermediate,
    ShortTrack,
    RoadCourse,
}

impl TrackArchetype {
    pub fn all() -> Vec<TrackArchetype> {
        use TrackArchetype::*;
        vec![Superspeedway, Intermediate, ShortTrack, RoadCourse]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Superspeedway => "superspeedway",
            Self::Intermediate => "intermediate",
            Self::ShortTrack => "short_track",
            Self::RoadCourse => "road_course",
        }
    }

    pub fn parse(s: &str) -> Option<TrackArchetype> {
        TrackArchetype::all().into_iter().find(|t| t.name() == s)
    }
}

/// One driver on the slate. Immutable for the life of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub driver_id: String,
    pub salary: i32,
    pub team_id: String,
    pub attrs: ArchetypeAttrs,
    /// Site projection, DK points.
    pub proj_points: f64,
    /// Projection uncertainty, DK points.
    pub proj_stddev: f64,
}

/// Contest roster rules. Defaults match the target contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRules {
    pub roster_size: i32,
    pub salary_cap: i32,
    /// Lower bound on drivers from a team, applied to teams the lineup uses.
    pub min_stack: i32,
    pub max_stack: i32,
}

impl Default for RosterRules {
    fn default() -> Self {
        RosterRules {
            roster_size: 6,
            salary_cap: 50_000,
            min_stack: 2,
            max_stack: 3,
        }
    }
}

/// A slate: the ordered driver pool plus contest rules and track tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slate {
    pub slate_id: String,
    pub drivers: Vec<Driver>,
    pub rules: RosterRules,
    pub track: TrackArchetype,
}

impl Slate {
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Map team_id -> driver indices, in slate order.
    pub fn team_index(&self) -> HashMap<&str, Vec<usize>> {
        let mut teams: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, d) in self.drivers.iter().enumerate() {
            teams.entry(d.team_id.as_str()).or_default().push(i);
        }
        teams
    }

    /// Input validation per the error taxonomy: malformed slates surface
    /// immediately and are never retried.
    pub fn validate(&self) -> Result<(), GppError> {
        let ctx = || ErrorContext::new(&self.slate_id, "slate");
        let fail = |message: String| GppError::InvalidInput {
            message,
            context: ctx(),
        };

        if self.drivers.is_empty() {
            return Err(fail("slate has no drivers".into()));
        }
        if self.rules.roster_size <= 0 {
            return Err(fail(format!(
                "roster_size {} must be positive",
                self.rules.roster_size
            )));
        }
        if (self.drivers.len() as i32) < self.rules.roster_size {
            return Err(fail(format!(
                "{} drivers cannot fill a roster of {}",
                self.drivers.len(),
                self.rules.roster_size
            )));
        }
        if self.rules.salary_cap <= 0 {
            return Err(fail(format!(
                "salary_cap {} must be positive",
                self.rules.salary_cap
            )));
        }

        let mut seen = HashMap::new();
        for d in &self.drivers {
            if d.salary <= 0 {
                return Err(fail(format!(
                    "driver {} has non-positive salary {}",
                    d.driver_id, d.salary
                )));
            }
            if !d.proj_points.is_finite() || !d.proj_stddev.is_finite() || d.proj_stddev < 0.0 {
                return Err(fail(format!(
                    "driver {} has non-finite projection ({}, {})",
                    d.driver_id, d.proj_points, d.proj_stddev
                )));
            }
            if let Err(e) = d.attrs.validate() {
                return Err(fail(format!("driver {}: {}", d.driver_id, e)));
            }
            if seen.insert(d.driver_id.clone(), ()).is_some() {
                return Err(fail(format!("duplicate driver_id {}", d.driver_id)));
            }
        }
        Ok(())
    }

    /// SHA-256 fingerprint of the normalized slate plus the constraint-spec
    /// hash. Keys the write-once cache; any change invalidates entries.
    pub fn fingerprint(&self, spec_hash: &str) -> String {
        let mut rows: Vec<String> = self
            .drivers
            .iter()
            .map(|d| {
                format!(
                    "{}|{}|{}|{:.6}|{:.6}|{:.6}|{:.6}|{:.4}|{:.4}",
                    d.driver_id,
                    d.salary,
                    d.team_id,
                    d.attrs.skill,
                    d.attrs.aggression,
                    d.attrs.shadow_risk,
                    d.attrs.realpolitik_pos,
                    d.proj_points,
                    d.proj_stddev,
                )
            })
            .collect();
        rows.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.slate_id.as_bytes());
        hasher.update(self.track.name().as_bytes());
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                self.rules.roster_size,
                self.rules.salary_cap,
                self.rules.min_stack,
                self.rules.max_stack
            )
            .as_bytes(),
        );
        for row in &rows {
            hasher.update(row.as_bytes());
        }
        hasher.update(spec_hash.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Load a slate from CSV with columns:
    /// driver_id,salary,team_id,skill,aggression,shadow_risk,realpolitik_pos,proj_points,proj_stddev
    pub fn from_csv(
        path: &Path,
        slate_id: &str,
        track: TrackArchetype,
        rules: RosterRules,
    ) -> Result<Slate, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut drivers = Vec::new();
        for record in rdr.records() {
            let r = record?;
            drivers.push(Driver {
                driver_id: r[0].to_string(),
                salary: r[1].trim().parse()?,
                team_id: r[2].to_string(),
                attrs: ArchetypeAttrs {
                    skill: r[3].trim().parse()?,
                    aggression: r[4].trim().parse()?,
                    shadow_risk: r[5].trim().parse()?,
                    realpolitik_pos: r[6].trim().parse()?,
                },
                proj_points: r[7].trim().parse()?,
                proj_stddev: r[8].trim().parse()?,
            });
        }
        Ok(Slate {
            slate_id: slate_id.to_string(),
            drivers,
            rules,
            track,
        })
    }
}
