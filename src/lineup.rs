use crate::regime::RaceRegime;
use crate::slate::Slate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One contest entry: exactly roster_size distinct drivers, stored as
/// sorted slate indices. The id participates in contest tie-breaks
/// (score desc, id lex asc), so ids must be unique within a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineup {
    pub id: String,
    pub drivers: Vec<usize>,
    pub salary: i32,
    /// Regime the portfolio generator targeted, if any.
    pub regime: Option<RaceRegime>,
}

impl Lineup {
    pub fn new(id: impl Into<String>, mut drivers: Vec<usize>, slate: &Slate) -> Lineup {
        drivers.sort_unstable();
        let salary = drivers.iter().map(|&i| slate.drivers[i].salary).sum();
        Lineup {
            id: id.into(),
            drivers,
            salary,
            regime: None,
        }
    }

    pub fn driver_ids<'a>(&self, slate: &'a Slate) -> Vec<&'a str> {
        self.drivers
            .iter()
            .map(|&i| slate.drivers[i].driver_id.as_str())
            .collect()
    }

    /// Shared drivers with another lineup (both sorted).
    pub fn overlap(&self, other: &Lineup) -> usize {
        let (mut i, mut j, mut shared) = (0, 0, 0);
        while i < self.drivers.len() && j < other.drivers.len() {
            match self.drivers[i].cmp(&other.drivers[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    shared += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        shared
    }

    /// Drivers by which this lineup differs from another of equal size.
    /// The set-symmetric Hamming distance is twice this.
    pub fn diff_count(&self, other: &Lineup) -> usize {
        self.drivers.len() - self.overlap(other)
    }

    /// Sum of mean ownership across the roster.
    pub fn total_ownership(&self, ownership: &[f64]) -> f64 {
        self.drivers.iter().map(|&i| ownership[i]).sum()
    }

    /// Roster feasibility: size, distinctness, salary cap, team stacking
    /// on used teams.
    pub fn check_feasible(&self, slate: &Slate) -> Result<(), String> {
        let rules = &slate.rules;
        if self.drivers.len() != rules.roster_size as usize {
            return Err(format!(
                "lineup {} has {} drivers, roster is {}",
                self.id,
                self.drivers.len(),
                rules.roster_size
            ));
        }
        if self.drivers.windows(2).any(|w| w[0] == w[1]) {
            return Err(format!("lineup {} repeats a driver", self.id));
        }
        if let Some(&bad) = self.drivers.iter().find(|&&i| i >= slate.len()) {
            return Err(format!("lineup {} references driver index {}", self.id, bad));
        }
        if self.salary > rules.salary_cap {
            return Err(format!(
                "lineup {} salary {} over cap {}",
                self.id, self.salary, rules.salary_cap
            ));
        }
        let mut team_counts: HashMap<&str, i32> = HashMap::new();
        for &i in &self.drivers {
            *team_counts
                .entry(slate.drivers[i].team_id.as_str())
                .or_insert(0) += 1;
        }
        for (team, count) in &team_counts {
            if *count < rules.min_stack || *count > rules.max_stack {
                return Err(format!(
                    "lineup {} has {} drivers from team {} (stack bounds [{}, {}])",
                    self.id, count, team, rules.min_stack, rules.max_stack
                ));
            }
        }
        Ok(())
    }
}

/// A regime that could not fill its allocated slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeShortfall {
    pub regime: Option<RaceRegime>,
    pub requested: usize,
    pub produced: usize,
    pub reason: String,
}

/// Ordered collection of lineups plus run-outcome markers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub lineups: Vec<Lineup>,
    /// Set when the request's cancellation token fired mid-run; the
    /// lineups present are still valid.
    pub cancelled: bool,
    pub shortfalls: Vec<RegimeShortfall>,
}

impl Portfolio {
    pub fn len(&self) -> usize {
        self.lineups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineups.is_empty()
    }

    /// Smallest pairwise driver difference in the portfolio, or None for
    /// fewer than two lineups.
    pub fn min_pairwise_diff(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for i in 0..self.lineups.len() {
            for j in (i + 1)..self.lineups.len() {
                let diff = self.lineups[i].diff_count(&self.lineups[j]);
                best = Some(best.map_or(diff, |b| b.min(diff)));
            }
        }
        best
    }
}
