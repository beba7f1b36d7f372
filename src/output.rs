use crate::contest::ContestResult;
use crate::lineup::Portfolio;
use crate::ownership::OwnershipPrediction;
use crate::portfolio::OptimizeConfig;
use crate::scenario::ScenarioMatrix;
use crate::slate::Slate;
use std::path::Path;

/// Save a portfolio to CSV: one row per lineup, drivers joined by ';'.
pub fn save_portfolio_csv(
    portfolio: &Portfolio,
    slate: &Slate,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["lineup_id", "regime", "salary", "drivers"])?;
    for lineup in &portfolio.lineups {
        wtr.write_record(&[
            lineup.id.clone(),
            lineup
                .regime
                .map(|r| r.name().to_string())
                .unwrap_or_else(|| "-".to_string()),
            lineup.salary.to_string(),
            lineup.driver_ids(slate).join(";"),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Load a portfolio saved by [`save_portfolio_csv`], including each
/// lineup's regime tag ("-" means untagged).
pub fn load_portfolio_csv(
    slate: &Slate,
    path: &Path,
) -> Result<Portfolio, Box<dyn std::error::Error>> {
    let index: std::collections::HashMap<&str, usize> = slate
        .drivers
        .iter()
        .enumerate()
        .map(|(i, d)| (d.driver_id.as_str(), i))
        .collect();
    let mut rdr = csv::Reader::from_path(path)?;
    let mut portfolio = Portfolio::default();
    for record in rdr.records() {
        let r = record?;
        let regime = match r[1].trim() {
            "-" => None,
            name => Some(
                crate::regime::RaceRegime::parse(name)
                    .ok_or_else(|| format!("unknown regime '{}'", name))?,
            ),
        };
        let drivers: Result<Vec<usize>, String> = r[3]
            .split(';')
            .map(|id| {
                index
                    .get(id)
                    .copied()
                    .ok_or_else(|| format!("unknown driver_id {}", id))
            })
            .collect();
        let mut lineup = crate::lineup::Lineup::new(r[0].to_string(), drivers?, slate);
        lineup.regime = regime;
        portfolio.lineups.push(lineup);
    }
    Ok(portfolio)
}

/// Save ownership predictions to CSV.
pub fn save_ownership_csv(
    predictions: &[OwnershipPrediction],
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["driver_id", "mean", "p05", "p95"])?;
    for p in predictions {
        wtr.write_record(&[
            p.driver_id.clone(),
            format!("{:.6}", p.mean),
            format!("{:.6}", p.p05),
            format!("{:.6}", p.p95),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Load ownership predictions saved by [`save_ownership_csv`].
pub fn load_ownership_csv(
    path: &Path,
) -> Result<Vec<OwnershipPrediction>, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut predictions = Vec::new();
    for record in rdr.records() {
        let r = record?;
        predictions.push(OwnershipPrediction {
            driver_id: r[0].to_string(),
            mean: r[1].trim().parse()?,
            p05: r[2].trim().parse()?,
            p95: r[3].trim().parse()?,
        });
    }
    Ok(predictions)
}

/// Save a contest result as pretty JSON.
pub fn save_contest_json(
    result: &ContestResult,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(result)?)?;
    Ok(())
}

/// Per-driver scenario summary: marginal mean points and dominator rate.
pub fn save_scenario_summary_csv(
    matrix: &ScenarioMatrix,
    slate: &Slate,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["driver_id", "mean_points", "dominator_rate", "mean_laps_led"])?;
    for d in 0..matrix.d {
        let dom = (0..matrix.n)
            .filter(|&s| matrix.dominator[s * matrix.d + d])
            .count() as f64
            / matrix.n as f64;
        let laps: u64 = (0..matrix.n)
            .map(|s| matrix.laps_led[s * matrix.d + d] as u64)
            .sum();
        wtr.write_record(&[
            slate.drivers[d].driver_id.clone(),
            format!("{:.3}", matrix.driver_mean_points(d)),
            format!("{:.4}", dom),
            format!("{:.2}", laps as f64 / matrix.n as f64),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save the optimizer run configuration in TOML form alongside results.
pub fn save_config_toml(
    config: &OptimizeConfig,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}
