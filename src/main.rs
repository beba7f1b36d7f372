use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gpp_sim::cancel::CancelToken;
use gpp_sim::constraint::{ConstraintSource, ConstraintSpec};
use gpp_sim::contest::{Contest, PayoutSource, SimulationConfig};
use gpp_sim::ownership::{CombineMethod, DecayKind, EnsembleConfig, TrainingSet};
use gpp_sim::portfolio::OptimizeConfig;
use gpp_sim::scenario::GeneratorConfig;
use gpp_sim::slate::{RosterRules, Slate, TrackArchetype};
use gpp_sim::{estimate_ownership, optimize_with_leverage, output, simulate_contest};

#[derive(Parser)]
#[command(name = "gpp-sim", about = "Tail-equity GPP lineup optimizer for NASCAR DFS")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate race scenarios and write a per-driver summary
    Scenarios {
        /// Slate CSV file
        #[arg(long)]
        slate: String,

        /// Track archetype (superspeedway|intermediate|short_track|road_course)
        #[arg(long, default_value = "intermediate")]
        track: String,

        /// Number of scenarios
        #[arg(long, default_value = "1000")]
        n: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory
        #[arg(long, default_value = "output/scenarios")]
        output_dir: String,
    },

    /// Estimate ownership from historical contest data
    Ownership {
        /// Slate CSV file
        #[arg(long)]
        slate: String,

        #[arg(long, default_value = "intermediate")]
        track: String,

        /// History CSV (driver_id,track,race_index,salary,skill,proj_points,ownership)
        #[arg(long)]
        history: String,

        /// Combination method (voting|stacking)
        #[arg(long, default_value = "voting")]
        method: String,

        /// Bootstrap replicates for the uncertainty band
        #[arg(long, default_value = "100")]
        bootstrap: usize,

        /// Recent-form decay (none|linear|exponential)
        #[arg(long, default_value = "exponential")]
        decay: String,

        /// Output CSV
        #[arg(long, default_value = "output/ownership.csv")]
        output: String,
    },

    /// Simulate a contest for an existing portfolio
    Simulate {
        #[arg(long)]
        slate: String,

        #[arg(long, default_value = "intermediate")]
        track: String,

        /// Ownership CSV (driver_id,mean,p05,p95)
        #[arg(long)]
        ownership: String,

        /// Portfolio CSV (lineup_id,regime,salary,drivers)
        #[arg(long)]
        portfolio: String,

        /// Historical payouts CSV (rank,payout)
        #[arg(long)]
        payouts: String,

        #[arg(long, default_value = "20.0")]
        entry_fee: f64,

        /// Opponent lineups to sample
        #[arg(long, default_value = "1000")]
        field_size: usize,

        /// Advertised contest size (payout tier)
        #[arg(long, default_value = "5000")]
        contest_size: usize,

        /// Scenario draws (0 = all)
        #[arg(long, default_value = "0")]
        n_sims: usize,

        #[arg(long, default_value = "1000")]
        n_scenarios: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "output/contest.json")]
        output: String,
    },

    /// Build a tail-optimal portfolio
    Optimize {
        #[arg(long)]
        slate: String,

        #[arg(long, default_value = "intermediate")]
        track: String,

        /// Ownership CSV; omit to optimize without leverage
        #[arg(long)]
        ownership: Option<String>,

        #[arg(long, default_value = "20")]
        n_lineups: usize,

        /// Upper-tail level (1.0 = mean objective)
        #[arg(long, default_value = "0.1")]
        alpha: f64,

        /// Ownership penalty weight
        #[arg(long, default_value = "0.0")]
        lambda: f64,

        /// Minimum driver difference between lineups
        #[arg(long, default_value = "2")]
        min_diff: usize,

        #[arg(long, default_value = "1000")]
        n_scenarios: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// TOML file overriding the full optimizer config
        #[arg(long)]
        config: Option<String>,

        #[arg(long, default_value = "output/portfolio")]
        output_dir: String,
    },
}

fn parse_track(s: &str) -> TrackArchetype {
    TrackArchetype::parse(s).unwrap_or_else(|| {
        eprintln!("Unknown track archetype '{}', using intermediate", s);
        TrackArchetype::Intermediate
    })
}

fn load_slate(path: &str, track: TrackArchetype) -> Result<Slate, Box<dyn std::error::Error>> {
    let slate_id = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "slate".to_string());
    let slate = Slate::from_csv(Path::new(path), &slate_id, track, RosterRules::default())?;
    slate.validate()?;
    Ok(slate)
}

fn load_payouts(path: &str) -> Result<Vec<(i32, f64)>, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for record in rdr.records() {
        let r = record?;
        points.push((r[0].trim().parse()?, r[1].trim().parse()?));
    }
    Ok(points)
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]").unwrap());
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn main() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gpp_sim=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Scenarios {
            slate,
            track,
            n,
            seed,
            output_dir,
        } => {
            let slate = match load_slate(&slate, parse_track(&track)) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error loading slate: {}", e);
                    return;
                }
            };
            let spec = match ConstraintSpec::compile(&ConstraintSource::default(), &slate) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error compiling constraint spec: {}", e);
                    return;
                }
            };

            let pb = spinner("generating scenarios");
            let result = gpp_sim::scenario::generate(
                &slate,
                &spec,
                &GeneratorConfig::new(n, seed),
                &cancel,
            );
            pb.finish_and_clear();

            match result {
                Ok(matrix) => {
                    let hist = matrix.regime_histogram();
                    println!(
                        "Generated {} scenarios for {} drivers (seed {})",
                        matrix.n, matrix.d, seed
                    );
                    for (i, regime) in gpp_sim::regime::RaceRegime::all().iter().enumerate() {
                        println!("  {:>12}: {}", regime.name(), hist[i]);
                    }
                    println!("  rejections : {}", matrix.rejections.total());

                    let path = PathBuf::from(&output_dir).join("driver_summary.csv");
                    match output::save_scenario_summary_csv(&matrix, &slate, &path) {
                        Ok(()) => println!("Saved driver summary to {}", path.display()),
                        Err(e) => eprintln!("Error saving summary: {}", e),
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Commands::Ownership {
            slate,
            track,
            history,
            method,
            bootstrap,
            decay,
            output,
        } => {
            let slate = match load_slate(&slate, parse_track(&track)) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error loading slate: {}", e);
                    return;
                }
            };
            let history = match TrainingSet::from_csv(Path::new(&history)) {
                Ok(h) => h,
                Err(e) => {
                    eprintln!("Error loading history: {}", e);
                    return;
                }
            };

            let config = EnsembleConfig {
                method: if method == "stacking" {
                    CombineMethod::Stacking
                } else {
                    CombineMethod::Voting
                },
                bootstrap_samples: bootstrap,
                decay: DecayKind::parse(&decay).unwrap_or(DecayKind::Exponential),
                ..EnsembleConfig::default()
            };

            let pb = spinner("fitting ownership ensemble");
            let result = estimate_ownership(&slate, &history, &config);
            pb.finish_and_clear();

            match result {
                Ok(predictions) => {
                    println!(
                        "Estimated ownership for {} drivers ({} bootstrap replicates)",
                        predictions.len(),
                        bootstrap
                    );
                    for p in predictions.iter().take(5) {
                        println!(
                            "  {:>12}: {:.3} [{:.3}, {:.3}]",
                            p.driver_id, p.mean, p.p05, p.p95
                        );
                    }
                    let path = PathBuf::from(&output);
                    match output::save_ownership_csv(&predictions, &path) {
                        Ok(()) => println!("Saved to {}", path.display()),
                        Err(e) => eprintln!("Error saving: {}", e),
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Commands::Simulate {
            slate,
            track,
            ownership,
            portfolio,
            payouts,
            entry_fee,
            field_size,
            contest_size,
            n_sims,
            n_scenarios,
            seed,
            output: out_path,
        } => {
            let slate = match load_slate(&slate, parse_track(&track)) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error loading slate: {}", e);
                    return;
                }
            };
            let spec = match ConstraintSpec::compile(&ConstraintSource::default(), &slate) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error compiling constraint spec: {}", e);
                    return;
                }
            };
            let ownership = match output::load_ownership_csv(Path::new(&ownership)) {
                Ok(o) => o,
                Err(e) => {
                    eprintln!("Error loading ownership: {}", e);
                    return;
                }
            };
            let my = match output::load_portfolio_csv(&slate, Path::new(&portfolio)) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Error loading portfolio: {}", e);
                    return;
                }
            };
            let payout_points = match load_payouts(&payouts) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Error loading payouts: {}", e);
                    return;
                }
            };

            let pb = spinner("generating scenarios");
            let matrix = match gpp_sim::scenario::generate(
                &slate,
                &spec,
                &GeneratorConfig::new(n_scenarios, seed),
                &cancel,
            ) {
                Ok(m) => m,
                Err(e) => {
                    pb.finish_and_clear();
                    eprintln!("Error: {}", e);
                    return;
                }
            };
            pb.finish_and_clear();

            let contest = Contest {
                contest_id: format!("sim-{}", contest_size),
                entry_fee,
                field_size: contest_size,
                payout_source: PayoutSource::Historical(payout_points),
            };
            let config = SimulationConfig {
                field_size,
                n_simulations: n_sims,
                tier_override: None,
                seed,
            };

            let pb = spinner("simulating contest");
            let result =
                simulate_contest(&my, &contest, &slate, &matrix, &ownership, &config, &cancel);
            pb.finish_and_clear();

            match result {
                Ok(result) => {
                    println!(
                        "Simulated {} entries vs {} opponents over {} scenarios",
                        result.entries.len(),
                        result.field_size,
                        result.n_scenarios
                    );
                    println!(
                        "  Portfolio ROI : {:+.4} [{:+.4}, {:+.4}]",
                        result.portfolio_roi.value,
                        result.portfolio_roi.ci_low,
                        result.portfolio_roi.ci_high
                    );
                    println!(
                        "  Cash rate     : {:.4} [{:.4}, {:.4}]",
                        result.cash_rate.value, result.cash_rate.ci_low, result.cash_rate.ci_high
                    );
                    println!(
                        "  Top-1% rate   : {:.4} [{:.4}, {:.4}]",
                        result.top1_rate.value, result.top1_rate.ci_low, result.top1_rate.ci_high
                    );
                    let path = PathBuf::from(&out_path);
                    match output::save_contest_json(&result, &path) {
                        Ok(()) => println!("Saved to {}", path.display()),
                        Err(e) => eprintln!("Error saving: {}", e),
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Commands::Optimize {
            slate,
            track,
            ownership,
            n_lineups,
            alpha,
            lambda,
            min_diff,
            n_scenarios,
            seed,
            config,
            output_dir,
        } => {
            let slate = match load_slate(&slate, parse_track(&track)) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error loading slate: {}", e);
                    return;
                }
            };
            let spec = match ConstraintSpec::compile(&ConstraintSource::default(), &slate) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error compiling constraint spec: {}", e);
                    return;
                }
            };
            let ownership = match ownership {
                Some(path) => match output::load_ownership_csv(Path::new(&path)) {
                    Ok(o) => o,
                    Err(e) => {
                        eprintln!("Error loading ownership: {}", e);
                        return;
                    }
                },
                None => Vec::new(),
            };

            let mut opt_config = match config {
                Some(path) => match std::fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|s| toml::from_str::<OptimizeConfig>(&s).map_err(|e| e.to_string()))
                {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("Error loading config {}: {}", path, e);
                        return;
                    }
                },
                None => OptimizeConfig {
                    n_lineups,
                    alpha,
                    lambda_ownership: lambda,
                    min_diff,
                    ..OptimizeConfig::default()
                },
            };
            if opt_config.n_lineups == 0 {
                opt_config.n_lineups = n_lineups;
            }

            let pb = spinner("generating scenarios");
            let matrix = match gpp_sim::scenario::generate(
                &slate,
                &spec,
                &GeneratorConfig::new(n_scenarios, seed),
                &cancel,
            ) {
                Ok(m) => m,
                Err(e) => {
                    pb.finish_and_clear();
                    eprintln!("Error: {}", e);
                    return;
                }
            };
            pb.finish_and_clear();

            let pb = spinner("solving portfolio");
            let result =
                optimize_with_leverage(&slate, &spec, &matrix, &ownership, &opt_config, &cancel);
            pb.finish_and_clear();

            match result {
                Ok(portfolio) => {
                    println!(
                        "Built {} lineups (alpha {:.2}, lambda {:.2}, min_diff {}){}",
                        portfolio.len(),
                        opt_config.alpha,
                        opt_config.lambda_ownership,
                        opt_config.min_diff,
                        if portfolio.cancelled { " [cancelled]" } else { "" }
                    );
                    for lineup in &portfolio.lineups {
                        println!(
                            "  {} [{}] ${}: {}",
                            lineup.id,
                            lineup.regime.map(|r| r.name()).unwrap_or("-"),
                            lineup.salary,
                            lineup.driver_ids(&slate).join(", ")
                        );
                    }
                    for s in &portfolio.shortfalls {
                        println!(
                            "  shortfall [{}]: {}/{} ({})",
                            s.regime.map(|r| r.name()).unwrap_or("-"),
                            s.produced,
                            s.requested,
                            s.reason
                        );
                    }
                    let dir = PathBuf::from(&output_dir);
                    match output::save_portfolio_csv(&portfolio, &slate, &dir.join("portfolio.csv"))
                    {
                        Ok(()) => println!("Saved to {}", dir.join("portfolio.csv").display()),
                        Err(e) => eprintln!("Error saving portfolio: {}", e),
                    }
                    if let Err(e) = output::save_config_toml(&opt_config, &dir.join("config.toml"))
                    {
                        eprintln!("Error saving config: {}", e);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }
}
