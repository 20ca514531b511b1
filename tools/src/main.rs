//! psa-runner: runs a cohort model definition and reports cost-effectiveness.
//!
//! Usage:
//!   psa-runner --model data/markov_cohort.json
//!   psa-runner --model data/markov_cohort.json --seed 7 --samples 1000 --db psa.db --wtp 50000
//!   psa-runner --model data/markov_cohort.json --report report.json

mod store;

use anyhow::Result;
use chrono::Utc;
use cohort_core::{
    cea::{wtp_grid, CeacPoint, CeaTable, EvpiPoint, IcerRow, StrategySummary},
    model::{CohortModel, ModelDefinition, ModelOutput},
    output::{LIFE_YEARS, QALYS, TOTAL_COST},
};
use std::env;
use store::{RunRecord, RunStore};
use uuid::Uuid;

/// Machine-readable copy of the printed summary.
#[derive(serde::Serialize)]
struct Report {
    seed:       u64,
    n_samples:  usize,
    wtp:        f64,
    strategies: Vec<StrategySummary>,
    icers:      Vec<IcerRow>,
    ceac:       Vec<CeacPoint>,
    ceaf:       Vec<CeacPoint>,
    evpi:       Vec<EvpiPoint>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let model_path = parse_str(&args, "--model").unwrap_or("data/markov_cohort.json");
    let db = parse_str(&args, "--db");
    let report_path = parse_str(&args, "--report");
    let wtp = parse_arg(&args, "--wtp", 100_000.0f64);

    let mut definition = ModelDefinition::load(model_path)?;
    definition.config.seed = parse_arg(&args, "--seed", definition.config.seed);
    definition.config.n_samples = parse_arg(&args, "--samples", definition.config.n_samples);
    let config = definition.config.clone();

    println!("psa-runner");
    println!("  model:     {model_path}");
    println!("  seed:      {}", config.seed);
    println!("  samples:   {}", config.n_samples);
    println!("  cycles:    {} x {} years", config.n_cycles, config.cycle_length);
    println!("  db:        {}", db.unwrap_or("(none)"));
    println!();

    let started_at = Utc::now();
    let model = CohortModel::build(&definition)?;
    let output = model.run()?;

    let table = CeaTable::from_outcomes(&output.outcomes, model.units().strategies())?;
    print_summary(&table, &output, wtp)?;

    if let Some(path) = report_path {
        let report = build_report(&table, config.seed, config.n_samples, wtp)?;
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!();
        println!("  wrote report to {path}");
    }

    if let Some(path) = db {
        let run_id = Uuid::new_v4();
        let mut store = RunStore::open(path)?;
        store.migrate()?;
        store.insert_run(&RunRecord {
            run_id,
            seed: config.seed,
            n_samples: config.n_samples,
            n_cycles: config.n_cycles,
            model_path,
            started_at,
        })?;
        store.insert_occupancy(run_id, &config.state_names, &output.occupancy_rows())?;
        store.insert_outcomes(run_id, &output.outcomes)?;
        store.finish_run(run_id, Utc::now())?;
        println!();
        println!("  saved run {run_id} ({} outcome rows)", store.outcome_count(run_id)?);
    }

    Ok(())
}

fn print_summary(table: &CeaTable, output: &ModelOutput, wtp: f64) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  pairs simulated: {}", output.trajectories.len());
    println!("  outcome rows:    {}", output.outcomes.len());

    println!();
    println!("=== OUTCOMES (mean, 95% interval) ===");
    for s in table.summarize() {
        println!("  {} [{}]", s.name, s.strategy_id);
        for category in [QALYS, LIFE_YEARS, TOTAL_COST] {
            if let Some(summary) = s.outcomes.get(category) {
                println!("    {category:<12} {summary}");
            }
        }
        for (category, summary) in s.outcomes.iter().filter(|(c, _)| ![QALYS, LIFE_YEARS, TOTAL_COST].contains(&c.as_str())) {
            println!("    {category:<12} {summary}");
        }
    }

    let Some(comparator) = table.strategies().first().map(|s| s.strategy_id) else {
        return Ok(());
    };
    println!();
    println!("=== INCREMENTAL (vs strategy {comparator}, WTP {wtp:.0}) ===");
    for row in table.pairwise_icers(comparator, wtp)? {
        println!(
            "  strategy {} | dQALY {:.3} | dCost {:.0} | ICER {} | iNMB {}",
            row.strategy_id, row.d_qalys.mean, row.d_costs.mean, row.icer, row.inmb
        );
    }

    println!();
    println!("=== ACCEPTABILITY ===");
    let wtps = wtp_grid(0.0, 2.0 * wtp, 5);
    for (point, evpi) in table.ceaf(&wtps).iter().zip(table.evpi(&wtps)) {
        println!(
            "  WTP {:>9.0} | optimal {} (p = {:.2}) | EVPI {:.2}",
            point.wtp, point.strategy_id, point.probability, evpi.evpi
        );
    }
    Ok(())
}

fn build_report(table: &CeaTable, seed: u64, n_samples: usize, wtp: f64) -> Result<Report> {
    let wtps = wtp_grid(0.0, 2.0 * wtp, 21);
    let icers = match table.strategies().first() {
        Some(s) => table.pairwise_icers(s.strategy_id, wtp)?,
        None => Vec::new(),
    };
    Ok(Report {
        seed,
        n_samples,
        wtp,
        strategies: table.summarize(),
        icers,
        ceac: table.ceac(&wtps),
        ceaf: table.ceaf(&wtps),
        evpi: table.evpi(&wtps),
    })
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn parse_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
