//! Clepsydra consensus simulator
//!
//! Drives the tick-synchronous process set through honest and adversarial
//! schedules and checks the protocol's guarantees from outside: the
//! production safety obligation holds at every tick, well-behaved messages
//! stay accepted, and the ledger only grows.
//!
//! Usage: cargo run --bin simulator [-- --ticks N --seeds K]

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;

use clepsydra::consensus::adversary::{
    AdversaryOracle, EagerAdversary, ForkAdversary, RandomAdversary,
};
use clepsydra::sim::{SimReport, Simulation};
use clepsydra::{ClepsydraConfig, MessageId};

/// Clepsydra VDF-paced consensus simulator.
#[derive(Parser, Debug)]
#[command(name = "simulator", about = "Clepsydra consensus schedule runner")]
struct Cli {
    /// Tick bound per schedule (overrides the config file).
    #[arg(long)]
    ticks: Option<u64>,

    /// Number of random adversary schedules to sweep.
    #[arg(long, default_value_t = 8)]
    seeds: u64,

    /// Directory containing an optional clepsydra.toml.
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
}

/// What driving one schedule to the tick bound produced.
enum Verdict {
    /// Every checked guarantee held; the run report is attached.
    Held(SimReport),
    /// A guarantee broke mid-run, with the offending condition.
    Broke(String),
}

/// One schedule's name and verdict, kept for the summary.
struct ScenarioOutcome {
    name: String,
    verdict: Verdict,
}

impl ScenarioOutcome {
    fn held(name: &str, report: SimReport) -> Self {
        ScenarioOutcome {
            name: name.to_string(),
            verdict: Verdict::Held(report),
        }
    }

    fn broke(name: &str, detail: impl Into<String>) -> Self {
        ScenarioOutcome {
            name: name.to_string(),
            verdict: Verdict::Broke(detail.into()),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();

    println!(
        "\n{}\n",
        "clepsydra: VDF-paced consensus schedule runner".bold()
    );

    let mut config = ClepsydraConfig::load(&cli.config_dir);
    if let Some(ticks) = cli.ticks {
        config.max_tick = ticks;
    }

    println!("{}", "[1/5] configuration".yellow());
    if let Err(e) = config.validate() {
        println!("  {} {}", "refused:".red().bold(), e);
        std::process::exit(1);
    }
    println!(
        "  {} well-behaved every {} ticks, {} byzantine every {} ticks, {} ticks per run",
        config.well_behaved_set().len(),
        config.t_wb,
        config.byzantine_set().len(),
        config.t_adv,
        config.max_tick
    );

    let mut outcomes: Vec<ScenarioOutcome> = Vec::new();

    println!("\n{}", "[2/5] honest schedule (no adversary)".yellow());
    let honest = ClepsydraConfig {
        byzantine: vec![],
        ..config.clone()
    };
    record(
        &mut outcomes,
        run_scenario("honest", &honest, |_| Box::new(EagerAdversary)),
    );

    println!("\n{}", "[3/5] eager adversary (rate probe)".yellow());
    record(
        &mut outcomes,
        run_scenario("eager", &config, |_| Box::new(EagerAdversary)),
    );

    println!("\n{}", "[4/5] fork adversary (light fork rejection)".yellow());
    record(
        &mut outcomes,
        run_scenario("fork", &config, |_| Box::new(ForkAdversary::default())),
    );

    println!(
        "\n{}",
        format!("[5/5] random adversary sweep ({} seeds)", cli.seeds).yellow()
    );
    for seed in 0..cli.seeds {
        record(
            &mut outcomes,
            run_scenario(&format!("random/{seed}"), &config, |p| {
                Box::new(RandomAdversary::seeded(seed ^ u64::from(p.0)))
            }),
        );
    }

    let all_held = print_summary(&outcomes);
    std::process::exit(if all_held { 0 } else { 1 });
}

/// Run one schedule to the tick bound and check the external guarantees:
/// no safety violation, every well-behaved message accepted, ledger
/// append-only across every tick.
fn run_scenario(
    name: &str,
    config: &ClepsydraConfig,
    make_oracle: impl FnMut(clepsydra::ProcessId) -> Box<dyn AdversaryOracle>,
) -> ScenarioOutcome {
    let mut sim = match Simulation::new(config, make_oracle) {
        Ok(sim) => sim,
        Err(e) => return ScenarioOutcome::broke(name, format!("refused to boot: {e}")),
    };

    let mut seen: BTreeSet<MessageId> = BTreeSet::new();
    while sim.tick() < config.max_tick {
        if let Err(e) = sim.step_tick() {
            return ScenarioOutcome::broke(name, e.to_string());
        }
        let ids = sim.ledger().ids();
        if !seen.is_subset(&ids) {
            return ScenarioOutcome::broke(name, "ledger lost messages");
        }
        seen = ids;

        let accepted = sim.accepted_ledger();
        if let Some(lost) = sim.well_behaved_ids().iter().find(|m| !accepted.contains(m)) {
            return ScenarioOutcome::broke(
                name,
                format!("well-behaved message {lost} fell out of the accepted set"),
            );
        }
    }
    ScenarioOutcome::held(name, sim.report())
}

/// Print a one-line verdict as the schedule finishes and keep the outcome
/// for the summary.
fn record(outcomes: &mut Vec<ScenarioOutcome>, outcome: ScenarioOutcome) {
    match &outcome.verdict {
        Verdict::Held(r) => println!(
            "  {} {}: {} released ({} well-behaved, {} byzantine), {} accepted",
            "held".green().bold(),
            outcome.name,
            r.total_messages,
            r.well_behaved_messages,
            r.byzantine_messages,
            r.accepted_messages
        ),
        Verdict::Broke(detail) => {
            println!("  {} {}: {}", "broke".red().bold(), outcome.name, detail.red())
        }
    }
    outcomes.push(outcome);
}

/// Render every schedule's run report as a table, list anything that broke
/// a guarantee, and return whether all of them held.
fn print_summary(outcomes: &[ScenarioOutcome]) -> bool {
    println!("\n{}", "schedule summary".bold());
    println!(
        "{}",
        format!(
            "  {:<12} {:>6} {:>9} {:>5} {:>5} {:>9} {:>9} {:>8}",
            "schedule", "ticks", "released", "wb", "byz", "accepted", "deferred", "dropped"
        )
        .dimmed()
    );

    let mut broken: Vec<(&str, &str)> = Vec::new();
    for outcome in outcomes {
        match &outcome.verdict {
            Verdict::Held(r) => println!(
                "  {:<12} {:>6} {:>9} {:>5} {:>5} {:>9} {:>9} {:>8}",
                outcome.name,
                r.ticks,
                r.total_messages,
                r.well_behaved_messages,
                r.byzantine_messages,
                r.accepted_messages,
                r.deferred_starts,
                r.dropped_messages
            ),
            Verdict::Broke(detail) => broken.push((&outcome.name, detail)),
        }
    }
    for (name, detail) in &broken {
        println!("  {:<12} {}", name, detail.red());
    }

    println!();
    if broken.is_empty() {
        println!(
            "  {}: all {} schedules kept the safety and acceptance guarantees",
            "held".green().bold(),
            outcomes.len()
        );
    } else {
        println!(
            "  {}: {} of {} schedules broke a guarantee",
            "BROKEN".red().bold(),
            broken.len(),
            outcomes.len()
        );
    }
    broken.is_empty()
}
