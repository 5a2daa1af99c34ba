//! Consort cohort simulation driver executable.

use consort::{logger_init, Cluster, Command, ConsortError};

use clap::Parser;
use log::info;
use rand::Rng;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(name = "consort_sim", version, about)]
struct CliArgs {
    /// Number of replicas in the cohort.
    #[arg(short, long, default_value_t = 5)]
    population: usize,

    /// Number of simulated iterations to run.
    #[arg(short, long, default_value_t = 200_000)]
    iters: usize,

    /// Submit a fresh command every this many iterations.
    #[arg(short, long, default_value_t = 1_000)]
    submit_interval: usize,

    /// Per-iteration probability of crashing a random replica.
    #[arg(short, long, default_value_t = 0.0)]
    crash_rate: f64,

    /// Replica configuration string, e.g. "hb_base_ticks = 40".
    #[arg(short = 'C', long)]
    config: Option<String>,
}

impl CliArgs {
    fn sanitize(&self) -> Result<(), ConsortError> {
        if self.population == 0 {
            Err(ConsortError::msg("population must be at least 1"))
        } else if self.submit_interval == 0 {
            Err(ConsortError::msg("submit_interval must be at least 1"))
        } else if !(0.0..=1.0).contains(&self.crash_rate) {
            Err(ConsortError::msg(format!(
                "invalid crash_rate {}",
                self.crash_rate
            )))
        } else {
            Ok(())
        }
    }
}

fn main() -> Result<(), ConsortError> {
    logger_init();

    let args = CliArgs::parse();
    args.sanitize()?;

    let mut cluster = Cluster::new();
    for _ in 0..args.population {
        cluster.spawn_node(args.config.as_deref())?;
    }
    info!("spawned cohort of {} replicas", args.population);

    let mut rng = rand::thread_rng();
    let mut submitted = 0usize;
    for step in 0..args.iters {
        if step % args.submit_interval == 0 {
            if let Some(i) =
                cluster.nodes().iter().position(|n| n.is_leader())
            {
                let cmd =
                    Command::from(format!("cmd-{}", submitted).into_bytes());
                if cluster.node_mut(i).submit_command(cmd).is_ok() {
                    submitted += 1;
                }
            }
        }
        if args.crash_rate > 0.0 && rng.gen_bool(args.crash_rate) {
            let victim = rng.gen_range(0..args.population);
            cluster.node_mut(victim).handle_crash();
        }
        cluster.iterate()?;
    }

    let committed = cluster.committed()?;
    info!(
        "simulation done: {} iterations, {} submitted, {} committed",
        args.iters,
        submitted,
        committed.len()
    );
    for node in cluster.nodes() {
        info!(
            "replica {} role {:?} term {} log {} committed {}",
            node.id(),
            node.role(),
            node.curr_term(),
            node.log().len(),
            node.commit_len()
        );
    }
    Ok(())
}
