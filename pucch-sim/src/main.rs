//! PUCCH link simulator
//!
//! Drives the PUCCH processor pool from several concurrent callers. Each
//! caller modulates random UCI, passes it through a flat AWGN channel and
//! scores what the pool returns.

mod channel;
mod config;
mod scenario;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use layers::phy::pucch::{PucchModulator, PucchProcessor, PucchProcessorPool};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::channel::FlatChannel;
use crate::config::SimConfig;
use crate::scenario::{PucchScenario, ScenarioStats};

#[derive(Parser, Debug)]
#[command(author, version, about = "PUCCH receiver link simulator", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "pucch_sim.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the number of transmissions per scenario
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Override the channel SNR in dB
    #[arg(short, long)]
    snr_db: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting PUCCH simulator");
    info!("Loading configuration from: {}", args.config);

    let mut config = SimConfig::from_toml_file(&args.config)?;
    if let Some(iterations) = args.iterations {
        config.pool.iterations = iterations;
    }
    if let Some(snr_db) = args.snr_db {
        config.channel.snr_db = snr_db;
    }
    debug!("Configuration: {:?}", config);

    let channel = Arc::new(FlatChannel::new(
        config.receiver.nof_ports,
        config.channel.snr_db,
        config.channel.seed,
    ));
    let pool = Arc::new(build_pool(&config, &channel)?);
    info!(
        "Processor pool ready: {} processors, {} callers, SNR {:.1} dB",
        pool.capacity(),
        config.pool.nof_callers,
        config.channel.snr_db
    );

    for scenario_config in &config.scenarios {
        let scenario = PucchScenario::new(scenario_config, &config.receiver)
            .with_context(|| format!("Scenario {}", scenario_config.name))?;
        let stats = run_scenario(Arc::new(scenario), &config, &channel, &pool).await?;

        if stats.rejected > 0 {
            warn!(
                "{}: {} of {} requests found no free processor",
                scenario_config.name, stats.rejected, stats.trials
            );
        }
        info!(
            "{} ({:?}): trials={}, error rate={:.4}, BER={:.2e}, mean SINR={}",
            scenario_config.name,
            scenario_config.format,
            stats.trials,
            stats.error_rate(),
            stats.bit_error_rate(),
            stats
                .mean_sinr_db()
                .map_or_else(|| "n/a".to_string(), |sinr| format!("{:.1} dB", sinr))
        );
    }

    info!("PUCCH simulator finished");
    Ok(())
}

fn build_pool(config: &SimConfig, channel: &FlatChannel) -> Result<PucchProcessorPool> {
    let processor_config = config.receiver.processor_config();
    let processors = (0..config.pool.nof_processors)
        .map(|_| PucchProcessor::new(processor_config, Box::new(channel.estimator())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PucchProcessorPool::new(processors)?)
}

/// Split the transmissions between concurrent callers and merge their statistics
async fn run_scenario(
    scenario: Arc<PucchScenario>,
    config: &SimConfig,
    channel: &Arc<FlatChannel>,
    pool: &Arc<PucchProcessorPool>,
) -> Result<ScenarioStats> {
    let nof_callers = config.pool.nof_callers;
    let iterations = config.pool.iterations;

    let mut handles = Vec::with_capacity(nof_callers);
    for caller in 0..nof_callers {
        // Spread the remainder over the first callers
        let nof_trials = iterations / nof_callers + usize::from(caller < iterations % nof_callers);
        let scenario = Arc::clone(&scenario);
        let channel = Arc::clone(channel);
        let pool = Arc::clone(pool);
        let receiver = config.receiver.clone();
        let seed = config.channel.seed.wrapping_add(1 + caller as u64);

        handles.push(tokio::task::spawn_blocking(move || -> Result<ScenarioStats> {
            let mut modulator = PucchModulator::new()?;
            let mut grid = PucchScenario::grid(&receiver);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut stats = ScenarioStats::default();
            for _ in 0..nof_trials {
                let outcome = scenario.run_trial(&mut modulator, &mut grid, &channel, &pool, &mut rng);
                stats.record(&outcome);
            }
            debug!("Caller {} finished {} trials", caller, nof_trials);
            Ok(stats)
        }));
    }

    let mut total = ScenarioStats::default();
    for handle in handles {
        let stats = handle.await.context("Caller task panicked")??;
        total.merge(&stats);
    }
    Ok(total)
}
