//! HPI tracking demo: streams a synthetic acquisition through the
//! localization controller and logs every published transform.

use anyhow::{Context, Result};
use clap::Parser;
use hpi_localization::{
    config::Config,
    constants::M_TO_MM,
    controller::{ControllerState, HpiController, PushOutcome},
    demodulator::SignPolicy,
    simulation::{default_true_transform, SyntheticSource},
    transform::{rotation_angle, rotation_angle_between, translation_part, Localization},
    utils::safe_cast::{f64_to_usize, samples_per_cycle, usize_to_f64},
};
use log::{info, warn};
use nalgebra::Matrix4;
use std::{sync::Arc, thread, time::Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Seconds of synthetic data to stream
    #[arg(long)]
    duration: Option<f64>,

    /// Noise level relative to the strongest coil signal
    #[arg(long)]
    noise: Option<f64>,

    /// Pace blocks at the acquisition rate
    #[arg(long)]
    realtime: bool,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,
}

fn log_localization(localization: &Localization, truth: &Matrix4<f64>) {
    let worst_coil = localization.coils.iter().map(|c| c.residual).fold(0.0, f64::max);
    info!(
        "v{}: rotation {:.2} deg, translation {:.2} mm, coil residual {:.2e}, error vs truth {:.3} deg / {:.3} mm",
        localization.version,
        rotation_angle(&localization.transform).to_degrees(),
        translation_part(&localization.transform).norm() * M_TO_MM,
        worst_coil,
        rotation_angle_between(&localization.transform, truth).to_degrees(),
        (translation_part(&localization.transform) - translation_part(truth)).norm() * M_TO_MM
    );
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger
    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    // Load configuration if provided
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path);
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Failed to load config file: {}. Using defaults.", e);
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    if let Some(duration) = args.duration {
        config.simulation.duration_secs = duration;
    }
    if let Some(noise) = args.noise {
        config.simulation.noise_level = noise;
    }
    if args.realtime {
        config.simulation.realtime = true;
    }
    config.validate().context("Invalid configuration")?;
    config.simulation.validate().context("Invalid simulation configuration")?;

    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    info!("HPI tracking - synthetic acquisition");
    if config.localization.sign_policy == SignPolicy::Absolute {
        warn!("Absolute sign policy folds the coil field patterns; use `sign_policy: signed` to recover coil positions");
    }

    let truth = default_true_transform();
    let mut source = SyntheticSource::new(&config.simulation, truth)?;
    let sim = config.simulation.clone();
    let block_count = f64_to_usize(sim.duration_secs * sim.sample_rate / usize_to_f64(sim.samples_per_block))?;
    let cycle = samples_per_cycle(sim.sample_rate, config.localization.localizations_per_second)?;
    let expected = u64::try_from(block_count * sim.samples_per_block / cycle)?;
    let block_period = Duration::from_secs_f64(usize_to_f64(sim.samples_per_block) / sim.sample_rate);
    let poll = config.localization.poll_interval();

    let controller = HpiController::new(config)?;
    controller.set_measurement_info(source.measurement_info().clone())?;
    controller.start()?;
    if !controller.wait_for_state(ControllerState::Streaming, Duration::from_secs(5)) {
        anyhow::bail!("Controller did not start streaming");
    }

    info!("Streaming {} blocks, expecting {} localizations", block_count, expected);

    let mut last_seen = 0;
    let mut report = |latest: Arc<Localization>| {
        if latest.version > last_seen {
            last_seen = latest.version;
            log_localization(&latest, &truth);
        }
    };

    thread::scope(|s| -> Result<()> {
        let producer_controller = &controller;
        let producer = s.spawn(move || -> hpi_localization::Result<usize> {
            let mut discarded = 0;
            for _ in 0..block_count {
                if producer_controller.push_block(source.next_block())? == PushOutcome::Discarded {
                    discarded += 1;
                }
                if sim.realtime {
                    thread::sleep(block_period);
                }
            }
            Ok(discarded)
        });

        while !producer.is_finished() {
            report(controller.latest());
            thread::sleep(poll);
        }

        let discarded = producer
            .join()
            .map_err(|_| anyhow::anyhow!("Producer thread panicked"))??;
        if discarded > 0 {
            warn!("{} blocks discarded", discarded);
        }
        Ok(())
    })?;

    if let Some(latest) = controller.wait_for_version(expected, Duration::from_secs(30)) {
        report(latest);
    } else {
        warn!("Timed out waiting for localization {}", expected);
        report(controller.latest());
    }

    controller.stop();
    info!("Published {} transforms", last_seen);

    Ok(())
}
