use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::time::Instant;
use log::{info, warn, error, debug, trace};

use angio_common::{SimulationConfig, Snapshot};
use angio_engine::{Agent, AngioSimulation, CommExt, Communicator, LocalCluster, LocalRank, TipCell};

// What the root rank hands back once the run is over.
struct RunOutput {
    snapshots: Vec<Snapshot>,
    tip_cells: Vec<TipCell>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Angiogenesis Agent Engine...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = SimulationConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    let ranks = config.parallel.ranks;
    info!("Running {} rank(s), {} Rayon threads.", ranks, rayon::current_num_threads());

    let results = LocalCluster::run(ranks, |comm| run_rank(comm, &config));

    let mut output = None;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(Some(root_output)) => output = Some(root_output),
            Ok(None) => {}
            Err(e) => {
                error!("Rank {} failed: {:#}", rank, e);
                return Err(e);
            }
        }
    }
    let output = output.context("Root rank returned no output")?;

    // --- Save Recorded Data ---
    info!("Saving recorded data...");
    if config.output.save_stats {
        save_snapshots(&config, &output.snapshots)?;
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    // Save final tip cells if requested (separate from full snapshots)
    if config.output.save_positions {
        save_final_tip_cells(&config, &output.tip_cells)?;
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Drives one rank through the whole run. Returns the data to save on the root.
fn run_rank(comm: LocalRank, config: &SimulationConfig) -> Result<Option<RunOutput>> {
    let rank = comm.rank();
    info!("p{}: initializing mesh slab and agents...", rank);
    let mut sim = AngioSimulation::new(comm, config.clone())?;
    debug!("p{}: simulation parameters: {:#?}", rank, sim.params());

    // --- Simulation Loop ---
    let total_steps = config.timing.n_steps;
    let mut record_interval_steps = config.timing.record_interval_steps;
    if record_interval_steps == 0 {
        warn!("Record interval is 0 steps. Recording every step.");
        record_interval_steps = 1;
    }
    let dt = sim.params().dt;

    info!("p{}: starting simulation loop for {} steps...", rank, total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot (step 0) ---
    sim.record_snapshot().context("Failed to record initial snapshot")?;

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        sim.step().with_context(|| format!("Simulation step {} failed", step + 1))?;
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        let should_print_status =
            current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step + 1 == total_steps;

        if is_record_step || is_last_step {
            // Collective: every rank records together.
            sim.record_snapshot()
                .with_context(|| format!("Failed to record snapshot at step {}", step + 1))?;
        }

        if sim.comm().is_root() && (should_print_status || is_record_step || is_last_step) {
            let report = sim.last_report();
            info!(
                "Step [{}/{}] (t = {:.2}) | Tip cells: {} | Sources: {} | +{} -{} | \
                 Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                (step + 1) as f64 * dt,
                sim.tip_cells().len(),
                sim.sources().source_map().len(),
                usize::from(report.activated.is_some()),
                report.left_mesh + report.deactivated,
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;
        } else {
            trace!(
                "p{}: step [{}/{}] completed in {:.2} ms",
                rank,
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!("p{}: simulation finished in {:.3} seconds.", rank, total_duration.as_secs_f64());

    let checkpoint = sim.save_tip_cells().context("Failed to save tip cell checkpoint")?;
    if sim.comm().is_root() {
        info!("Tip cell checkpoint written to {}", checkpoint.display());
        Ok(Some(RunOutput {
            snapshots: sim.get_recorded_snapshots().clone(),
            tip_cells: sim.tip_cell_list(),
        }))
    } else {
        Ok(None)
    }
}

fn save_snapshots(config: &SimulationConfig, snapshots: &[Snapshot]) -> Result<()> {
    let base = &config.output.base_filename;
    let output_format = config.output.format.as_deref().unwrap_or("json");

    match output_format {
        "bincode" => {
            // Binary format (much more compact)
            let filename = format!("{}_snapshots.bin", base);
            let file = create_snapshot_file(&filename)?;
            bincode::serialize_into(file, snapshots)
                .context("Error serializing snapshots to bincode")?;
            info!("All snapshots saved to {} (binary format)", filename);
        }
        "messagepack" => {
            // MessagePack format (compact and cross-platform)
            let filename = format!("{}_snapshots.msgpack", base);
            let mut file = create_snapshot_file(&filename)?;
            rmp_serde::encode::write(&mut file, snapshots)
                .context("Error serializing snapshots to MessagePack")?;
            info!("All snapshots saved to {} (MessagePack format)", filename);
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", base);
            let json_string =
                serde_json::to_string(snapshots).context("Error serializing snapshots to JSON")?;
            let mut file = create_snapshot_file(&filename)?;
            file.write_all(json_string.as_bytes())
                .with_context(|| format!("Error writing snapshot JSON to file '{}'", filename))?;
            info!("All snapshots saved to {} ({} KB)", filename, json_string.len() / 1024);
        }
    }
    Ok(())
}

fn create_snapshot_file(filename: &str) -> Result<File> {
    File::create(filename).with_context(|| format!("Error creating snapshot file '{}'", filename))
}

fn save_final_tip_cells(config: &SimulationConfig, tip_cells: &[TipCell]) -> Result<()> {
    let filename = format!("{}_final_tip_cells.csv", config.output.base_filename);
    let mut writer = csv::Writer::from_path(&filename)
        .with_context(|| format!("Error saving CSV file '{}'", filename))?;

    let axes = ["x", "y", "z"];
    let mut header: Vec<&str> = axes[..config.dim()].to_vec();
    header.extend(["radius", "creation_step"]);
    writer.write_record(&header)?;

    for cell in tip_cells {
        let mut record: Vec<String> =
            cell.position().coords().iter().map(|c| format!("{:.4}", c)).collect();
        record.push(format!("{:.4}", cell.radius()));
        record.push(cell.creation_step().to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("Final tip cells ({}) saved to {}", tip_cells.len(), filename);
    Ok(())
}
