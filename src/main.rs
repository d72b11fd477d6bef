use flowgen::config::{self, Config};
use flowgen::export;
use flowgen::generator::Generator;
use flowgen::meter::TrafficMeter;
use flowgen::profiles;
use flowgen::structs::*;
use flowgen::ui::{self, Stats};
mod cmd;

use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use std::io;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const CHANNEL_SIZE: usize = 50;
const BATCH_SIZE: usize = 256;

/// The entry point of the application.
///
/// The generation runs on the main thread and sends packet batches to the pcap export thread.
/// The flow report is written once both are done.
fn main() -> flowgen::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();

    let seed = args.seed.unwrap_or_else(rand::random);
    log::info!("Generating with seed {seed}");
    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let profiles = profiles::load_profiles(&args.profiles)?;
    let generator = Generator::new(profiles, config, seed)?;

    let stats = Arc::new(Stats::default());

    // Handle ctrl+C
    let stats_ctrlc = Arc::clone(&stats);
    ctrlc::set_handler(move || {
        if !stats_ctrlc.should_stop() {
            log::warn!("Stopping the generation, please wait a few seconds");
            stats_ctrlc.stop_early();
        } else {
            process::exit(1);
        }
    })
    .map_err(io::Error::other)?;

    let (tx, rx_pcap) = bounded::<Packets>(CHANNEL_SIZE);
    let export_thread = {
        let stats = Arc::clone(&stats);
        let outfile = args.outfile.clone();
        thread::Builder::new()
            .name("Pcap-export".into())
            .spawn(move || export::run_export(rx_pcap, outfile, stats))?
    };
    let monitor_thread = {
        let stats = Arc::clone(&stats);
        thread::Builder::new()
            .name("Monitoring".into())
            .spawn(move || ui::run(stats))?
    };

    let start = Instant::now();
    // tx is moved in so that the export thread ends with the generation
    let meter = generate(generator, tx, &stats);
    let export_result = export_thread
        .join()
        .map_err(|_| io::Error::other("pcap export thread panicked"))?;
    stats.finish();
    let _ = monitor_thread.join();

    let meter = meter?;
    export_result?;
    log::info!(
        "{} packets ({} bytes) written to {} in {:.2}s",
        stats.pcap_packets(),
        stats.bytes(),
        args.outfile,
        start.elapsed().as_secs_f64()
    );

    if !args.no_report {
        meter.write_report(&mut io::stdout().lock())?;
    }
    if let Some(report) = &args.report {
        meter.write_report_csv_file(report)?;
    }
    Ok(())
}

fn generate(
    mut generator: Generator,
    tx: Sender<Packets>,
    stats: &Stats,
) -> flowgen::Result<TrafficMeter> {
    let mut batch = Packets::with_capacity(BATCH_SIZE);
    while !stats.should_stop() {
        let Some(packet) = generator.next_packet()? else {
            break;
        };
        batch.packets.push(packet);
        if batch.len() >= BATCH_SIZE {
            stats.increase(&batch);
            let full = std::mem::replace(&mut batch, Packets::with_capacity(BATCH_SIZE));
            if tx.send(full).is_err() {
                // the export thread stopped, its error is reported after the join
                break;
            }
        }
    }
    if !batch.is_empty() {
        stats.increase(&batch);
        let _ = tx.send(batch);
    }

    log::info!(
        "{} flows generated, {} skipped",
        generator.flows(),
        generator.skipped_flows()
    );
    Ok(generator.into_meter())
}
