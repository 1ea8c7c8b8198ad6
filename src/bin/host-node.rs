//! Host simulation of the sensor node.
//!
//! Runs the full duty cycle against simulated hardware: a loopback radio
//! whose gateway echoes every reading, a simulated RTC and sleep primitives
//! that advance simulated time, and a file-backed store so the schedule
//! record and identity persist between runs.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-node -- [--config node.json] [--cycles 10] [--store eeprom.bin]
//! ```

use log::{error, info, warn};
use std::cell::Cell;
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;
use xbee_sensor_node::hal::sim::{LoopbackRadio, SimClock};
use xbee_sensor_node::hal::RtcTime;
use xbee_sensor_node::persistence_host::{default_store_path, FileStore};
use xbee_sensor_node::transport::packet_ids;
use xbee_sensor_node::{BootReason, Devices, DispatchTable, NodeConfig, Packet, SensorNode};

const DEFAULT_CYCLES: u32 = 10;

struct Options {
    config: Option<PathBuf>,
    store: Option<PathBuf>,
    cycles: u32,
}

fn print_help(program: &str) {
    println!("XBee sensor node simulation");
    println!();
    println!("Usage:");
    println!("  {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  --config <FILE>  JSON node configuration (defaults if absent)");
    println!("  --store <FILE>   Node image file (default ~/.xbee-sensor-node/eeprom.bin)");
    println!("  --cycles <N>     Duty cycles to run (default {})", DEFAULT_CYCLES);
    println!("  --help           Show this help");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("host-node");
    let mut options = Options {
        config: None,
        store: None,
        cycles: DEFAULT_CYCLES,
    };

    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = rest.next().ok_or("--config needs a file")?;
                options.config = Some(PathBuf::from(value));
            }
            "--store" => {
                let value = rest.next().ok_or("--store needs a file")?;
                options.store = Some(PathBuf::from(value));
            }
            "--cycles" | "-n" => {
                let value = rest.next().ok_or("--cycles needs a number")?;
                options.cycles = value
                    .parse()
                    .map_err(|_| format!("invalid cycle count '{}'", value))?;
            }
            "--help" | "-h" => {
                print_help(program);
                exit(0);
            }
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }
    Ok(options)
}

/// Fake sensor sample: cycle number and a slowly drifting temperature.
fn sample(cycle: u32) -> Vec<u8> {
    let centi_celsius: i16 = 2150 + ((cycle % 20) as i16 - 10) * 5;
    let mut reading = cycle.to_be_bytes().to_vec();
    reading.extend_from_slice(&centi_celsius.to_be_bytes());
    reading
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(2);
        }
    };

    if let Err(e) = run(options) {
        error!("{}", e);
        exit(1);
    }
}

fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    info!("=== XBee sensor node simulation starting ===");

    let config = match &options.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    let config = config.validate()?;

    let store_path = match options.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    let store = FileStore::open(&store_path)?;
    info!("Node image at {}", store.path().display());

    let echoes = Rc::new(Cell::new(0u32));
    let mut dispatch = DispatchTable::new();
    {
        let echoes = Rc::clone(&echoes);
        dispatch.register(packet_ids::SENSOR_READING, move |packet: &Packet| {
            echoes.set(echoes.get() + 1);
            info!(
                "Gateway echoed reading ({} bytes) from {:?}",
                packet.payload.len(),
                packet.origin
            );
        })?;
    }
    dispatch.register(packet_ids::ERROR_REPORT, |packet: &Packet| {
        warn!("Error report echoed: {:02X?}", packet.payload);
    })?;

    let clock = SimClock::starting_at(RtcTime::from_dhms(0, 8, 0, 0));
    let radio = LoopbackRadio::joined();
    let devices = Devices {
        radio: Box::new(radio.clone()),
        clock: Box::new(clock.clone()),
        power: Box::new(clock.power()),
        store: Box::new(store),
        timer: Box::new(clock.timer()),
    };

    let mut node = SensorNode::new(config, devices, dispatch)?;
    let outcome = node.start(BootReason::PowerOn)?;
    info!("Started: {:?}", outcome);

    for cycle in 0..options.cycles {
        let report = node.run_cycle(&sample(cycle))?;
        info!(
            "Cycle {} at {}: sleep {:?}, interrupts {}, reading {}",
            cycle,
            clock.now(),
            report.sleep,
            report.interrupts,
            if report.reading.is_ok() { "delivered" } else { "lost" }
        );
    }

    info!(
        "Done: {} cycles, {} echoes, {} packets sent, {} dropped",
        options.cycles,
        echoes.get(),
        radio.sent().len(),
        radio.dropped()
    );
    Ok(())
}
