use std::process::ExitCode;

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use log::info;
use rusb::Context;

use usb_gadget0::suite::{self, Options};
use usb_gadget0::{DEFAULT_SERIAL, Selector, device};

/// Run the gadget-zero test cases against an attached board.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial number of the board under test
    #[arg(long, env = "GADGET0_SERIAL", default_value = DEFAULT_SERIAL)]
    serial: String,

    /// Vendor id, in hex
    #[arg(long, value_parser = parse_hex, default_value = "cafe")]
    vid: u16,

    /// Product id, in hex
    #[arg(long, value_parser = parse_hex, default_value = "cafe")]
    pid: u16,

    /// Also run the throughput cases
    #[arg(long)]
    perf: bool,

    /// Also run cases that fail on current firmware
    #[arg(long)]
    known_failures: bool,

    /// List the cases and exit
    #[arg(long)]
    list: bool,

    /// Only run cases whose name contains this
    filter: Option<String>,
}

fn parse_hex(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for case in suite::cases::<rusb::DeviceHandle<Context>>() {
            match case.known_failure {
                Some(reason) => println!("{} ({:?}, known failure: {})", case.name, case.group, reason),
                None => println!("{} ({:?})", case.name, case.group),
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // Initialize libusb context
    let context = Context::new().context("Failed to initialize rusb context")?;
    let selector = Selector {
        vendor_id: args.vid,
        product_id: args.pid,
        serial: args.serial,
    };
    info!(
        "Testing {:04x}:{:04x} serial {}",
        selector.vendor_id, selector.product_id, selector.serial
    );

    let options = Options {
        performance: args.perf,
        known_failures: args.known_failures,
        filter: args.filter,
    };
    let report = suite::run(|| device::open(&context, &selector), &options);
    println!("{}", report);

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
