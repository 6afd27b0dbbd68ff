//! The gadget-zero test cases and a small runner for them.
//!
//! Every case gets a freshly opened device from the runner's `open`
//! callback and gives it back by dropping it, so a failing case cannot
//! leave an interface claimed for the next one.

use std::fmt;

use anyhow::{Context, bail, ensure};
use log::{error, info, warn};

use crate::bus::Bus;
use crate::device::Gadget;
use crate::error::{Error, ErrorKind, Result};
use crate::pattern::{self, Pattern};
use crate::perf;
use crate::source_sink::{REQUEST_SET_PATTERN, SOURCE_SINK_CONFIG, SourceSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Device level: configurations and standard requests.
    Device,
    /// Bulk and vendor traffic on the source/sink configuration.
    SourceSink,
    /// Throughput; informational and off by default.
    Performance,
}

enum Body<B: Bus> {
    Device(fn(&mut Gadget<B>) -> anyhow::Result<()>),
    SourceSink(fn(&mut SourceSink<B>) -> anyhow::Result<()>),
}

pub struct Case<B: Bus> {
    pub name: &'static str,
    pub group: Group,
    /// Known firmware problem; only run on request.
    pub known_failure: Option<&'static str>,
    body: Body<B>,
}

impl<B: Bus> Case<B> {
    fn device(name: &'static str, body: fn(&mut Gadget<B>) -> anyhow::Result<()>) -> Self {
        Case {
            name,
            group: Group::Device,
            known_failure: None,
            body: Body::Device(body),
        }
    }

    fn source_sink(
        name: &'static str,
        group: Group,
        body: fn(&mut SourceSink<B>) -> anyhow::Result<()>,
    ) -> Self {
        Case {
            name,
            group,
            known_failure: None,
            body: Body::SourceSink(body),
        }
    }

    fn known_failure(mut self, reason: &'static str) -> Self {
        self.known_failure = Some(reason);
        self
    }

    /// Setup, body, teardown. Teardown is the drop at the end of each arm.
    fn run(&self, bus: B) -> anyhow::Result<()> {
        let gadget = Gadget::new(bus);
        match &self.body {
            Body::Device(body) => {
                let mut gadget = gadget;
                body(&mut gadget)
            }
            Body::SourceSink(body) => {
                let mut ss = SourceSink::configure(gadget, SOURCE_SINK_CONFIG)
                    .context("setup: source/sink configuration")?;
                body(&mut ss)
            }
        }
    }
}

/// Every case, in the order they run.
pub fn cases<B: Bus>() -> Vec<Case<B>> {
    vec![
        Case::device("sanity", sanity),
        Case::device("config_switch_2", config_switch_2),
        Case::device("config_switch_3", config_switch_3),
        Case::device("fetch_config", fetch_config),
        Case::device("invalid_config", invalid_config),
        Case::source_sink("write_simple", Group::SourceSink, write_simple),
        Case::source_sink("write_zlp", Group::SourceSink, write_zlp),
        Case::source_sink("write_batch", Group::SourceSink, write_batch),
        Case::source_sink("write_mixed", Group::SourceSink, write_mixed),
        Case::source_sink("read_zeros", Group::SourceSink, read_zeros),
        Case::source_sink("read_sequence", Group::SourceSink, read_sequence),
        Case::source_sink("read_write_interleaved", Group::SourceSink, read_write_interleaved),
        Case::source_sink("control_known", Group::SourceSink, control_known),
        Case::source_sink("control_unknown", Group::SourceSink, control_unknown),
        Case::source_sink("unconfigure", Group::SourceSink, unconfigure)
            .known_failure("set_config(0) is not handled by the firmware yet"),
        Case::source_sink("read_perf", Group::Performance, read_perf),
        Case::source_sink("write_perf", Group::Performance, write_perf),
    ]
}

fn expect_kind<T>(result: Result<T>, kind: ErrorKind, what: &str) -> anyhow::Result<()> {
    match result {
        Ok(_) => bail!("{} should have failed with {:?}", what, kind),
        Err(e) if e.kind() == kind => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("{} failed, but not with {:?}", what, kind))),
    }
}

fn sanity<B: Bus>(gadget: &mut Gadget<B>) -> anyhow::Result<()> {
    let count = gadget.num_configurations()?;
    ensure!(count == 2, "Should have 2 configs, found {}", count);
    Ok(())
}

fn config_switch_2<B: Bus>(gadget: &mut Gadget<B>) -> anyhow::Result<()> {
    let config = gadget.find_configuration(2).context("Config 2 should exist")?;
    gadget.activate(&config)?;
    Ok(())
}

fn config_switch_3<B: Bus>(gadget: &mut Gadget<B>) -> anyhow::Result<()> {
    gadget.set_configuration(3)?;
    Ok(())
}

fn fetch_config<B: Bus>(gadget: &mut Gadget<B>) -> anyhow::Result<()> {
    gadget.set_configuration(3)?;
    let value = gadget.get_configuration()?;
    ensure!(value == 3, "Should get the actual bConfigurationValue back, got {}", value);
    Ok(())
}

fn invalid_config<B: Bus>(gadget: &mut Gadget<B>) -> anyhow::Result<()> {
    // config 0 is only meaningful next to a valid one, see unconfigure
    expect_kind(
        gadget.request_configuration(99),
        ErrorKind::Stall,
        "SET_CONFIGURATION(99)",
    )
}

fn write_simple<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let data = pattern::counting(ss.out_packet() / 2);
    let written = ss.write(&data)?;
    ensure!(written == data.len(), "Should have written all {} bytes, wrote {}", data.len(), written);
    Ok(())
}

fn write_zlp<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let written = ss.write(&[])?;
    ensure!(written == 0, "Zero length write reported {} bytes", written);
    Ok(())
}

/// 50 max sized packets. Stalls if the firmware isn't consuming data.
fn write_batch<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let data = pattern::counting(ss.out_packet());
    for i in 0..50 {
        let written = ss.write(&data)?;
        ensure!(written == data.len(), "Write {} took {} of {} bytes", i, written, data.len());
    }
    Ok(())
}

fn write_mixed<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let mps = ss.out_packet();
    for len in (mps / 4..mps * 10).step_by(11) {
        let data = pattern::counting(len);
        let written = ss.write(&data)?;
        ensure!(written == len, "Write of {} bytes took {}", len, written);
    }
    Ok(())
}

fn read_zeros<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    ss.select_pattern(Pattern::Zeros)?;
    // clear out any prior pattern data
    ss.drain()?;
    let data = ss.read_exact(ss.in_packet() * 10)?;
    Pattern::Zeros.verify(&data)?;
    Ok(())
}

fn read_sequence<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    ss.resync(Pattern::Mod63)?;
    let data = ss.read_exact(ss.in_packet() * 3)?;
    Pattern::Mod63.verify(&data)?;
    Ok(())
}

fn read_write_interleaved<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let mps = ss.in_packet();
    for i in 1..20 {
        let read = ss.read(mps * i)?.len();
        let data = pattern::counting(i * 20 + 3);
        let written = ss.write(&data)?;
        ensure!(read == mps * i, "Round {}: read {} of {} bytes", i, read, mps * i);
        ensure!(written == data.len(), "Round {}: wrote {} of {} bytes", i, written, data.len());
    }
    Ok(())
}

fn control_known<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    // 99 is not a pattern but the request itself is known, so no stall
    for value in [0, 1, 99, 0] {
        ss.vendor_request(REQUEST_SET_PATTERN, value)
            .with_context(|| format!("set pattern {}", value))?;
    }
    Ok(())
}

fn control_unknown<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    expect_kind(ss.vendor_request(42, 69), ErrorKind::Stall, "vendor request 42")
}

/// Writes, drops the configuration with SET_CONFIGURATION(0), then
/// expects the next write to go unanswered.
fn unconfigure<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    write_simple(ss)?;
    ss.unconfigure()?;
    expect_kind(write_simple_raw(ss), ErrorKind::Timeout, "write after unconfigure")
}

fn write_simple_raw<B: Bus>(ss: &mut SourceSink<B>) -> Result<usize> {
    let data = pattern::counting(ss.out_packet() / 2);
    ss.write(&data)
}

fn read_perf<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let result = perf::measure_read(ss, perf::CHUNK, perf::TARGET)?;
    println!("read {}", result);
    Ok(())
}

fn write_perf<B: Bus>(ss: &mut SourceSink<B>) -> anyhow::Result<()> {
    let result = perf::measure_write(ss, perf::CHUNK, perf::TARGET)?;
    println!("wrote {}", result);
    Ok(())
}

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Failed(anyhow::Error),
    Skipped(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Run the throughput cases.
    pub performance: bool,
    /// Run cases marked as known firmware failures.
    pub known_failures: bool,
    /// Only run cases whose name contains this.
    pub filter: Option<String>,
}

impl Options {
    fn skip_reason<B: Bus>(&self, case: &Case<B>) -> Option<&'static str> {
        if let Some(filter) = &self.filter {
            if !case.name.contains(filter.as_str()) {
                return Some("filtered out");
            }
        }
        if case.group == Group::Performance && !self.performance {
            return Some("performance tests only on demand");
        }
        if !self.known_failures {
            if let Some(reason) = case.known_failure {
                return Some(reason);
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct Report {
    pub results: Vec<(&'static str, Outcome)>,
}

impl Report {
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.results.iter().find(|(n, _)| *n == name).map(|(_, o)| o)
    }

    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| f(o)).count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, outcome) in &self.results {
            match outcome {
                Outcome::Passed => writeln!(f, "{} ... ok", name)?,
                Outcome::Failed(e) => writeln!(f, "{} ... FAIL: {:#}", name, e)?,
                Outcome::Skipped(reason) => writeln!(f, "{} ... skipped ({})", name, reason)?,
            }
        }
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Runs the selected cases one after another, opening the device afresh
/// for each. A case that cannot open the device fails; nothing is retried.
pub fn run<B, F>(mut open: F, options: &Options) -> Report
where
    B: Bus,
    F: FnMut() -> Result<B, Error>,
{
    let mut report = Report::default();
    for case in cases::<B>() {
        if let Some(reason) = options.skip_reason(&case) {
            report.results.push((case.name, Outcome::Skipped(reason)));
            continue;
        }
        info!("Running {}", case.name);
        let result = open()
            .context("setup: open device")
            .and_then(|bus| case.run(bus));
        let outcome = match result {
            Ok(()) => Outcome::Passed,
            Err(e) => {
                error!("{} failed: {:#}", case.name, e);
                Outcome::Failed(e)
            }
        };
        report.results.push((case.name, outcome));
    }
    if !report.success() {
        warn!("{} of {} cases failed", report.failed(), report.results.len());
    }
    report
}
