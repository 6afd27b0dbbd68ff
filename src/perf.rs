//! Rough bulk throughput, for information only.

use std::fmt;
use std::time::{Duration, Instant};

use log::info;

use crate::bus::Bus;
use crate::error::Result;
use crate::pattern;
use crate::source_sink::SourceSink;

/// Bytes moved per bulk call.
pub const CHUNK: usize = 100 * 1024;
/// Keep going until at least this many bytes have moved.
pub const TARGET: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    /// KiB per second. Runs shorter than a second count as one second.
    pub fn kib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(1.0);
        self.bytes as f64 / 1024.0 / secs
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {:?} for {:.1} KiB/s",
            self.bytes,
            self.elapsed,
            self.kib_per_sec()
        )
    }
}

/// Reads `chunk`-sized blocks from the source until `target` bytes arrived.
/// Every call must return the full chunk.
pub fn measure_read<B: Bus>(ss: &mut SourceSink<B>, chunk: usize, target: u64) -> Result<Throughput> {
    let start = Instant::now();
    let mut bytes = 0u64;
    while bytes < target {
        let data = ss.read_with_timeout(chunk, Duration::ZERO)?;
        if data.len() != chunk {
            return Err(crate::Error::ShortTransfer {
                expected: chunk,
                actual: data.len(),
            });
        }
        bytes += data.len() as u64;
    }
    let result = Throughput {
        bytes,
        elapsed: start.elapsed(),
    };
    info!("read {}", result);
    Ok(result)
}

/// Writes `chunk`-sized counting blocks to the sink until `target` bytes went out.
pub fn measure_write<B: Bus>(ss: &mut SourceSink<B>, chunk: usize, target: u64) -> Result<Throughput> {
    let data = pattern::counting(chunk);
    let start = Instant::now();
    let mut bytes = 0u64;
    while bytes < target {
        let written = ss.write_with_timeout(&data, Duration::ZERO)?;
        if written != data.len() {
            return Err(crate::Error::ShortTransfer {
                expected: data.len(),
                actual: written,
            });
        }
        bytes += written as u64;
    }
    let result = Throughput {
        bytes,
        elapsed: start.elapsed(),
    };
    info!("wrote {}", result);
    Ok(result)
}
