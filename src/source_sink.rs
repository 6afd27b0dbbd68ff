//! Bulk traffic on the source/sink configuration.
//!
//! The sink (bulk OUT) swallows whatever the host writes. The source (bulk
//! IN) produces an endless stream in the pattern picked by the vendor
//! set-pattern request. The device restarts its stream counter on every
//! pattern switch, but packets it already queued are still delivered first,
//! so a fresh pattern is only trustworthy after draining.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, trace};

use crate::bus::Bus;
use crate::descriptor::EndpointPair;
use crate::device::Gadget;
use crate::error::{Error, Result};
use crate::pattern::Pattern;

/// Configuration carrying the source/sink interface.
pub const SOURCE_SINK_CONFIG: u8 = 2;
/// Interface number of the source/sink function.
pub const SOURCE_SINK_INTERFACE: u8 = 0;
/// Vendor request selecting the source pattern; wValue is the pattern.
pub const REQUEST_SET_PATTERN: u8 = 0x01;

pub struct SourceSink<B: Bus> {
    gadget: Gadget<B>,
    endpoints: EndpointPair,
}

impl<B: Bus> SourceSink<B> {
    /// Activates configuration `value`, then derives the bulk endpoints from
    /// that configuration's descriptor and claims the interface.
    pub fn configure(mut gadget: Gadget<B>, value: u8) -> Result<Self> {
        let config = gadget.find_configuration(value)?;
        gadget.activate(&config)?;
        let endpoints = config.bulk_pair(SOURCE_SINK_INTERFACE)?;
        debug!(
            "Found bulk endpoints: IN=0x{:02x} ({} bytes), OUT=0x{:02x} ({} bytes)",
            endpoints.bulk_in.address,
            endpoints.bulk_in.max_packet_size,
            endpoints.bulk_out.address,
            endpoints.bulk_out.max_packet_size
        );
        gadget.claim(endpoints.interface)?;
        Ok(SourceSink { gadget, endpoints })
    }

    pub fn endpoints(&self) -> EndpointPair {
        self.endpoints
    }

    /// Max packet size of the bulk IN endpoint.
    pub fn in_packet(&self) -> usize {
        self.endpoints.bulk_in.packet_size()
    }

    /// Max packet size of the bulk OUT endpoint.
    pub fn out_packet(&self) -> usize {
        self.endpoints.bulk_out.packet_size()
    }

    pub fn gadget(&mut self) -> &mut Gadget<B> {
        &mut self.gadget
    }

    /// Writes `data` to the sink and returns how many bytes it accepted.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let timeout = self.gadget.timeout();
        self.write_with_timeout(data, timeout)
    }

    pub fn write_with_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        let endpoint = self.endpoints.bulk_out.address;
        let written = self.gadget.bus_mut().write_bulk(endpoint, data, timeout)?;
        trace!("Wrote {} of {} bytes to 0x{:02x}", written, data.len(), endpoint);
        Ok(written)
    }

    /// Like [`write`](Self::write) but a partial write is an error.
    pub fn write_exact(&mut self, data: &[u8]) -> Result<()> {
        let written = self.write(data)?;
        expect_len(data.len(), written)
    }

    /// Reads up to `len` bytes from the source.
    ///
    /// The request is rounded up to whole max-size packets; asking the host
    /// stack for less than the device sends is an overflow.
    pub fn read(&mut self, len: usize) -> Result<Bytes> {
        let timeout = self.gadget.timeout();
        self.read_with_timeout(len, timeout)
    }

    pub fn read_with_timeout(&mut self, len: usize, timeout: Duration) -> Result<Bytes> {
        let endpoint = self.endpoints.bulk_in;
        let mut buf = BytesMut::zeroed(endpoint.whole_packets(len));
        let read = self
            .gadget
            .bus_mut()
            .read_bulk(endpoint.address, &mut buf, timeout)?;
        buf.truncate(read);
        trace!("Read {} bytes from 0x{:02x}", read, endpoint.address);
        Ok(buf.freeze())
    }

    /// Like [`read`](Self::read) but anything other than `len` bytes is an error.
    pub fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        let data = self.read(len)?;
        expect_len(len, data.len())?;
        Ok(data)
    }

    /// Issues a vendor request to the source/sink interface.
    pub fn vendor_request(&mut self, request: u8, value: u16) -> Result<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Interface,
        );
        let timeout = self.gadget.timeout();
        let index = u16::from(self.endpoints.interface);
        self.gadget
            .bus_mut()
            .write_control(request_type, request, value, index, &[], timeout)?;
        Ok(())
    }

    pub fn select_pattern(&mut self, pattern: Pattern) -> Result<()> {
        debug!("Selecting pattern {:?}", pattern);
        self.vendor_request(REQUEST_SET_PATTERN, pattern.value())
    }

    /// Discards one max-size packet of whatever the source had queued.
    pub fn drain(&mut self) -> Result<usize> {
        let len = self.in_packet();
        Ok(self.read(len)?.len())
    }

    /// Selects `pattern` and drains twice, leaving the stream at offset zero.
    ///
    /// The firmware double buffers its source, so one drain leaves a packet
    /// of the old pattern queued. Re-selecting the same pattern does not
    /// restart the counter, and the second drain flushes the last stale
    /// packet.
    pub fn resync(&mut self, pattern: Pattern) -> Result<()> {
        for _ in 0..2 {
            self.select_pattern(pattern)?;
            self.drain()?;
        }
        Ok(())
    }

    /// SET_CONFIGURATION(0) while the interface is in use.
    pub fn unconfigure(&mut self) -> Result<()> {
        self.gadget.request_configuration(0)
    }
}

fn expect_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::ShortTransfer { expected, actual })
    }
}
