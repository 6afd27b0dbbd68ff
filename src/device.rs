//! Finding the device under test and owning its handle for one test case.

use std::time::Duration;

use log::{debug, info, warn};
use rusb::{DeviceHandle, UsbContext};

use crate::bus::Bus;
use crate::descriptor::ConfigLayout;
use crate::error::{Error, Result};

/// GET_CONFIGURATION
pub const REQUEST_GET_CONFIGURATION: u8 = 0x08;
/// SET_CONFIGURATION
pub const REQUEST_SET_CONFIGURATION: u8 = 0x09;

/// Matches one physical device by vendor id, product id and exact serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: String,
}

impl Selector {
    /// The gadget-zero firmware's VID/PID with the given serial number.
    pub fn gadget0(serial: impl Into<String>) -> Self {
        Selector {
            vendor_id: crate::GADGET0_VID,
            product_id: crate::GADGET0_PID,
            serial: serial.into(),
        }
    }

    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    pub fn matches_serial(&self, serial: Option<&str>) -> bool {
        serial == Some(self.serial.as_str())
    }

    fn not_found(&self) -> Error {
        Error::NotFound {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial: self.serial.clone(),
        }
    }
}

/// Opens the first device that matches `selector`.
pub fn open<C: UsbContext>(context: &C, selector: &Selector) -> Result<DeviceHandle<C>> {
    let devices = context.devices()?;
    first_match(
        selector,
        devices.iter(),
        |device| {
            let desc = device.device_descriptor()?;
            Ok((desc.vendor_id(), desc.product_id()))
        },
        |device| {
            let desc = device.device_descriptor()?;
            let handle = device.open()?;
            let serial = desc
                .serial_number_string_index()
                .and_then(|_| handle.read_serial_number_string_ascii(&desc).ok());
            Ok((handle, serial))
        },
    )
}

/// Walks `devices` and returns the first whose ids and serial match.
///
/// A device whose descriptor cannot be read, or which cannot be opened,
/// is skipped with a warning rather than ending the search.
fn first_match<D, H>(
    selector: &Selector,
    devices: impl IntoIterator<Item = D>,
    mut ids: impl FnMut(&D) -> rusb::Result<(u16, u16)>,
    mut open: impl FnMut(&D) -> rusb::Result<(H, Option<String>)>,
) -> Result<H> {
    for device in devices {
        let (vendor_id, product_id) = match ids(&device) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Cannot read device descriptor: {}", e);
                continue;
            }
        };
        if !selector.matches_ids(vendor_id, product_id) {
            continue;
        }
        let (handle, serial) = match open(&device) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Cannot open {:04x}:{:04x}: {}", vendor_id, product_id, e);
                continue;
            }
        };
        debug!("Candidate {:04x}:{:04x} serial {:?}", vendor_id, product_id, serial);
        if selector.matches_serial(serial.as_deref()) {
            info!(
                "Opened device {:04x}:{:04x} serial {}",
                selector.vendor_id, selector.product_id, selector.serial
            );
            return Ok(handle);
        }
    }
    Err(selector.not_found())
}

/// The device under test, held for the length of one test case.
///
/// Whatever interface was claimed is released when the value is dropped,
/// whether the case passed or not.
pub struct Gadget<B: Bus> {
    bus: B,
    claimed: Option<u8>,
    timeout: Duration,
}

impl<B: Bus> Gadget<B> {
    pub fn new(bus: B) -> Self {
        Gadget {
            bus,
            claimed: None,
            timeout: crate::TIMEOUT,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn num_configurations(&self) -> Result<u8> {
        Ok(self.bus.num_configurations()?)
    }

    /// Looks up a configuration descriptor by bConfigurationValue.
    pub fn find_configuration(&self, value: u8) -> Result<ConfigLayout> {
        self.bus
            .configuration(value)?
            .ok_or(Error::MissingConfiguration(value))
    }

    pub fn activate(&mut self, config: &ConfigLayout) -> Result<()> {
        self.set_configuration(config.value)
    }

    pub fn set_configuration(&mut self, value: u8) -> Result<()> {
        self.release()?;
        self.bus.set_configuration(value)?;
        Ok(())
    }

    /// Raw GET_CONFIGURATION on endpoint zero.
    pub fn get_configuration(&mut self) -> Result<u8> {
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Standard,
            rusb::Recipient::Device,
        );
        let mut buf = [0u8; 1];
        let len = self.bus.read_control(
            request_type,
            REQUEST_GET_CONFIGURATION,
            0,
            0,
            &mut buf,
            self.timeout,
        )?;
        if len != buf.len() {
            return Err(Error::ShortTransfer {
                expected: buf.len(),
                actual: len,
            });
        }
        Ok(buf[0])
    }

    /// Raw SET_CONFIGURATION on endpoint zero, bypassing the host stack's
    /// own bookkeeping so that any wValue can be sent.
    pub fn request_configuration(&mut self, value: u16) -> Result<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Standard,
            rusb::Recipient::Device,
        );
        self.bus.write_control(
            request_type,
            REQUEST_SET_CONFIGURATION,
            value,
            0,
            &[],
            self.timeout,
        )?;
        Ok(())
    }

    pub(crate) fn claim(&mut self, interface: u8) -> Result<()> {
        if self.claimed == Some(interface) {
            return Ok(());
        }
        self.release()?;
        self.bus.claim_interface(interface)?;
        self.claimed = Some(interface);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(interface) = self.claimed.take() {
            self.bus.release_interface(interface)?;
        }
        Ok(())
    }
}

impl<B: Bus> Drop for Gadget<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release interface: {}", e);
        }
    }
}
