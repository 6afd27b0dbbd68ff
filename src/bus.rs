use std::time::Duration;

use log::{debug, trace};
use rusb::{DeviceHandle, UsbContext};

use crate::descriptor::ConfigLayout;

/// The slice of a host USB stack the harness needs.
///
/// Every call blocks until the transfer completes or `timeout` expires.
/// A zero timeout waits forever. Errors are reported with the host stack's
/// own `rusb::Error` so that a STALL stays distinguishable from a timeout.
pub trait Bus {
    /// bNumConfigurations from the device descriptor.
    fn num_configurations(&self) -> rusb::Result<u8>;

    /// Descriptor of the configuration whose bConfigurationValue is `value`.
    fn configuration(&self, value: u8) -> rusb::Result<Option<ConfigLayout>>;

    fn set_configuration(&mut self, value: u8) -> rusb::Result<()>;

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

impl<C: UsbContext> Bus for DeviceHandle<C> {
    fn num_configurations(&self) -> rusb::Result<u8> {
        Ok(self.device().device_descriptor()?.num_configurations())
    }

    fn configuration(&self, value: u8) -> rusb::Result<Option<ConfigLayout>> {
        let device = self.device();
        let count = device.device_descriptor()?.num_configurations();
        for index in 0..count {
            let config = device.config_descriptor(index)?;
            if config.number() == value {
                return Ok(Some(ConfigLayout::from(&config)));
            }
        }
        Ok(None)
    }

    fn set_configuration(&mut self, value: u8) -> rusb::Result<()> {
        debug!("Setting configuration to {}", value);
        self.set_active_configuration(value)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        // Not every platform can report or detach kernel drivers
        if let Ok(true) = self.kernel_driver_active(interface) {
            self.detach_kernel_driver(interface)?;
            debug!("Detached kernel driver from interface {}", interface);
        }
        DeviceHandle::claim_interface(self, interface)?;
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)?;
        debug!("Released interface {}", interface);
        Ok(())
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        trace!(
            "control in: type=0x{:02x} request=0x{:02x} value={} index={} len={}",
            request_type,
            request,
            value,
            index,
            buf.len()
        );
        DeviceHandle::read_control(self, request_type, request, value, index, buf, timeout)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        trace!(
            "control out: type=0x{:02x} request=0x{:02x} value={} index={} len={}",
            request_type,
            request,
            value,
            index,
            data.len()
        );
        DeviceHandle::write_control(self, request_type, request, value, index, data, timeout)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, data, timeout)
    }
}
