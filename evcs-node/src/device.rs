//! Serial device of the charger link

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{error, info};

/// Controller line settings
pub const DEFAULT_BAUD: u32 = 19200;

/// Open the controller's serial port, 8N1 without flow control.
///
/// The returned stream is full duplex, so reads and writes can be split
/// across the transport's `select!`.
pub fn open_device(path: &str, baud: u32) -> Result<SerialStream, tokio_serial::Error> {
    match tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
    {
        Ok(port) => {
            info!("Serial port opened: {} @{} baud", path, baud);
            Ok(port)
        }
        Err(e) => {
            error!("Failed to open serial port {}: {}", path, e);
            Err(e)
        }
    }
}
