use uuid::Uuid;

/**
 * The UUID of the Serial Port Profile, which HC-05 modules expose over RFCOMM.
 */
pub const SERIAL_PORT_SERVICE: &str = "00001101-0000-1000-8000-00805f9b34fb";

/**
 * The name HC-05 modules advertise by default. Used to pick a peripheral when several are known.
 */
pub const DEFAULT_PERIPHERAL_NAME: &str = "HC-05";

/**
 * How long (milliseconds) a connection attempt may take.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * Size of the buffer the reader loop reads into. One read becomes one inbound message.
 */
pub const READ_BUFFER_SIZE: usize = 1024;

/**
 * Default baud rate of an HC-05 module in data mode.
 */
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/**
 * How often (milliseconds) a blocked serial read wakes up to check if the connection was closed.
 */
pub const SERIAL_POLL_TIMEOUT: u64 = 250;

pub const COMMAND_ON: u8 = 0x41; // A
pub const COMMAND_OFF: u8 = 0x42; // B

pub fn make_serial_port_service_uuid() -> Uuid {
    Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb)
}
