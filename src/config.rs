//! Compile-time configuration of the node.

use crate::time::Duration;

/// ADC channel sampled after boot.
pub const DEFAULT_CHANNEL: u8 = 0;

/// Highest selectable ADC channel.
pub const MAX_CHANNEL: u8 = 7;

/// Threshold applied to samples after boot, in millivolts.
pub const DEFAULT_THRESHOLD_MV: u16 = 1650;

/// ADC reference voltage in millivolts.
pub const VREF_MV: u32 = 3300;

/// Full-scale reading of the 12-bit converter.
pub const ADC_FULL_SCALE: u32 = 4095;

/// Number of qualifying samples per data packet after boot.
pub const DEFAULT_BATCH_SIZE: u16 = 100;

/// Upper bound on the configurable batch size.
pub const MAX_BATCH_SIZE: usize = 500;

/// UDP port the node listens on.
pub const LOCAL_PORT: u16 = 5000;

/// Baud rate of the logging UART.
pub const UART_BAUD: u32 = 115_200;

/// Largest application payload carried in one datagram
/// (one Ethernet MTU minus UDP/IP overhead).
pub const MAX_PAYLOAD: usize = 1472;

/// Largest body of a DATA payload.
pub const MAX_DATA_PAYLOAD: usize = 1400;

/// Number of slots in the UDP socket pool.
pub const SOCKET_SLOTS: usize = 4;

/// Datagrams a socket buffers before the dispatcher starts dropping.
pub const RECV_QUEUE_DEPTH: usize = 8;

/// Capacity of one buffered datagram; longer payloads are truncated.
pub const DATAGRAM_CAPACITY: usize = MAX_PAYLOAD;

/// Overall deadline for link-up and for address acquisition.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Interval between link and address probes during bring-up.
pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Receive timeout of the network loop in steady state.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause between queue probes while a receive blocks.
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Sleep applied while acquisition is idle or the network is not ready.
pub const IDLE_DELAY: Duration = Duration::from_millis(100);

/// Nominal acquisition loop cadence.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(1);

/// Pause between iterations once the network loop is in its terminal
/// error state.
pub const ERROR_IDLE_DELAY: Duration = Duration::from_millis(1000);

/// Deadline for one UART line transmission.
pub const UART_TX_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on the busy-wait of a synchronous ADC read, in status polls.
pub const ADC_SYNC_POLL_LIMIT: u32 = 1_000_000;

/// Capacity of one formatted log line, terminator included.
pub const LOG_LINE_CAPACITY: usize = 256;

/// Suggested scheduler priority of the network task.
pub const NETWORK_TASK_PRIO: u8 = 2;

/// Suggested scheduler priority of the acquisition task; below
/// [`NETWORK_TASK_PRIO`] so control traffic preempts sampling.
pub const ACQUISITION_TASK_PRIO: u8 = 1;
