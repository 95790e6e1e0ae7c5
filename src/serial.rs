//! Serial line configuration.
//!
//! Only the combinations the garden hardware actually uses are accepted, anything
//! else is rejected when the configuration is built rather than when the port is
//! opened.

use core::convert::TryFrom;
use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use log::info;
use serialport::SerialPort;
use snafu::{ensure, OptionExt, ResultExt, Snafu};

/// Error type for this module
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Unsupported baud rate {}", baud_rate))]
    UnsupportedBaudRate { baud_rate: u32 },
    #[snafu(display("Unsupported parity {:?}, expected N, E or O", parity))]
    UnsupportedParity { parity: char },
    #[snafu(display("Unsupported number of data bits {}", data_bits))]
    UnsupportedDataBits { data_bits: u8 },
    #[snafu(display("Unsupported number of stop bits {}", stop_bits))]
    UnsupportedStopBits { stop_bits: u8 },
    #[snafu(display("Invalid line format {:?}, expected e.g. 8N1", format))]
    InvalidLineFormat { format: String },
    #[snafu(display("Failed to open {}", path))]
    Open {
        path: String,
        source: serialport::Error,
    },
}

/// Response timeout used on the Modbus line.
pub const MODBUS_TIMEOUT: Duration = Duration::from_millis(500);
/// Read timeout used on the VE.Direct line. Short, the reader polls.
pub const VE_DIRECT_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
}

impl BaudRate {
    pub const fn bits_per_second(self) -> u32 {
        match self {
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(baud_rate: u32) -> Result<Self, Self::Error> {
        match baud_rate {
            9600 => Ok(Self::B9600),
            19200 => Ok(Self::B19200),
            38400 => Ok(Self::B38400),
            _ => UnsupportedBaudRateSnafu { baud_rate }.fail(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl TryFrom<char> for Parity {
    type Error = Error;

    fn try_from(parity: char) -> Result<Self, Self::Error> {
        match parity.to_ascii_uppercase() {
            'N' => Ok(Self::None),
            'E' => Ok(Self::Even),
            'O' => Ok(Self::Odd),
            _ => UnsupportedParitySnafu { parity }.fail(),
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Even => Self::Even,
            Parity::Odd => Self::Odd,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(data_bits: u8) -> Result<Self, Self::Error> {
        match data_bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => UnsupportedDataBitsSnafu { data_bits }.fail(),
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(data_bits: DataBits) -> Self {
        match data_bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = Error;

    fn try_from(stop_bits: u8) -> Result<Self, Self::Error> {
        match stop_bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => UnsupportedStopBitsSnafu { stop_bits }.fail(),
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

/// Character framing in the usual compact notation, e.g. `8N1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineFormat {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl FromStr for LineFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidLineFormatSnafu { format: s };
        let bytes = s.as_bytes();
        ensure!(bytes.len() == 3 && s.is_ascii(), invalid());
        let data_bits = char::from(bytes[0]).to_digit(10).context(invalid())?;
        let stop_bits = char::from(bytes[2]).to_digit(10).context(invalid())?;
        Ok(Self {
            data_bits: DataBits::try_from(data_bits as u8)?,
            parity: Parity::try_from(char::from(bytes[1]))?,
            stop_bits: StopBits::try_from(stop_bits as u8)?,
        })
    }
}

impl fmt::Display for LineFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data_bits = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        let stop_bits = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{}{}{}", data_bits, parity, stop_bits)
    }
}

/// Everything needed to open a serial line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: BaudRate,
    pub format: LineFormat,
    pub timeout: Duration,
}

impl SerialConfig {
    /// Build a configuration from raw settings.
    /// # Errors
    /// Returns an error naming the first unsupported setting.
    pub fn new(
        path: impl Into<String>,
        baud_rate: u32,
        parity: char,
        data_bits: u8,
        stop_bits: u8,
    ) -> Result<Self, Error> {
        Ok(Self {
            path: path.into(),
            baud_rate: BaudRate::try_from(baud_rate)?,
            format: LineFormat {
                data_bits: DataBits::try_from(data_bits)?,
                parity: Parity::try_from(parity)?,
                stop_bits: StopBits::try_from(stop_bits)?,
            },
            timeout: MODBUS_TIMEOUT,
        })
    }

    /// Victron charge controller: 19200 8N1.
    pub fn ve_direct(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: BaudRate::B19200,
            format: LineFormat {
                data_bits: DataBits::Eight,
                parity: Parity::None,
                stop_bits: StopBits::One,
            },
            timeout: VE_DIRECT_TIMEOUT,
        }
    }

    /// The garden RS-485 line: 38400 8N2.
    pub fn modbus_rtu(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: BaudRate::B38400,
            format: LineFormat {
                data_bits: DataBits::Eight,
                parity: Parity::None,
                stop_bits: StopBits::Two,
            },
            timeout: MODBUS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open the port.
    /// # Errors
    /// Returns [`Error::Open`] if the operating system refuses.
    pub fn open(&self) -> Result<Box<dyn SerialPort>, Error> {
        info!(
            "Opening {} at {} {}",
            self.path,
            self.baud_rate.bits_per_second(),
            self.format
        );
        serialport::new(&self.path, self.baud_rate.bits_per_second())
            .data_bits(self.format.data_bits.into())
            .parity(self.format.parity.into())
            .stop_bits(self.format.stop_bits.into())
            .timeout(self.timeout)
            .open()
            .context(OpenSnafu { path: &self.path })
    }
}
