//! This module defines range-checked types for Modbus slave ids and register
//! ranges, meant to simplify correct usage of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::{Deref, Range};

/// Error type for this module
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid Modbus slave id.
    #[snafu(display("Invalid slave id"))]
    InvalidSlaveId,
    /// The register range is empty, too long, or runs past the last register.
    #[snafu(display("Invalid register range"))]
    InvalidRegisterRange,
}

const fn invalid_slave_id() -> InvalidSlaveIdSnafu {
    InvalidSlaveIdSnafu
}

const fn invalid_register_range() -> InvalidRegisterRangeSnafu {
    InvalidRegisterRangeSnafu
}

/// Address of a holding or input register.
pub type RegisterAddress = u16;

/// Most registers a single read request can return.
pub const MAX_READ_COUNT: u16 = 125;

/// SlaveId is a range-checked [1, 247] integer, the unicast address of a device on
/// the bus.
///
/// ## Example
/// ```
/// use gardener::SlaveId;
/// use std::convert::TryInto;
/// let id = SlaveId::new(2).unwrap();
/// let id: SlaveId = 2usize.try_into().unwrap();
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct SlaveId(u8);

/// Create a new [`SlaveId`], panics if it is out of range.
pub const fn slave(id: u8) -> SlaveId {
    if id >= 1 && id <= 247 {
        return SlaveId(id);
    }
    panic!("Invalid slave id.")
}

impl SlaveId {
    /// Create a new slave id, checking that it is in \[1, 247\].
    /// # Errors
    /// Returns [`Error::InvalidSlaveId`] if `id` is out of range.
    pub fn new(id: impl TryInto<u8>) -> Result<Self, Error> {
        let id = id.try_into().ok().with_context(invalid_slave_id)?;
        ensure!((1..=247).contains(&id), invalid_slave_id());
        Ok(Self(id))
    }
}

impl Deref for SlaveId {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<usize> for SlaveId {
    fn eq(&self, other: &usize) -> bool {
        self.0 as usize == *other
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait to convert `T: TryInto<u8>` into a [`SlaveId`].
pub trait IntoSlaveId {
    /// Convert self to a SlaveId.
    /// # Errors
    /// Returns `Error:InvalidSlaveId` if self isn't a valid slave id.
    fn into_slave_id(self) -> Result<SlaveId, Error>;
}

impl IntoSlaveId for SlaveId {
    fn into_slave_id(self) -> Result<SlaveId, Error> {
        Ok(self)
    }
}

impl<T> IntoSlaveId for T
where
    T: TryInto<u8>,
{
    fn into_slave_id(self) -> Result<SlaveId, Error> {
        SlaveId::new(self)
    }
}

impl TryFrom<usize> for SlaveId {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}


/// A run of consecutive registers, `count` in \[1, 125\], ending at or before
/// register 0xffff.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub struct RegisterRange {
    start: RegisterAddress,
    count: u16,
}

/// Create a new [`RegisterRange`], panics if it is invalid.
pub const fn registers(start: RegisterAddress, count: u16) -> RegisterRange {
    if count >= 1 && count <= MAX_READ_COUNT && start as u32 + count as u32 <= 0x1_0000 {
        return RegisterRange { start, count };
    }
    panic!("Invalid register range.")
}

impl RegisterRange {
    /// Create a new register range.
    /// # Errors
    /// Returns [`Error::InvalidRegisterRange`] if `count` is zero, above
    /// [`MAX_READ_COUNT`], or the range runs past the last register.
    pub fn new(start: RegisterAddress, count: u16) -> Result<Self, Error> {
        ensure!(
            (1..=MAX_READ_COUNT).contains(&count),
            invalid_register_range()
        );
        ensure!(
            u32::from(start) + u32::from(count) <= 0x1_0000,
            invalid_register_range()
        );
        Ok(Self { start, count })
    }

    /// A range holding a single register.
    pub const fn single(address: RegisterAddress) -> Self {
        Self {
            start: address,
            count: 1,
        }
    }

    pub const fn start(&self) -> RegisterAddress {
        self.start
    }

    pub const fn count(&self) -> u16 {
        self.count
    }

    /// The addresses in the range, in increasing order.
    pub fn addresses(&self) -> impl Iterator<Item = RegisterAddress> {
        let end = u32::from(self.start) + u32::from(self.count);
        (u32::from(self.start)..end).map(|a| a as RegisterAddress)
    }

    pub fn contains(&self, address: RegisterAddress) -> bool {
        self.as_range().contains(&u32::from(address))
    }

    fn as_range(&self) -> Range<u32> {
        u32::from(self.start)..u32::from(self.start) + u32::from(self.count)
    }
}
