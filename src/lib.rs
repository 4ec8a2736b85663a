//! Platform-agnostic driver for the Melexis MLX90615 infrared thermometer.
//!
//! The device talks SMBus: every word carries a PEC byte, and EEPROM
//! settings must be erased before they are rewritten. [`smbus`] holds the
//! bus-level word access, [`mlx90615`] the device driver built on top.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod mlx90615;
pub mod smbus;

pub use mlx90615::{Config, Error, MLX90615};
