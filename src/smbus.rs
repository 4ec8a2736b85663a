//! SMBus word access with Packet Error Code (PEC) checking.
//!
//! PEC is CRC-8 with polynomial x^8 + x^2 + x + 1 (0x07), init 0x00, no
//! reflection and no final XOR, taken over every byte that crosses the
//! wire in a transaction, address bytes included.

use crc::{Crc, CRC_8_SMBUS};
use embedded_hal_1::i2c::I2c;

const SMBUS_PEC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Computes the PEC byte over `bytes`.
pub fn compute_pec(bytes: &[u8]) -> u8 {
    SMBUS_PEC.checksum(bytes)
}

/// Checks a received PEC byte against `bytes`.
pub fn verify_pec(bytes: &[u8], received: u8) -> bool {
    compute_pec(bytes) == received
}

/// Errors of a single word transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordError<E> {
    /// Bus failure, as reported by the I²C implementation.
    I2c(E),
    /// The PEC byte sent by the device doesn't match the transaction.
    Pec { expected: u8, received: u8 },
}

#[inline]
fn write_address(address: u8) -> u8 {
    address << 1
}

#[inline]
fn read_address(address: u8) -> u8 {
    (address << 1) | 1
}

/// Bytes covered by the PEC of a read-word transaction.
pub fn read_word_frame(address: u8, command: u8, lsb: u8, msb: u8) -> [u8; 5] {
    [write_address(address), command, read_address(address), lsb, msb]
}

/// Bytes covered by the PEC of a write-word transaction.
pub fn write_word_frame(address: u8, command: u8, lsb: u8, msb: u8) -> [u8; 4] {
    [write_address(address), command, lsb, msb]
}

/// Read-word: command byte, repeated start, then LSB, MSB and PEC.
///
/// With `check_pec` off the PEC byte is still clocked in but ignored.
pub fn read_word<I2C: I2c>(
    i2c: &mut I2C,
    address: u8,
    command: u8,
    check_pec: bool,
) -> Result<u16, WordError<I2C::Error>> {
    let mut buf = [0u8; 3];
    i2c.write_read(address, &[command], &mut buf)
        .map_err(WordError::I2c)?;
    let [lsb, msb, pec] = buf;

    if check_pec {
        let expected = compute_pec(&read_word_frame(address, command, lsb, msb));
        if expected != pec {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "PEC mismatch reading {:#x}: expected {:#x}, got {:#x}",
                command,
                expected,
                pec
            );
            return Err(WordError::Pec { expected, received: pec });
        }
    }

    Ok(u16::from_le_bytes([lsb, msb]))
}

/// Write-word: command byte, LSB, MSB and a locally computed PEC.
pub fn write_word<I2C: I2c>(i2c: &mut I2C, address: u8, command: u8, value: u16) -> Result<(), I2C::Error> {
    let [lsb, msb] = value.to_le_bytes();
    let pec = compute_pec(&write_word_frame(address, command, lsb, msb));
    i2c.write(address, &[command, lsb, msb, pec])
}

/// Sends a bare command byte protected by its PEC, e.g. the sleep command.
pub fn send_command<I2C: I2c>(i2c: &mut I2C, address: u8, command: u8) -> Result<(), I2C::Error> {
    let pec = compute_pec(&[write_address(address), command]);
    i2c.write(address, &[command, pec])
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_1::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use std::vec;

    #[test]
    fn pec_check_value() {
        // CRC-8/SMBUS catalogue check value
        assert_eq!(compute_pec(b"123456789"), 0xf4);
        assert_eq!(compute_pec(&[]), 0x00);
    }

    #[test]
    fn pec_known_transaction() {
        // ambient temperature 0x3aeb at 0x5b
        assert_eq!(compute_pec(&[0xb6, 0x26, 0xb7, 0xeb, 0x3a]), 0xbe);
        assert!(verify_pec(&[0xb6, 0x26, 0xb7, 0xeb, 0x3a], 0xbe));
        assert!(!verify_pec(&[0xb6, 0x26, 0xb7, 0xeb, 0x3a], 0xbf));
    }

    #[test]
    fn pec_detects_every_single_bit_flip() {
        let frames: [&[u8]; 3] = [
            &[0xb6, 0x26, 0xb7, 0xeb, 0x3a],
            &[0xb6, 0x13, 0xff, 0xff],
            &[0x00, 0x10, 0x01, 0x5b, 0x35],
        ];
        for frame in frames.iter() {
            let pec = compute_pec(frame);
            assert_eq!(compute_pec(frame), pec);
            assert!(verify_pec(frame, pec));

            let mut corrupted = frame.to_vec();
            for byte in 0..corrupted.len() {
                for bit in 0..8 {
                    corrupted[byte] ^= 1 << bit;
                    assert!(!verify_pec(&corrupted, pec), "flip {}:{} undetected", byte, bit);
                    corrupted[byte] ^= 1 << bit;
                }
            }
        }
    }

    #[test]
    fn read_word_little_endian_with_pec() {
        let mut i2c = I2cMock::new(&[I2cTransaction::write_read(0x5b, vec![0x26], vec![0xeb, 0x3a, 0xbe])]);
        assert_eq!(read_word(&mut i2c, 0x5b, 0x26, true), Ok(0x3aeb));
        i2c.done();
    }

    #[test]
    fn read_word_pec_mismatch() {
        let mut i2c = I2cMock::new(&[I2cTransaction::write_read(0x5b, vec![0x26], vec![0xeb, 0x3a, 0x00])]);
        assert_eq!(
            read_word(&mut i2c, 0x5b, 0x26, true),
            Err(WordError::Pec {
                expected: 0xbe,
                received: 0x00
            })
        );
        i2c.done();
    }

    #[test]
    fn read_word_unchecked_ignores_pec() {
        let mut i2c = I2cMock::new(&[I2cTransaction::write_read(0x5b, vec![0x26], vec![0xeb, 0x3a, 0x00])]);
        assert_eq!(read_word(&mut i2c, 0x5b, 0x26, false), Ok(0x3aeb));
        i2c.done();
    }

    #[test]
    fn read_word_bus_error() {
        let mut i2c = I2cMock::new(&[
            I2cTransaction::write_read(0x5b, vec![0x27], vec![0, 0, 0]).with_error(ErrorKind::Other)
        ]);
        assert_eq!(
            read_word(&mut i2c, 0x5b, 0x27, true),
            Err(WordError::I2c(ErrorKind::Other))
        );
        i2c.done();
    }

    #[test]
    fn write_word_appends_pec() {
        let mut i2c = I2cMock::new(&[
            I2cTransaction::write(0x5b, vec![0x13, 0xff, 0xff, 0xd7]),
            I2cTransaction::write(0x5b, vec![0x13, 0x00, 0x00, 0xf3]),
        ]);
        assert_eq!(write_word(&mut i2c, 0x5b, 0x13, 0xffff), Ok(()));
        assert_eq!(write_word(&mut i2c, 0x5b, 0x13, 0x0000), Ok(()));
        i2c.done();
    }

    #[test]
    fn sleep_command_pec() {
        let mut i2c = I2cMock::new(&[I2cTransaction::write(0x5b, vec![0xc6, 0x6d])]);
        assert_eq!(send_command(&mut i2c, 0x5b, 0xc6), Ok(()));
        i2c.done();
    }
}
