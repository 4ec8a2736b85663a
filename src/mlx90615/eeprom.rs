//! Erase-before-write EEPROM programming.
//!
//! A cell must be zeroed and given time to settle before a new word is
//! latched, otherwise the stored value is undefined. The sequence is:
//!
//! ```text
//! Idle -> Erasing -> AwaitEraseDelay -> Writing -> AwaitWriteDelay -> [Verifying] -> Done
//! ```
//!
//! Any failure stops the sequence where it is and leaves the cell content
//! indeterminate. Nothing is retried here.

use embedded_hal_1::{delay::DelayNs, i2c::I2c};

use super::Error;
use crate::smbus::{self, WordError};

/// Position of an EEPROM write sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromState {
    Idle,
    /// Zero word sent.
    Erasing,
    AwaitEraseDelay,
    /// New word sent.
    Writing,
    AwaitWriteDelay,
    /// Read back matched.
    Verifying,
    Done,
    /// Aborted, cell content unknown.
    Failed,
}

/// One EEPROM word update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EepromWrite {
    pub register: u8,
    /// Word the new value was derived from, when read-modify-write was used.
    /// Informational only, the erase step always writes zero.
    pub previous: Option<u16>,
    pub value: u16,
    /// Wait after each of erase and write.
    pub delay_ms: u32,
    pub verify: bool,
}

/// Drives one [`EepromWrite`] through its states on a borrowed bus.
pub struct EepromWriter<'a, I2C> {
    i2c: &'a mut I2C,
    address: u8,
    check_pec: bool,
    request: EepromWrite,
    state: EepromState,
}

impl<'a, I2C> EepromWriter<'a, I2C>
where
    I2C: I2c,
{
    pub fn new(i2c: &'a mut I2C, address: u8, check_pec: bool, request: EepromWrite) -> Self {
        EepromWriter {
            i2c,
            address,
            check_pec,
            request,
            state: EepromState::Idle,
        }
    }

    pub fn state(&self) -> EepromState {
        self.state
    }

    /// Performs the action of the next state and moves into it.
    ///
    /// Terminal states are left as they are.
    pub fn step<D: DelayNs>(&mut self, delay: &mut D) -> Result<EepromState, Error<I2C::Error>> {
        let next = match self.state {
            EepromState::Idle => {
                self.write(EepromState::Erasing, 0x0000)?;
                EepromState::Erasing
            }
            EepromState::Erasing => {
                delay.delay_ms(self.request.delay_ms);
                EepromState::AwaitEraseDelay
            }
            EepromState::AwaitEraseDelay => {
                self.write(EepromState::Writing, self.request.value)?;
                EepromState::Writing
            }
            EepromState::Writing => {
                delay.delay_ms(self.request.delay_ms);
                EepromState::AwaitWriteDelay
            }
            EepromState::AwaitWriteDelay if self.request.verify => {
                self.verify()?;
                EepromState::Verifying
            }
            EepromState::AwaitWriteDelay | EepromState::Verifying => EepromState::Done,
            EepromState::Done | EepromState::Failed => return Ok(self.state),
        };

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "eeprom {:#x}: {} -> {}",
            self.request.register,
            self.state,
            next
        );
        self.state = next;
        Ok(next)
    }

    /// Steps until `Done` or the first error.
    pub fn run<D: DelayNs>(mut self, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        loop {
            if self.step(delay)? == EepromState::Done {
                return Ok(());
            }
        }
    }

    fn write(&mut self, state: EepromState, value: u16) -> Result<(), Error<I2C::Error>> {
        let register = self.request.register;
        match smbus::write_word(&mut *self.i2c, self.address, register, value) {
            Ok(()) => Ok(()),
            Err(error) => Err(self.fail(state, Error::EepromAborted { register, state, error })),
        }
    }

    fn verify(&mut self) -> Result<(), Error<I2C::Error>> {
        let register = self.request.register;
        let expected = self.request.value;
        let read = match smbus::read_word(&mut *self.i2c, self.address, register, self.check_pec) {
            Ok(read) => read,
            Err(WordError::I2c(error)) => {
                return Err(self.fail(
                    EepromState::Verifying,
                    Error::EepromAborted {
                        register,
                        state: EepromState::Verifying,
                        error,
                    },
                ))
            }
            Err(WordError::Pec { expected, received }) => {
                return Err(self.fail(
                    EepromState::Verifying,
                    Error::EepromUnverified {
                        register,
                        expected,
                        received,
                    },
                ))
            }
        };

        if read != expected {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "eeprom {:#x}: wrote {:#x}, read back {:#x}",
                register,
                expected,
                read
            );
            return Err(self.fail(
                EepromState::Verifying,
                Error::EepromVerify {
                    register,
                    expected,
                    read,
                },
            ));
        }
        Ok(())
    }

    fn fail(&mut self, state: EepromState, error: Error<I2C::Error>) -> Error<I2C::Error> {
        #[cfg(feature = "defmt")]
        defmt::warn!("eeprom {:#x}: aborted in {}", self.request.register, state);
        #[cfg(not(feature = "defmt"))]
        let _ = state;
        self.state = EepromState::Failed;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlx90615::tests::{read_tx, write_tx, RecordingDelay};
    use embedded_hal_1::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use std::vec;

    const ADDR: u8 = 0x5b;

    fn emissivity_write(verify: bool) -> EepromWrite {
        EepromWrite {
            register: 0x13,
            previous: None,
            value: 0x8000,
            delay_ms: 50,
            verify,
        }
    }

    #[test]
    fn erase_write_verify_sequence() {
        let mut i2c = I2cMock::new(&[
            write_tx(ADDR, 0x13, 0x0000),
            write_tx(ADDR, 0x13, 0x8000),
            read_tx(ADDR, 0x13, 0x8000),
        ]);
        let mut delay = RecordingDelay::default();

        let mut writer = EepromWriter::new(&mut i2c, ADDR, true, emissivity_write(true));
        assert_eq!(writer.state(), EepromState::Idle);
        assert_eq!(writer.step(&mut delay), Ok(EepromState::Erasing));
        assert_eq!(writer.step(&mut delay), Ok(EepromState::AwaitEraseDelay));
        assert_eq!(delay.delays_ms, vec![50]);
        assert_eq!(writer.step(&mut delay), Ok(EepromState::Writing));
        assert_eq!(writer.step(&mut delay), Ok(EepromState::AwaitWriteDelay));
        assert_eq!(delay.delays_ms, vec![50, 50]);
        assert_eq!(writer.step(&mut delay), Ok(EepromState::Verifying));
        assert_eq!(writer.step(&mut delay), Ok(EepromState::Done));
        assert_eq!(writer.step(&mut delay), Ok(EepromState::Done));

        i2c.done();
    }

    #[test]
    fn without_verify_no_readback() {
        let mut i2c = I2cMock::new(&[write_tx(ADDR, 0x13, 0x0000), write_tx(ADDR, 0x13, 0x8000)]);
        let mut delay = RecordingDelay::default();

        let writer = EepromWriter::new(&mut i2c, ADDR, true, emissivity_write(false));
        assert_eq!(writer.run(&mut delay), Ok(()));
        assert_eq!(delay.delays_ms, vec![50, 50]);

        i2c.done();
    }

    #[test]
    fn delay_is_configurable() {
        let mut i2c = I2cMock::new(&[write_tx(ADDR, 0x13, 0x0000), write_tx(ADDR, 0x13, 0x8000)]);
        let mut delay = RecordingDelay::default();

        let request = EepromWrite {
            delay_ms: 10,
            ..emissivity_write(false)
        };
        assert_eq!(EepromWriter::new(&mut i2c, ADDR, true, request).run(&mut delay), Ok(()));
        assert_eq!(delay.delays_ms, vec![10, 10]);

        i2c.done();
    }

    #[test]
    fn erase_failure_stops_sequence() {
        let mut i2c = I2cMock::new(&[
            I2cTransaction::write(ADDR, vec![0x13, 0x00, 0x00, 0xf3]).with_error(ErrorKind::Other)
        ]);
        let mut delay = RecordingDelay::default();

        let mut writer = EepromWriter::new(&mut i2c, ADDR, true, emissivity_write(true));
        assert_eq!(
            writer.step(&mut delay),
            Err(Error::EepromAborted {
                register: 0x13,
                state: EepromState::Erasing,
                error: ErrorKind::Other,
            })
        );
        assert_eq!(writer.state(), EepromState::Failed);
        // stays failed, no more bus traffic
        assert_eq!(writer.step(&mut delay), Ok(EepromState::Failed));
        assert!(delay.delays_ms.is_empty());

        i2c.done();
    }

    #[test]
    fn write_failure_reports_state() {
        let mut i2c = I2cMock::new(&[
            write_tx(ADDR, 0x13, 0x0000),
            write_tx(ADDR, 0x13, 0x8000).with_error(ErrorKind::NoAcknowledge(
                embedded_hal_1::i2c::NoAcknowledgeSource::Data,
            )),
        ]);
        let mut delay = RecordingDelay::default();

        let writer = EepromWriter::new(&mut i2c, ADDR, true, emissivity_write(true));
        assert_eq!(
            writer.run(&mut delay),
            Err(Error::EepromAborted {
                register: 0x13,
                state: EepromState::Writing,
                error: ErrorKind::NoAcknowledge(embedded_hal_1::i2c::NoAcknowledgeSource::Data),
            })
        );
        assert_eq!(delay.delays_ms, vec![50]);

        i2c.done();
    }

    #[test]
    fn verify_read_failure_reports_state() {
        let mut i2c = I2cMock::new(&[
            write_tx(ADDR, 0x13, 0x0000),
            write_tx(ADDR, 0x13, 0x8000),
            I2cTransaction::write_read(ADDR, vec![0x13], vec![0, 0, 0]).with_error(ErrorKind::Other),
        ]);
        let mut delay = RecordingDelay::default();

        let mut writer = EepromWriter::new(&mut i2c, ADDR, true, emissivity_write(true));
        for _ in 0..4 {
            assert!(writer.step(&mut delay).is_ok());
        }
        assert_eq!(writer.state(), EepromState::AwaitWriteDelay);
        assert_eq!(
            writer.step(&mut delay),
            Err(Error::EepromAborted {
                register: 0x13,
                state: EepromState::Verifying,
                error: ErrorKind::Other,
            })
        );
        assert_eq!(writer.state(), EepromState::Failed);
        assert_eq!(delay.delays_ms, vec![50, 50]);

        i2c.done();
    }

    #[test]
    fn verify_mismatch() {
        let mut i2c = I2cMock::new(&[
            write_tx(ADDR, 0x13, 0x0000),
            write_tx(ADDR, 0x13, 0x8000),
            read_tx(ADDR, 0x13, 0x8001),
        ]);
        let mut delay = RecordingDelay::default();

        let writer = EepromWriter::new(&mut i2c, ADDR, true, emissivity_write(true));
        assert_eq!(
            writer.run(&mut delay),
            Err(Error::EepromVerify {
                register: 0x13,
                expected: 0x8000,
                read: 0x8001,
            })
        );

        i2c.done();
    }

    #[test]
    fn verify_pec_mismatch() {
        let mut i2c = I2cMock::new(&[
            write_tx(ADDR, 0x13, 0x0000),
            write_tx(ADDR, 0x13, 0xffff),
            I2cTransaction::write_read(ADDR, vec![0x13], vec![0xff, 0xff, 0x00]),
        ]);
        let mut delay = RecordingDelay::default();

        let request = EepromWrite {
            value: 0xffff,
            ..emissivity_write(true)
        };
        assert_eq!(
            EepromWriter::new(&mut i2c, ADDR, true, request).run(&mut delay),
            Err(Error::EepromUnverified {
                register: 0x13,
                expected: 0x0f,
                received: 0x00,
            })
        );

        i2c.done();
    }
}
