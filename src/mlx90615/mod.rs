//! MLX90615 infrared thermometer, SMBus interface.
//!
//! - Output: object and ambient temperature, hundredths of °C
//! - Resolution: 0.02 °C
//! - Address(7bit): 0x5B by default, 0x00 reaches any device on the bus
//!
//! Every transaction carries a PEC byte. EEPROM settings go through the
//! erase/write/verify sequence in [`eeprom`], which blocks for the
//! configured write time twice per word.
//!
//! Field setters read the register, change their bits and write the whole
//! word back. That is not atomic on the bus: share the bus between threads
//! or masters only behind your own lock.

use embedded_hal_1::{delay::DelayNs, i2c::I2c};

use crate::smbus::{self, WordError};

pub mod codec;
pub mod eeprom;

pub use codec::{OutputMode, PwmFrequency, PwmSource, ValueError};
pub use eeprom::{EepromState, EepromWrite, EepromWriter};

use codec::{OUTPUT_MODE_FIELD, PWM_FREQUENCY_FIELD, PWM_SOURCE_FIELD};

/// Factory slave address.
pub const DEFAULT_ADDRESS: u8 = 0x5B;
/// Address every MLX90615 answers to, required to change the slave address.
pub const GENERIC_ADDRESS: u8 = 0x00;
/// Erase and write time of one EEPROM cell.
pub const EEPROM_DEFAULT_TIME_MS: u32 = 50;

pub const REG_PWM_TMIN: u8 = 0x10; // EEPROM  PWM Tmin, low 7 bits are the slave address
pub const REG_SLAVE_ADDRESS: u8 = 0x10; // EEPROM  shares the word with PWM Tmin
pub const REG_PWM_TRANGE: u8 = 0x11; // EEPROM
pub const REG_CONFIG: u8 = 0x12; // EEPROM
pub const REG_EMISSIVITY: u8 = 0x13; // EEPROM
pub const REG_ID_LOW: u8 = 0x1E; // EEPROM  R
pub const REG_ID_HIGH: u8 = 0x1F; // EEPROM  R
pub const REG_RAW_IR_DATA: u8 = 0x25; // RAM  R
pub const REG_AMBIENT_TEMP: u8 = 0x26; // RAM  R
pub const REG_OBJECT_TEMP: u8 = 0x27; // RAM  R

const CMD_SLEEP: u8 = 0xC6;

const EEPROM_START: u8 = 0x10;
const EEPROM_END: u8 = 0x1F;
const RAM_START: u8 = 0x25;
const RAM_END: u8 = 0x27;
pub const EEPROM_WORDS: usize = (EEPROM_END - EEPROM_START + 1) as usize;

/// Memory block a command byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterKind {
    /// Persistent, erase before write.
    Eeprom,
    /// Volatile sensor output.
    Ram,
}

impl RegisterKind {
    pub fn of(register: u8) -> Option<Self> {
        match register {
            EEPROM_START..=EEPROM_END => Some(RegisterKind::Eeprom),
            RAM_START..=RAM_END => Some(RegisterKind::Ram),
            _ => None,
        }
    }
}

/// MLX90615 errors
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// I²C bus error
    I2c(E),
    /// PEC sent by the device doesn't match the transaction
    Pec { register: u8, expected: u8, received: u8 },
    /// Command byte is neither EEPROM nor RAM
    InvalidRegister(u8),
    /// Argument outside its valid range, nothing was sent
    OutOfRange,
    /// Register word decodes outside its physical range
    InvalidData,
    /// Read back after an EEPROM write differs from what was written
    EepromVerify { register: u8, expected: u16, read: u16 },
    /// PEC failure on the read back after an EEPROM write. The new word was
    /// already written, its content is unconfirmed.
    EepromUnverified { register: u8, expected: u8, received: u8 },
    /// Bus error in the middle of an EEPROM write, `state` is where it stopped.
    /// The cell content is unknown.
    EepromAborted { register: u8, state: EepromState, error: E },
    /// Operation not allowed in the current setup, nothing was sent
    Precondition,
}

impl<E> From<ValueError> for Error<E> {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::OutOfRange => Error::OutOfRange,
            ValueError::InvalidData => Error::InvalidData,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Wait after EEPROM erase and after EEPROM write.
    pub eeprom_write_time_ms: u32,
    /// Check the PEC of every word read.
    pub check_pec: bool,
    /// Read every EEPROM word back after writing it.
    pub verify_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eeprom_write_time_ms: EEPROM_DEFAULT_TIME_MS,
            check_pec: true,
            verify_writes: true,
        }
    }
}

/// MLX90615 on an I²C (SMBus) bus.
pub struct MLX90615<I2C> {
    i2c: I2C,
    address: u8,
    config: Config,
}

impl<I2C> MLX90615<I2C>
where
    I2C: I2c,
{
    /// Create device driver instance with the default config.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self::with_config(i2c, address, Config::default())
    }

    /// Create device driver instance with an explicit config.
    pub fn with_config(i2c: I2C, address: u8, config: Config) -> Self {
        MLX90615 { i2c, address, config }
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Bus address this driver talks to.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Object temperature in hundredths of °C, e.g. `3647` for 36.47 °C.
    pub fn read_object_temp(&mut self) -> Result<i32, Error<I2C::Error>> {
        let raw = self.read_word(REG_OBJECT_TEMP)?;
        Ok(codec::decode_object_temperature(raw)?)
    }

    /// Ambient (sensor die) temperature in hundredths of °C.
    pub fn read_ambient_temp(&mut self) -> Result<i32, Error<I2C::Error>> {
        let raw = self.read_word(REG_AMBIENT_TEMP)?;
        Ok(codec::decode_ambient_temperature(raw)?)
    }

    #[inline]
    pub fn read_raw_ir_data(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_word(REG_RAW_IR_DATA)
    }

    /// 32-bit factory ID.
    pub fn read_id(&mut self) -> Result<u32, Error<I2C::Error>> {
        let low = self.read_word(REG_ID_LOW)? as u32;
        let high = self.read_word(REG_ID_HIGH)? as u32;
        Ok(low | (high << 16))
    }

    /// The whole EEPROM, `0x10..=0x1F`.
    pub fn read_eeprom(&mut self) -> Result<[u16; EEPROM_WORDS], Error<I2C::Error>> {
        let mut words = [0u16; EEPROM_WORDS];
        for (register, word) in (EEPROM_START..=EEPROM_END).zip(words.iter_mut()) {
            *word = self.read_word(register)?;
        }
        Ok(words)
    }

    /// Reads any EEPROM or RAM register.
    pub fn read16(&mut self, register: u8) -> Result<u16, Error<I2C::Error>> {
        RegisterKind::of(register).ok_or(Error::InvalidRegister(register))?;
        self.read_word(register)
    }

    /// Writes any EEPROM or RAM register. EEPROM words are erased first.
    ///
    /// Nothing is refused inside the two blocks: writing `REG_ID_LOW` or
    /// `REG_ID_HIGH` erases the factory ID for good, and the RAM outputs
    /// (`0x25..=0x27`) are read-only on the device, so such writes are
    /// ignored by it or overwritten by the next measurement.
    pub fn write16<D: DelayNs>(&mut self, register: u8, value: u16, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        match RegisterKind::of(register) {
            Some(RegisterKind::Eeprom) => self.write_eeprom(register, None, value, delay),
            Some(RegisterKind::Ram) => smbus::write_word(&mut self.i2c, self.address, register, value).map_err(Error::I2c),
            None => Err(Error::InvalidRegister(register)),
        }
    }

    /// Emissivity in hundredths, 5..=100.
    pub fn read_emissivity(&mut self) -> Result<u8, Error<I2C::Error>> {
        let raw = self.read_word(REG_EMISSIVITY)?;
        Ok(codec::decode_emissivity(raw)?)
    }

    pub fn set_emissivity<D: DelayNs>(&mut self, value: u8, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        let raw = codec::encode_emissivity(value)?;
        self.write_eeprom(REG_EMISSIVITY, None, raw, delay)
    }

    /// Slave address stored in EEPROM.
    pub fn read_i2c_address(&mut self) -> Result<u8, Error<I2C::Error>> {
        let word = self.read_word(REG_SLAVE_ADDRESS)?;
        Ok(codec::decode_i2c_address(word))
    }

    /// Stores a new slave address, effective after the next power cycle.
    ///
    /// Only allowed through [`GENERIC_ADDRESS`] with a single device on the
    /// bus, so the device being reprogrammed is never the one the driver
    /// loses track of mid-sequence.
    pub fn set_i2c_address<D: DelayNs>(&mut self, address: u8, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        codec::validate_i2c_address(address)?;
        if self.address != GENERIC_ADDRESS {
            return Err(Error::Precondition);
        }
        let word = self.read_word(REG_SLAVE_ADDRESS)?;
        let new = codec::encode_i2c_address(word, address)?;
        self.write_eeprom(REG_SLAVE_ADDRESS, Some(word), new, delay)
    }

    /// Raw PWM Tmin word, 0.02 K/LSB; low 7 bits are the slave address.
    pub fn read_pwm_tmin(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_word(REG_PWM_TMIN)
    }

    /// Writes the Tmin bits of `raw`, keeping the stored slave address.
    pub fn set_pwm_tmin<D: DelayNs>(&mut self, raw: u16, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        let word = self.read_word(REG_PWM_TMIN)?;
        let new = codec::ADDRESS_FIELD.set(raw, codec::ADDRESS_FIELD.get(word));
        self.write_eeprom(REG_PWM_TMIN, Some(word), new, delay)
    }

    /// PWM Tmin in hundredths of °C.
    pub fn read_pwm_tmin_temp(&mut self) -> Result<i32, Error<I2C::Error>> {
        Ok(codec::decode_pwm_tmin(self.read_pwm_tmin()?))
    }

    pub fn set_pwm_tmin_temp<D: DelayNs>(&mut self, centi: i32, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        codec::encode_pwm_tmin(0, centi)?;
        let word = self.read_word(REG_PWM_TMIN)?;
        let new = codec::encode_pwm_tmin(word, centi)?;
        self.write_eeprom(REG_PWM_TMIN, Some(word), new, delay)
    }

    /// Raw PWM Trange word, 0.02 K/LSB.
    pub fn read_pwm_trange(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_word(REG_PWM_TRANGE)
    }

    pub fn set_pwm_trange<D: DelayNs>(&mut self, raw: u16, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        self.write_eeprom(REG_PWM_TRANGE, None, raw, delay)
    }

    /// PWM span in hundredths of a kelvin.
    pub fn read_pwm_trange_span(&mut self) -> Result<i32, Error<I2C::Error>> {
        Ok(codec::decode_pwm_trange(self.read_pwm_trange()?))
    }

    pub fn set_pwm_trange_span<D: DelayNs>(&mut self, span: i32, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        let raw = codec::encode_pwm_trange(span)?;
        self.write_eeprom(REG_PWM_TRANGE, None, raw, delay)
    }

    pub fn read_output_mode(&mut self) -> Result<OutputMode, Error<I2C::Error>> {
        let config = self.read_word(REG_CONFIG)?;
        Ok(OutputMode::from_bit(OUTPUT_MODE_FIELD.get(config)))
    }

    /// Switching to PWM takes effect after a power cycle, I²C access then
    /// needs the SCL-low request first.
    pub fn set_output_mode<D: DelayNs>(&mut self, mode: OutputMode, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        self.update_config(|config| Ok(OUTPUT_MODE_FIELD.set(config, mode.bit())), delay)
    }

    pub fn read_pwm_frequency(&mut self) -> Result<PwmFrequency, Error<I2C::Error>> {
        let config = self.read_word(REG_CONFIG)?;
        Ok(PwmFrequency::from_bit(PWM_FREQUENCY_FIELD.get(config)))
    }

    pub fn set_pwm_frequency<D: DelayNs>(
        &mut self,
        frequency: PwmFrequency,
        delay: &mut D,
    ) -> Result<(), Error<I2C::Error>> {
        self.update_config(|config| Ok(PWM_FREQUENCY_FIELD.set(config, frequency.bit())), delay)
    }

    pub fn read_pwm_source(&mut self) -> Result<PwmSource, Error<I2C::Error>> {
        let config = self.read_word(REG_CONFIG)?;
        Ok(PwmSource::from_bit(PWM_SOURCE_FIELD.get(config)))
    }

    pub fn set_pwm_source<D: DelayNs>(&mut self, source: PwmSource, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        self.update_config(|config| Ok(PWM_SOURCE_FIELD.set(config, source.bit())), delay)
    }

    /// IIR filter setting, 1..=7.
    pub fn read_iir_filter(&mut self) -> Result<u8, Error<I2C::Error>> {
        let config = self.read_word(REG_CONFIG)?;
        Ok(codec::decode_iir_filter(config)?)
    }

    pub fn set_iir_filter<D: DelayNs>(&mut self, iir: u8, delay: &mut D) -> Result<(), Error<I2C::Error>> {
        codec::encode_iir_filter(0, iir)?;
        self.update_config(|config| codec::encode_iir_filter(config, iir), delay)
    }

    /// Puts the device to sleep. Waking it means holding SCL low, which is
    /// up to the caller's pin driver.
    pub fn sleep(&mut self) -> Result<(), Error<I2C::Error>> {
        smbus::send_command(&mut self.i2c, self.address, CMD_SLEEP).map_err(Error::I2c)
    }

    fn update_config<D, F>(&mut self, f: F, delay: &mut D) -> Result<(), Error<I2C::Error>>
    where
        D: DelayNs,
        F: FnOnce(u16) -> Result<u16, ValueError>,
    {
        let config = self.read_word(REG_CONFIG)?;
        let new = f(config)?;
        self.write_eeprom(REG_CONFIG, Some(config), new, delay)
    }

    fn write_eeprom<D: DelayNs>(
        &mut self,
        register: u8,
        previous: Option<u16>,
        value: u16,
        delay: &mut D,
    ) -> Result<(), Error<I2C::Error>> {
        let request = EepromWrite {
            register,
            previous,
            value,
            delay_ms: self.config.eeprom_write_time_ms,
            verify: self.config.verify_writes,
        };
        EepromWriter::new(&mut self.i2c, self.address, self.config.check_pec, request).run(delay)
    }

    fn read_word(&mut self, register: u8) -> Result<u16, Error<I2C::Error>> {
        smbus::read_word(&mut self.i2c, self.address, register, self.config.check_pec).map_err(|err| match err {
            WordError::I2c(e) => Error::I2c(e),
            WordError::Pec { expected, received } => Error::Pec {
                register,
                expected,
                received,
            },
        })
    }
}
