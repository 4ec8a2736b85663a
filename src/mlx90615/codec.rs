//! Conversions between raw register words and physical values.
//!
//! Temperatures are hundredths of a degree Celsius (`i32`), raw words are
//! 0.02 K/LSB, so `centi = raw * 2 - 27315`.

const KELVIN_OFFSET_CENTI: i32 = 27315;

pub const AMBIENT_TEMP_MIN: i32 = -4000;
pub const AMBIENT_TEMP_MAX: i32 = 8500;
pub const OBJECT_TEMP_MIN: i32 = -4000;
pub const OBJECT_TEMP_MAX: i32 = 11500;

pub const EMISSIVITY_MIN: u8 = 5;
pub const EMISSIVITY_MAX: u8 = 100;
/// Raw word for emissivity 1.00.
const EMISSIVITY_FULL_SCALE: u32 = 65535;

pub const I2C_ADDRESS_MIN: u8 = 0x08;
pub const I2C_ADDRESS_MAX: u8 = 0x77;

pub const IIR_FILTER_MIN: u8 = 1;
pub const IIR_FILTER_MAX: u8 = 7;

/// Largest PWM span, the full object temperature range.
pub const PWM_SPAN_MAX: i32 = OBJECT_TEMP_MAX - OBJECT_TEMP_MIN;

/// Why a value was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueError {
    /// Caller supplied a value outside its domain.
    OutOfRange,
    /// The device returned a word that decodes outside its domain.
    InvalidData,
}

/// A bit field inside a 16-bit register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(offset: u8, width: u8) -> Self {
        Field { offset, width }
    }

    #[inline]
    pub const fn mask(&self) -> u16 {
        (((1u32 << self.width) - 1) << self.offset) as u16
    }

    #[inline]
    pub const fn get(&self, word: u16) -> u16 {
        (word & self.mask()) >> self.offset
    }

    /// Replaces the field, leaving every other bit of `word` as is.
    #[inline]
    pub const fn set(&self, word: u16, value: u16) -> u16 {
        (word & !self.mask()) | ((value << self.offset) & self.mask())
    }
}

/// Slave address, low 7 bits of the `PWM_TMIN` word.
pub const ADDRESS_FIELD: Field = Field::new(0, 7);
/// Config bit 0, set means I²C (SMBus) output.
pub const OUTPUT_MODE_FIELD: Field = Field::new(0, 1);
/// Config bit 1, set means fast PWM.
pub const PWM_FREQUENCY_FIELD: Field = Field::new(1, 1);
/// Config bit 2, set means PWM follows ambient temperature.
pub const PWM_SOURCE_FIELD: Field = Field::new(2, 1);
/// Config bits 12..=14.
pub const IIR_FILTER_FIELD: Field = Field::new(12, 3);

/// Output interface selected by the config word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputMode {
    Pwm,
    /// Factory default.
    I2c,
}

/// PWM period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmFrequency {
    Slow,
    Fast,
}

/// Temperature the PWM duty cycle encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmSource {
    Object,
    Ambient,
}

macro_rules! bit_enum {
    ($ty:ident, $clear:ident, $set:ident) => {
        impl $ty {
            pub fn from_bit(bit: u16) -> Self {
                if bit == 0 {
                    $ty::$clear
                } else {
                    $ty::$set
                }
            }

            pub fn bit(self) -> u16 {
                match self {
                    $ty::$clear => 0,
                    $ty::$set => 1,
                }
            }
        }
    };
}

bit_enum!(OutputMode, Pwm, I2c);
bit_enum!(PwmFrequency, Slow, Fast);
bit_enum!(PwmSource, Object, Ambient);

#[inline]
fn raw_to_centi(raw: u16) -> i32 {
    raw as i32 * 2 - KELVIN_OFFSET_CENTI
}

/// Rounds half up onto the 0.02 K grid.
fn centi_to_raw(centi: i32) -> Result<u16, ValueError> {
    let kelvin_centi = centi + KELVIN_OFFSET_CENTI;
    if kelvin_centi < 0 {
        return Err(ValueError::OutOfRange);
    }
    let raw = (kelvin_centi + 1) / 2;
    if raw > u16::MAX as i32 {
        return Err(ValueError::OutOfRange);
    }
    Ok(raw as u16)
}

fn decode_temperature(raw: u16, min: i32, max: i32) -> Result<i32, ValueError> {
    let centi = raw_to_centi(raw);
    if centi < min || centi > max {
        return Err(ValueError::InvalidData);
    }
    Ok(centi)
}

/// Ambient (die) temperature, `RAM 0x26`.
pub fn decode_ambient_temperature(raw: u16) -> Result<i32, ValueError> {
    decode_temperature(raw, AMBIENT_TEMP_MIN, AMBIENT_TEMP_MAX)
}

/// Object temperature, `RAM 0x27`.
pub fn decode_object_temperature(raw: u16) -> Result<i32, ValueError> {
    decode_temperature(raw, OBJECT_TEMP_MIN, OBJECT_TEMP_MAX)
}

/// Emissivity in hundredths (5..=100) to its EEPROM word.
pub fn encode_emissivity(value: u8) -> Result<u16, ValueError> {
    if value < EMISSIVITY_MIN || value > EMISSIVITY_MAX {
        return Err(ValueError::OutOfRange);
    }
    let raw = (value as u32 * EMISSIVITY_FULL_SCALE + 50) / 100;
    Ok(raw as u16)
}

/// Inverse of [`encode_emissivity`], exact for every word it produces.
pub fn decode_emissivity(raw: u16) -> Result<u8, ValueError> {
    let value = (raw as u32 * 100 + EMISSIVITY_FULL_SCALE / 2) / EMISSIVITY_FULL_SCALE;
    if value < EMISSIVITY_MIN as u32 || value > EMISSIVITY_MAX as u32 {
        return Err(ValueError::InvalidData);
    }
    Ok(value as u8)
}

pub fn validate_i2c_address(address: u8) -> Result<u8, ValueError> {
    if address < I2C_ADDRESS_MIN || address > I2C_ADDRESS_MAX {
        return Err(ValueError::OutOfRange);
    }
    Ok(address)
}

pub fn decode_i2c_address(word: u16) -> u8 {
    ADDRESS_FIELD.get(word) as u8
}

/// Puts a new slave address into the current `PWM_TMIN` word.
pub fn encode_i2c_address(word: u16, address: u8) -> Result<u16, ValueError> {
    let address = validate_i2c_address(address)?;
    Ok(ADDRESS_FIELD.set(word, address as u16))
}

pub fn decode_iir_filter(word: u16) -> Result<u8, ValueError> {
    match IIR_FILTER_FIELD.get(word) as u8 {
        0 => Err(ValueError::InvalidData),
        iir => Ok(iir),
    }
}

pub fn encode_iir_filter(word: u16, iir: u8) -> Result<u16, ValueError> {
    if iir < IIR_FILTER_MIN || iir > IIR_FILTER_MAX {
        return Err(ValueError::OutOfRange);
    }
    Ok(IIR_FILTER_FIELD.set(word, iir as u16))
}

/// PWM Tmin, an absolute temperature.
pub fn decode_pwm_tmin(raw: u16) -> i32 {
    raw_to_centi(raw)
}

/// New Tmin word; the address bits of `word` win over those of the temperature.
pub fn encode_pwm_tmin(word: u16, centi: i32) -> Result<u16, ValueError> {
    if centi < OBJECT_TEMP_MIN || centi > OBJECT_TEMP_MAX {
        return Err(ValueError::OutOfRange);
    }
    let raw = centi_to_raw(centi)?;
    Ok(ADDRESS_FIELD.set(raw, ADDRESS_FIELD.get(word)))
}

/// PWM Trange, a temperature span in hundredths of a kelvin.
pub fn decode_pwm_trange(raw: u16) -> i32 {
    raw as i32 * 2
}

pub fn encode_pwm_trange(span: i32) -> Result<u16, ValueError> {
    if span <= 0 || span > PWM_SPAN_MAX {
        return Err(ValueError::OutOfRange);
    }
    Ok(((span + 1) / 2) as u16)
}
