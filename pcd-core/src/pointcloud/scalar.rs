use std::fmt;

/// A single numeric value read from a sample, kept in its source width so the
/// text form matches what the producer would print.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Scalar::Bool(true) => f.write_str("True"),
            Scalar::Bool(false) => f.write_str("False"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::UInt(v) => write!(f, "{v}"),
            Scalar::F32(v) => write_float(f, v, v as f64),
            Scalar::F64(v) => write_float(f, v, v),
        }
    }
}

// Shortest round-trip digits; positional inside [1e-4, 1e16), scientific with a
// signed two-digit exponent outside of it.
fn write_float<T>(f: &mut fmt::Formatter<'_>, value: T, magnitude: f64) -> fmt::Result
where
    T: fmt::Display + fmt::LowerExp,
{
    if magnitude.is_nan() {
        return f.write_str("nan");
    }
    if magnitude.is_infinite() {
        return f.write_str(if magnitude > 0.0 { "inf" } else { "-inf" });
    }

    let abs = magnitude.abs();
    if abs == 0.0 || (1e-4..1e16).contains(&abs) {
        let text = value.to_string();
        if text.contains('.') {
            f.write_str(&text)
        } else {
            write!(f, "{text}.0")
        }
    } else {
        let text = format!("{value:e}");
        let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        write!(f, "{mantissa}e{sign}{digits:0>2}")
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::F32(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::F64(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<u8> for Scalar {
    fn from(value: u8) -> Self {
        Scalar::UInt(value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_and_bools() {
        assert_eq!(Scalar::UInt(255).to_string(), "255");
        assert_eq!(Scalar::Int(-3).to_string(), "-3");
        assert_eq!(Scalar::Bool(true).to_string(), "True");
        assert_eq!(Scalar::Bool(false).to_string(), "False");
    }

    #[test]
    fn test_positional_floats() {
        assert_eq!(Scalar::F64(1.0).to_string(), "1.0");
        assert_eq!(Scalar::F64(-2.5).to_string(), "-2.5");
        assert_eq!(Scalar::F64(0.0).to_string(), "0.0");
        assert_eq!(Scalar::F64(-0.0).to_string(), "-0.0");
        assert_eq!(Scalar::F64(0.0001).to_string(), "0.0001");
        assert_eq!(Scalar::F64(1e15).to_string(), "1000000000000000.0");
    }

    #[test]
    fn test_float32_uses_its_own_precision() {
        assert_eq!(Scalar::F32(0.1).to_string(), "0.1");
        assert_eq!(Scalar::F32(0.2).to_string(), "0.2");
        assert_eq!(Scalar::F64(0.1f32 as f64).to_string(), "0.10000000149011612");
    }

    #[test]
    fn test_scientific_floats() {
        assert_eq!(Scalar::F64(1e-5).to_string(), "1e-05");
        assert_eq!(Scalar::F64(1.5e16).to_string(), "1.5e+16");
        assert_eq!(Scalar::F64(-2e-120).to_string(), "-2e-120");
        assert_eq!(Scalar::F32(1e-5).to_string(), "1e-05");
    }

    #[test]
    fn test_non_finite_floats() {
        assert_eq!(Scalar::F64(f64::NAN).to_string(), "nan");
        assert_eq!(Scalar::F32(f32::INFINITY).to_string(), "inf");
        assert_eq!(Scalar::F64(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Scalar::UInt(7).as_f64(), 7.0);
        assert_eq!(Scalar::Bool(true).as_f64(), 1.0);
        assert_eq!(Scalar::F32(0.5).as_f64(), 0.5);
    }
}
