//! Resource quantity arithmetic.
//!
//! Just enough of the Kubernetes quantity grammar to scale memory sizes and
//! express CPU shares: a signed decimal number followed by an optional
//! binary (`Ki`..`Ei`), decimal (`m`, `k`..`E`) or exponent (`e3`) suffix.

use crate::error::ControllerError;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Unit a quantity was expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    /// Power of 1024
    Binary(u32),
    /// Power of 10, as written with an SI suffix
    Decimal(i32),
    /// Power of 10, as written with an `e` exponent
    Exponent(i32),
}

impl Suffix {
    fn parse(raw: &str) -> Option<Self> {
        let suffix = match raw {
            "" => Self::Decimal(0),
            "m" => Self::Decimal(-3),
            "k" => Self::Decimal(3),
            "M" => Self::Decimal(6),
            "G" => Self::Decimal(9),
            "T" => Self::Decimal(12),
            "P" => Self::Decimal(15),
            "E" => Self::Decimal(18),
            "Ki" => Self::Binary(1),
            "Mi" => Self::Binary(2),
            "Gi" => Self::Binary(3),
            "Ti" => Self::Binary(4),
            "Pi" => Self::Binary(5),
            "Ei" => Self::Binary(6),
            _ => {
                let exp = raw.strip_prefix(['e', 'E'])?;
                Self::Exponent(exp.parse().ok()?)
            }
        };
        Some(suffix)
    }

    /// Size of one unit, in thousandths of the base unit.
    fn unit_milli(self) -> Option<i128> {
        match self {
            Self::Binary(n) => 1024_i128.checked_pow(n)?.checked_mul(1000),
            Self::Decimal(e) | Self::Exponent(e) => {
                let shifted = e.checked_add(3)?;
                if shifted < 0 {
                    None
                } else {
                    10_i128.checked_pow(u32::try_from(shifted).ok()?)
                }
            }
        }
    }

    fn render(self) -> String {
        match self {
            Self::Binary(n) => ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"]
                .get(n as usize)
                .map_or_else(String::new, |s| (*s).to_string()),
            Self::Decimal(e) => match e {
                -3 => "m".to_string(),
                3 => "k".to_string(),
                6 => "M".to_string(),
                9 => "G".to_string(),
                12 => "T".to_string(),
                15 => "P".to_string(),
                18 => "E".to_string(),
                _ => String::new(),
            },
            Self::Exponent(e) => format!("e{}", e),
        }
    }
}

/// A parsed quantity, held in thousandths of the base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedQuantity {
    milli: i128,
    suffix: Suffix,
}

impl ParsedQuantity {
    /// Parse a Kubernetes quantity string.
    pub fn parse(raw: &str) -> Result<Self, ControllerError> {
        let invalid = || ControllerError::InvalidResource(format!("invalid quantity '{}'", raw));
        let trimmed = raw.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);
        let suffix = Suffix::parse(suffix).ok_or_else(invalid)?;

        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.strip_prefix('+').unwrap_or(number)),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let mantissa: i128 = format!("{}{}", int_part, frac_part)
            .parse()
            .map_err(|_| invalid())?;
        let frac_scale = 10_i128
            .checked_pow(u32::try_from(frac_part.len()).map_err(|_| invalid())?)
            .ok_or_else(invalid)?;

        let milli = match suffix {
            Suffix::Binary(_) => {
                let unit = suffix.unit_milli().ok_or_else(invalid)?;
                div_ceil(mantissa.checked_mul(unit).ok_or_else(invalid)?, frac_scale)
            }
            Suffix::Decimal(e) | Suffix::Exponent(e) => {
                let shift = e + 3;
                if shift >= 0 {
                    let unit = 10_i128
                        .checked_pow(u32::try_from(shift).map_err(|_| invalid())?)
                        .ok_or_else(invalid)?;
                    div_ceil(mantissa.checked_mul(unit).ok_or_else(invalid)?, frac_scale)
                } else {
                    let down = 10_i128
                        .checked_pow(u32::try_from(-shift).map_err(|_| invalid())?)
                        .ok_or_else(invalid)?;
                    div_ceil(mantissa, frac_scale.checked_mul(down).ok_or_else(invalid)?)
                }
            }
        };

        Ok(Self {
            milli: if negative { -milli } else { milli },
            suffix,
        })
    }

    #[cfg(test)]
    fn milli_value(&self) -> i128 {
        self.milli
    }

    #[cfg(test)]
    fn value(&self) -> i128 {
        div_ceil(self.milli, 1000)
    }

    /// Multiply by `numerator / denominator`, rounding up to a whole base unit.
    pub fn scale_whole(&self, numerator: i128, denominator: i128) -> Self {
        let units = div_ceil(self.milli.saturating_mul(numerator), denominator.saturating_mul(1000));
        Self {
            milli: units.saturating_mul(1000),
            suffix: self.suffix,
        }
    }

    /// Render in the original unit when exact, otherwise in base units.
    pub fn to_quantity(&self) -> Quantity {
        if let Some(unit) = self.suffix.unit_milli() {
            if unit > 0 && self.milli % unit == 0 {
                return Quantity(format!("{}{}", self.milli / unit, self.suffix.render()));
            }
        }
        if self.milli % 1000 == 0 {
            Quantity((self.milli / 1000).to_string())
        } else {
            Quantity(format!("{}m", self.milli))
        }
    }
}

fn div_ceil(value: i128, divisor: i128) -> i128 {
    if divisor == 0 {
        return 0;
    }
    let quotient = value / divisor;
    if value % divisor != 0 && (value > 0) == (divisor > 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// A CPU amount expressed in millicores.
pub fn millicores(value: u64) -> Quantity {
    Quantity(format!("{}m", value))
}

/// Scale a memory quantity by `numerator / denominator`, rounding up to a
/// whole byte.
pub fn scale_memory(
    memory: &Quantity,
    numerator: i128,
    denominator: i128,
) -> Result<Quantity, ControllerError> {
    Ok(ParsedQuantity::parse(&memory.0)?
        .scale_whole(numerator, denominator)
        .to_quantity())
}
