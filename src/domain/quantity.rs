use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A resource amount with **milli precision**, mirroring the quantity notation used by
/// cluster orchestrators (`500m`, `2`, `1536Mi`, `4G`).
///
/// Internally the value is a single `i64` counting thousandths of the base unit, so
/// `Quantity::from_units(1)` and `Quantity::parse("1000m")` are equal. All admission
/// arithmetic (quota sums, borrowing headroom, usage accounting) happens on this integer
/// representation, which keeps comparisons exact and ordering total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity {
    millis: i64,
}

/// Binary suffixes scale by powers of 1024, decimal suffixes by powers of 1000.
const BINARY_SUFFIXES: [(&str, i64); 5] =
    [("Pi", 1 << 50), ("Ti", 1 << 40), ("Gi", 1 << 30), ("Mi", 1 << 20), ("Ki", 1 << 10)];
const DECIMAL_SUFFIXES: [(&str, i64); 5] =
    [("P", 1_000_000_000_000_000), ("T", 1_000_000_000_000), ("G", 1_000_000_000), ("M", 1_000_000), ("k", 1_000)];

impl Quantity {
    pub const ZERO: Quantity = Quantity { millis: 0 };

    pub fn from_millis(millis: i64) -> Self {
        Quantity { millis }
    }

    pub fn from_units(units: i64) -> Self {
        Quantity { millis: units * 1000 }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Parses the textual quantity notation.
    ///
    /// Accepted forms are a plain integer (`"4"`), a decimal (`"2.5"`), the milli
    /// suffix (`"500m"`), binary suffixes (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`) and decimal
    /// suffixes (`k`, `M`, `G`, `T`, `P`).
    ///
    /// # Returns
    /// Returns `Error::InvalidQuantity` if the input is empty, carries an unknown
    /// suffix, or does not survive milli-precision conversion without overflow.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidQuantity(input.to_string()));
        }

        if let Some(number) = trimmed.strip_suffix('m') {
            let millis = number.parse::<i64>().map_err(|_| Error::InvalidQuantity(input.to_string()))?;
            return Ok(Quantity { millis });
        }

        for (suffix, factor) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES.iter()) {
            if let Some(number) = trimmed.strip_suffix(suffix) {
                let units = number.parse::<i64>().map_err(|_| Error::InvalidQuantity(input.to_string()))?;
                let millis = units
                    .checked_mul(*factor)
                    .and_then(|scaled| scaled.checked_mul(1000))
                    .ok_or_else(|| Error::InvalidQuantity(input.to_string()))?;
                return Ok(Quantity { millis });
            }
        }

        if let Ok(units) = trimmed.parse::<i64>() {
            let millis = units.checked_mul(1000).ok_or_else(|| Error::InvalidQuantity(input.to_string()))?;
            return Ok(Quantity { millis });
        }

        // Decimal fractions are rounded toward zero at milli precision.
        let value = trimmed.parse::<f64>().map_err(|_| Error::InvalidQuantity(input.to_string()))?;
        if !value.is_finite() {
            return Err(Error::InvalidQuantity(input.to_string()));
        }
        Ok(Quantity { millis: (value * 1000.0) as i64 })
    }

    /// Multiplies the per-pod amount by a pod count.
    pub fn scale(&self, count: u32) -> Quantity {
        Quantity { millis: self.millis.saturating_mul(count as i64) }
    }

    /// Subtraction that clamps at zero, used for free-capacity math where an
    /// over-committed queue simply has nothing left to give.
    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        Quantity { millis: (self.millis - other.millis).max(0) }
    }

    pub fn saturating_add(&self, other: Quantity) -> Quantity {
        Quantity { millis: self.millis.saturating_add(other.millis) }
    }

    pub fn min(self, other: Quantity) -> Quantity {
        if self.millis <= other.millis { self } else { other }
    }

    /// Renders the smallest faithful textual form: whole units where the value is an
    /// exact multiple of 1000 millis (with a binary suffix where one divides evenly),
    /// the `m` notation otherwise.
    fn render(&self) -> String {
        if self.millis % 1000 != 0 {
            return format!("{}m", self.millis);
        }

        let units = self.millis / 1000;
        for (suffix, factor) in BINARY_SUFFIXES.iter() {
            if units != 0 && units % factor == 0 {
                return format!("{}{}", units / factor, suffix);
            }
        }

        return units.to_string();
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Quantity::parse(s)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity { millis: self.millis + rhs.millis }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.millis += rhs.millis;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity { millis: self.millis - rhs.millis }
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        self.millis -= rhs.millis;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a quantity string like \"500m\" or \"2Gi\", or an integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
        Quantity::parse(v).map_err(|e| E::custom(e.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
        Ok(Quantity::from_units(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
        Ok(Quantity::from_units(v as i64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Quantity, E> {
        Ok(Quantity::from_millis((v * 1000.0) as i64))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Quantity, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}
