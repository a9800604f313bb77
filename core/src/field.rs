//! Prime-field scalar used for every value the machine computes on.
//!
//! The field is `F_P` with `P = 2^251 + 17*2^192 + 1`, kept in Montgomery
//! form (4 x 64-bit limbs). The backend is swappable; everything outside
//! this module goes through [`Felt`].

use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use ark_ff::fields::{Fp256, MontBackend, MontConfig};
use ark_ff::{Field, PrimeField};
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use thiserror::Error;

#[derive(MontConfig)]
#[modulus = "3618502788666131213697322783095070105623107215331596699973092056135872020481"]
#[generator = "3"]
pub struct FeltConfig;

type Fp = Fp256<MontBackend<FeltConfig, 4>>;

/// An element of `F_P`, always held in canonical form.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Felt(Fp);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeltParseError {
    #[error("invalid hexadecimal field element: {0:?}")]
    Hex(String),
    #[error("invalid decimal field element: {0:?}")]
    Decimal(String),
}

impl Felt {
    pub fn zero() -> Self {
        Self(Fp::zero())
    }

    pub fn one() -> Self {
        Self(Fp::one())
    }

    /// The field modulus as a big unsigned integer.
    pub fn prime() -> BigUint {
        Fp::MODULUS.into()
    }

    /// Parses a hexadecimal string, with or without a `0x` prefix, and
    /// reduces it modulo `P`.
    pub fn from_hex_str(value: &str) -> Result<Self, FeltParseError> {
        let digits = value.strip_prefix("0x").unwrap_or(value);
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Self::from)
            .ok_or_else(|| FeltParseError::Hex(value.to_string()))
    }

    /// Parses a decimal string and reduces it modulo `P`.
    pub fn from_dec_str(value: &str) -> Result<Self, FeltParseError> {
        BigUint::parse_bytes(value.as_bytes(), 10)
            .map(Self::from)
            .ok_or_else(|| FeltParseError::Decimal(value.to_string()))
    }

    /// Canonical `0x`-prefixed lowercase hex representation.
    pub fn to_hex_str(&self) -> String {
        format!("{:#x}", self.to_biguint())
    }

    pub fn to_biguint(&self) -> BigUint {
        self.0.into_bigint().into()
    }

    /// Bit length of the canonical representative: 0 for zero, otherwise
    /// `ceil(log2(n + 1))`.
    pub fn bits(&self) -> u64 {
        self.to_biguint().bits()
    }

    /// Signed view of the element: representatives above `P / 2` map to
    /// the negative range, so the result always satisfies `|x| < P / 2`.
    pub fn to_signed(&self) -> BigInt {
        let value = self.to_biguint();
        if value > (Self::prime() >> 1) {
            BigInt::from(value) - BigInt::from(Self::prime())
        } else {
            BigInt::from(value)
        }
    }

    /// Multiplicative inverse, `None` for zero.
    pub fn inv(&self) -> Option<Self> {
        self.0.inverse().map(Self)
    }

    pub fn to_u64(&self) -> Option<u64> {
        let digits = self.to_biguint().to_u64_digits();
        match digits.len() {
            0 => Some(0),
            1 => Some(digits[0]),
            _ => None,
        }
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.to_u64().and_then(|v| usize::try_from(v).ok())
    }
}

impl Zero for Felt {
    fn zero() -> Self {
        Self(Fp::zero())
    }

    fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl One for Felt {
    fn one() -> Self {
        Self(Fp::one())
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Self(Fp::from(value))
    }
}

impl From<u128> for Felt {
    fn from(value: u128) -> Self {
        Self(Fp::from(value))
    }
}

impl From<usize> for Felt {
    fn from(value: usize) -> Self {
        Self(Fp::from(value as u64))
    }
}

impl From<BigUint> for Felt {
    fn from(value: BigUint) -> Self {
        // Reduce before handing the limbs to the backend so every
        // constructor upholds the canonical-form invariant.
        Self(Fp::from(value % Self::prime()))
    }
}

impl From<Felt> for BigUint {
    fn from(value: Felt) -> Self {
        value.to_biguint()
    }
}

impl Add for Felt {
    type Output = Felt;

    fn add(self, rhs: Felt) -> Felt {
        Felt(self.0 + rhs.0)
    }
}

impl AddAssign for Felt {
    fn add_assign(&mut self, rhs: Felt) {
        self.0 += rhs.0;
    }
}

impl Sub for Felt {
    type Output = Felt;

    fn sub(self, rhs: Felt) -> Felt {
        Felt(self.0 - rhs.0)
    }
}

impl SubAssign for Felt {
    fn sub_assign(&mut self, rhs: Felt) {
        self.0 -= rhs.0;
    }
}

impl Mul for Felt {
    type Output = Felt;

    fn mul(self, rhs: Felt) -> Felt {
        Felt(self.0 * rhs.0)
    }
}

impl MulAssign for Felt {
    fn mul_assign(&mut self, rhs: Felt) {
        self.0 *= rhs.0;
    }
}

impl Neg for Felt {
    type Output = Felt;

    fn neg(self) -> Felt {
        Felt(-self.0)
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_str())
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_str())
    }
}
