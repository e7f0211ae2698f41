use alloy_primitives::{Address, U256};
use ark_ff::{BigInt, PrimeField};
use thiserror::Error;

use crate::Field;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("Value {0} is not below the BN254 scalar modulus")]
    OutOfRange(U256),

    #[error("Invalid field element encoding: {0}")]
    InvalidEncoding(String),
}

/// BN254 scalar modulus as a `U256`.
pub fn field_modulus() -> U256 {
    U256::from_limbs(<Field as PrimeField>::MODULUS.0)
}

/// Checked conversion. Values at or above the modulus are rejected, never reduced.
pub fn u256_to_field(value: U256) -> Result<Field, FieldError> {
    Field::from_bigint(BigInt::new(value.into_limbs())).ok_or(FieldError::OutOfRange(value))
}

pub fn field_to_u256(value: Field) -> U256 {
    U256::from_limbs(value.into_bigint().0)
}

pub fn address_to_field(addr: Address) -> Field {
    let mut bytes = [0u8; 32];
    bytes[12..32].copy_from_slice(addr.as_slice());
    // 160 bits always fit, the reduction never applies.
    Field::from_be_bytes_mod_order(&bytes)
}

/// `0x`-prefixed, zero-padded 32-byte hex.
pub fn field_to_hex(value: Field) -> String {
    format!("0x{}", hex::encode(field_to_u256(value).to_be_bytes::<32>()))
}

/// Parses `0x`-hex or decimal text into an in-range field element.
pub fn parse_field(text: &str) -> Result<Field, FieldError> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => U256::from_str_radix(digits, 16),
        None => U256::from_str_radix(text, 10),
    }
    .map_err(|e| FieldError::InvalidEncoding(format!("{text}: {e}")))?;
    u256_to_field(parsed)
}

/// Serde adapter storing a field element as `0x`-hex text.
pub mod serde_field {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::Field;

    pub fn serialize<S: Serializer>(value: &Field, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::field_to_hex(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Field, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_field(&text).map_err(D::Error::custom)
    }
}

/// Serde adapter for sequences of field elements.
pub mod serde_field_vec {
    use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    use crate::Field;

    pub fn serialize<S: Serializer>(values: &[Field], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&super::field_to_hex(*value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Field>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|text| super::parse_field(text).map_err(D::Error::custom))
            .collect()
    }
}
