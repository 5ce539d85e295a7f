//! Native vector binding for SQLite.
//!
//! Vectors are stored as little-endian `f32` BLOBs. Implementing the sqlx
//! traits here means every connection binds and decodes vectors natively,
//! with no per-call-site conversion.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{Sqlite, SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Type};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 4);
        for v in &self.0 {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() % 4 != 0 {
            return Err(format!("vector blob length {} is not a multiple of 4", bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Vector(values))
    }

    /// Cosine similarity in `[-1, 1]`; zero for mismatched dims or zero norms.
    pub fn cosine(&self, other: &Vector) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

impl From<Vec<f32>> for Vector {
    fn from(v: Vec<f32>) -> Self {
        Vector(v)
    }
}

impl Type<Sqlite> for Vector {
    fn type_info() -> SqliteTypeInfo {
        <Vec<u8> as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <Vec<u8> as Type<Sqlite>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Sqlite> for Vector {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> std::result::Result<IsNull, BoxDynError> {
        buf.push(SqliteArgumentValue::Blob(Cow::Owned(self.to_le_bytes())));
        Ok(IsNull::No)
    }
}

impl<'r> Decode<'r, Sqlite> for Vector {
    fn decode(value: SqliteValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let bytes = <&[u8] as Decode<Sqlite>>::decode(value)?;
        Vector::from_le_bytes(bytes).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let v = Vector(vec![0.1, -2.5, 3.0]);
        let bytes = v.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Vector::from_le_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn test_from_le_bytes_rejects_ragged_blob() {
        assert!(Vector::from_le_bytes(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let v = Vector(vec![1.0, 2.0, 3.0]);
        assert!((v.cosine(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = Vector(vec![1.0, 0.0]);
        let b = Vector(vec![0.0, 1.0]);
        assert!(a.cosine(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_dims_is_zero() {
        let a = Vector(vec![1.0, 0.0]);
        let b = Vector(vec![1.0]);
        assert_eq!(a.cosine(&b), 0.0);
    }
}
