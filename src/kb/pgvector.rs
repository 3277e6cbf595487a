//! sqlx codec for the pgvector `vector` column type.
//!
//! The wire representation is the type's text form (`[x,y,z]`). Encoding
//! refuses non-finite components, since pgvector rejects NaN/Inf server
//! side and a clear client error beats a cryptic SQL one. The text-form
//! conversion lives in free functions so it can be tested without a live
//! connection.

use std::fmt::Write as _;

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

/// Wrapper binding a `Vec<f32>` to a `vector` column.
#[derive(Debug, Clone, PartialEq)]
pub struct PgVector(pub Vec<f32>);

impl PgVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Wrap a vector after checking it against the expected column width,
    /// so dimension mismatches surface before a round trip to Postgres.
    pub fn with_dimension(values: Vec<f32>, expected: usize) -> Result<Self, String> {
        if values.len() != expected {
            return Err(format!(
                "vector has {} components, column expects {}",
                values.len(),
                expected
            ));
        }
        Ok(Self(values))
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<f32>> for PgVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl From<PgVector> for Vec<f32> {
    fn from(vector: PgVector) -> Self {
        vector.0
    }
}

/// Render components into pgvector's text form. Fails on NaN/Inf.
fn to_text_form(values: &[f32]) -> Result<String, String> {
    let mut text = String::with_capacity(values.len() * 10 + 2);
    text.push('[');
    for (i, value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(format!("component {} is not finite ({})", i, value));
        }
        if i > 0 {
            text.push(',');
        }
        // Writing into a String cannot fail.
        let _ = write!(text, "{}", value);
    }
    text.push(']');
    Ok(text)
}

/// Parse pgvector's text form back into components, reporting the index
/// of the first bad piece.
fn parse_text_form(text: &str) -> Result<Vec<f32>, String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| format!("expected bracketed vector text, got {:?}", text))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut components = Vec::new();
    for (i, piece) in inner.split(',').enumerate() {
        let value: f32 = piece
            .trim()
            .parse()
            .map_err(|e| format!("component {} ({:?}): {}", i, piece.trim(), e))?;
        components.push(value);
    }
    Ok(components)
}

impl Type<Postgres> for PgVector {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("vector")
    }
}

impl PgHasArrayType for PgVector {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_vector")
    }
}

impl Encode<'_, Postgres> for PgVector {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let text = to_text_form(&self.0).map_err(BoxDynError::from)?;
        buf.extend_from_slice(text.as_bytes());
        Ok(IsNull::No)
    }
}

impl Decode<'_, Postgres> for PgVector {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        let text = <&str as Decode<Postgres>>::decode(value)?;
        parse_text_form(text)
            .map(PgVector)
            .map_err(BoxDynError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form_round_trip() {
        let values = vec![0.25, -1.5, 3.0];
        let text = to_text_form(&values).unwrap();
        assert_eq!(text, "[0.25,-1.5,3]");
        assert_eq!(parse_text_form(&text).unwrap(), values);
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        assert!(to_text_form(&[0.1, f32::NAN]).is_err());
        assert!(to_text_form(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        assert!(parse_text_form("1,2,3").is_err());
        assert!(parse_text_form("[1,x,3]").is_err());
        assert_eq!(parse_text_form("[]").unwrap(), Vec::<f32>::new());
        // Whitespace around components is tolerated.
        assert_eq!(parse_text_form(" [1, 2.5 ,3] ").unwrap(), vec![1.0, 2.5, 3.0]);
    }

    #[test]
    fn test_dimension_check() {
        assert!(PgVector::with_dimension(vec![0.0; 768], 768).is_ok());
        let err = PgVector::with_dimension(vec![0.0; 3], 768).unwrap_err();
        assert!(err.contains("768"));
    }

    #[test]
    fn test_conversions() {
        let vector = PgVector::from(vec![4.0, 5.0]);
        assert_eq!(vector.dimension(), 2);
        assert_eq!(vector.as_slice(), &[4.0, 5.0]);
        assert_eq!(Vec::from(vector), vec![4.0, 5.0]);
    }
}
