//! Wire cursor: `base64(json(["natural", N]))`, ordered by the numeric `N`.
//!
//! This plays the role `chronicle-persistence::cursor::Cursorize` plays for
//! server-side SQL offset pagination, but the connector is a *consumer* of an
//! already-paginated remote log, so the cursor here is an opaque token we
//! decode only to compare, never to build a query fragment from.

use std::cmp::Ordering;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

const KIND: &str = "natural";

/// A workflow cursor. The empty cursor ("no position yet") compares less
/// than any real cursor and equal to another empty cursor.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Option<i64>);

impl Cursor {
    /// The "minus infinity" cursor: a listener that has not yet synced anything.
    pub fn empty() -> Self {
        Cursor(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Build a cursor directly from the server-assigned natural number.
    pub fn from_natural(n: i64) -> Self {
        Cursor(Some(n))
    }

    pub fn natural(&self) -> Option<i64> {
        self.0
    }

    /// Decode `base64(json(["natural", N]))`. An empty string decodes to [`Cursor::empty`].
    pub fn parse(s: &str) -> Result<Self, CommonError> {
        if s.is_empty() {
            return Ok(Cursor::empty());
        }
        let raw = STANDARD.decode(s).map_err(|e| CommonError::CursorParse(e.to_string()))?;
        let (kind, n): (String, i64) = serde_json::from_slice(&raw)
            .map_err(|e| CommonError::CursorParse(e.to_string()))
            .and_then(|v: serde_json::Value| {
                let arr = v
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| CommonError::CursorParse("expected a 2-tuple".into()))?;
                let kind = arr[0]
                    .as_str()
                    .ok_or_else(|| CommonError::CursorParse("cursor kind must be a string".into()))?
                    .to_owned();
                let n = arr[1]
                    .as_i64()
                    .ok_or_else(|| CommonError::CursorParse("cursor id must be an integer".into()))?;
                Ok((kind, n))
            })?;
        if kind != KIND {
            return Err(CommonError::CursorParse(format!("unknown cursor kind {kind:?}")));
        }
        Ok(Cursor(Some(n)))
    }

    /// Encode back to the wire representation.
    pub fn encode(&self) -> String {
        match self.0 {
            None => String::new(),
            Some(n) => {
                let json = serde_json::json!([KIND, n]);
                STANDARD.encode(serde_json::to_vec(&json).expect("cursor json never fails to serialize"))
            }
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor::empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_is_minus_infinity() {
        let empty = Cursor::empty();
        let real = Cursor::from_natural(1);
        assert!(empty < real);
        assert_eq!(empty, Cursor::empty());
    }

    #[test]
    fn roundtrips_through_wire_format() {
        let c = Cursor::from_natural(42);
        let wire = c.encode();
        let back = Cursor::parse(&wire).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn compare_is_antisymmetric() {
        let a = Cursor::from_natural(3);
        let b = Cursor::from_natural(7);
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    fn rejects_unknown_kind() {
        let bad = STANDARD.encode(serde_json::to_vec(&serde_json::json!(["synthetic", 1])).unwrap());
        assert!(Cursor::parse(&bad).is_err());
    }

    #[test]
    fn empty_string_is_empty_cursor() {
        assert_eq!(Cursor::parse("").unwrap(), Cursor::empty());
    }
}
