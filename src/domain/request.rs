// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::AppError;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Mint,
    Burn,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Mint => f.write_str("mint"),
            RequestKind::Burn => f.write_str("burn"),
        }
    }
}

/// One input row as produced by a loader, before validation.
///
/// The address is kept as text and the amount keeps its sign so that malformed
/// rows reach the validator and are reported against their row index.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", deny_unknown_fields)]
pub enum RequestRow {
    Mint {
        recipient: String,
        #[serde(deserialize_with = "deserialize_signed_amount")]
        amount: i128,
        #[serde(default)]
        metadata: Metadata,
    },
    Burn {
        holder: String,
        #[serde(deserialize_with = "deserialize_signed_amount")]
        amount: i128,
        #[serde(default)]
        metadata: Metadata,
    },
}

impl RequestRow {
    pub fn mint(recipient: impl Into<String>, amount: i128) -> Self {
        RequestRow::Mint {
            recipient: recipient.into(),
            amount,
            metadata: Metadata::new(),
        }
    }

    pub fn burn(holder: impl Into<String>, amount: i128) -> Self {
        RequestRow::Burn {
            holder: holder.into(),
            amount,
            metadata: Metadata::new(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            RequestRow::Mint { .. } => RequestKind::Mint,
            RequestRow::Burn { .. } => RequestKind::Burn,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            RequestRow::Mint { recipient, .. } => recipient,
            RequestRow::Burn { holder, .. } => holder,
        }
    }

    pub fn amount(&self) -> i128 {
        match self {
            RequestRow::Mint { amount, .. } | RequestRow::Burn { amount, .. } => *amount,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            RequestRow::Mint { metadata, .. } | RequestRow::Burn { metadata, .. } => metadata,
        }
    }
}

/// A well-formed request: parsed address and strictly positive amount.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Mint {
        recipient: Address,
        #[serde(serialize_with = "serialize_u256_decimal")]
        amount: U256,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        metadata: Metadata,
    },
    Burn {
        holder: Address,
        #[serde(serialize_with = "serialize_u256_decimal")]
        amount: U256,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        metadata: Metadata,
    },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Mint { .. } => RequestKind::Mint,
            Request::Burn { .. } => RequestKind::Burn,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Request::Mint { recipient, .. } => *recipient,
            Request::Burn { holder, .. } => *holder,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            Request::Mint { amount, .. } | Request::Burn { amount, .. } => *amount,
        }
    }
}

/// A request that passed per-row checks, tagged with its input row index.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidatedRequest {
    pub row: usize,
    #[serde(flatten)]
    pub request: Request,
}

/// Parse loader output: a JSON array of rows or an object with a `requests` array.
///
/// Rows without an `op` field take `default_op` when one is given; a row whose
/// `op` disagrees with `default_op` is rejected.
pub fn parse_request_rows(
    raw: &str,
    default_op: Option<RequestKind>,
) -> Result<Vec<RequestRow>, AppError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("requests") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(AppError::Validation {
                    field: "requests".into(),
                    message: "expected array or object with 'requests' key".into(),
                });
            }
        },
        _ => {
            return Err(AppError::Validation {
                field: "requests".into(),
                message: "expected array or object with 'requests' key".into(),
            });
        }
    };

    let mut rows = Vec::with_capacity(items.len());
    for (idx, mut item) in items.into_iter().enumerate() {
        if let (Some(op), serde_json::Value::Object(obj)) = (default_op, &mut item) {
            obj.entry("op")
                .or_insert_with(|| serde_json::Value::String(op.to_string()));
        }
        let row: RequestRow = serde_json::from_value(item).map_err(|e| AppError::Validation {
            field: format!("row {idx}"),
            message: e.to_string(),
        })?;
        if let Some(op) = default_op
            && row.kind() != op
        {
            return Err(AppError::Validation {
                field: format!("row {idx}"),
                message: format!("expected {op} request, found {}", row.kind()),
            });
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Read and parse a request file. See `parse_request_rows`.
pub fn load_requests_json(
    path: &str,
    default_op: Option<RequestKind>,
) -> Result<Vec<RequestRow>, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Validation {
        field: "input".into(),
        message: format!("failed to read {path}: {e}"),
    })?;
    parse_request_rows(&raw, default_op)
}

pub(crate) fn serialize_u256_decimal<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

fn deserialize_signed_amount<'de, D>(deserializer: D) -> Result<i128, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{Error, Visitor};

    struct AmountVisitor;

    impl Visitor<'_> for AmountVisitor {
        type Value = i128;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer amount or a decimal integer string")
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v as i128)
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i128)
        }

        fn visit_i128<E: Error>(self, v: i128) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_u128<E: Error>(self, v: u128) -> Result<Self::Value, E> {
            i128::try_from(v).map_err(|_| E::custom("amount out of range"))
        }

        fn visit_f64<E: Error>(self, v: f64) -> Result<Self::Value, E> {
            if v.fract() == 0.0 && v.abs() < 9.0e15 {
                Ok(v as i128)
            } else {
                Err(E::custom(format!("amount must be an integer in base units, got {v}")))
            }
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            v.trim()
                .parse::<i128>()
                .map_err(|_| E::custom(format!("invalid amount: {v}")))
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1111";

    #[test]
    fn parses_tagged_rows_with_string_and_numeric_amounts() {
        let raw = format!(
            r#"[{{"op":"mint","recipient":"{ADDR}","amount":"1000000"}},
                {{"op":"burn","holder":"{ADDR}","amount":-5,"metadata":{{"ref":"x"}}}}]"#
        );
        let rows = parse_request_rows(&raw, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], RequestRow::mint(ADDR, 1_000_000));
        assert_eq!(rows[1].kind(), RequestKind::Burn);
        assert_eq!(rows[1].amount(), -5);
        assert_eq!(rows[1].metadata().get("ref"), Some(&serde_json::json!("x")));
    }

    #[test]
    fn default_op_fills_missing_tag() {
        let raw = format!(r#"{{"requests":[{{"recipient":"{ADDR}","amount":7}}]}}"#);
        let rows = parse_request_rows(&raw, Some(RequestKind::Mint)).unwrap();
        assert_eq!(rows, vec![RequestRow::mint(ADDR, 7)]);
    }

    #[test]
    fn rejects_unknown_and_missing_fields() {
        let unknown = format!(r#"[{{"op":"mint","recipient":"{ADDR}","amount":1,"memo":"x"}}]"#);
        assert!(parse_request_rows(&unknown, None).is_err());

        let missing = r#"[{"op":"burn","amount":1}]"#;
        assert!(parse_request_rows(missing, None).is_err());
    }

    #[test]
    fn rejects_row_disagreeing_with_default_op() {
        let raw = format!(r#"[{{"op":"burn","holder":"{ADDR}","amount":1}}]"#);
        let err = parse_request_rows(&raw, Some(RequestKind::Mint)).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn missing_input_file_is_a_validation_error() {
        let err = load_requests_json("/nonexistent/requests.json", None).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "input"));
    }

    #[test]
    fn typed_request_serializes_amount_as_decimal() {
        let req = ValidatedRequest {
            row: 3,
            request: Request::Burn {
                holder: Address::ZERO,
                amount: U256::from(42u64),
                metadata: Metadata::new(),
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["row"], 3);
        assert_eq!(json["op"], "burn");
        assert_eq!(json["amount"], "42");
        assert!(json.get("metadata").is_none());
    }
}
