//! Column data types for text-based tabular readers.
//!
//! [`ColumnType`] is the type vocabulary used by the built-in
//! [`StandardCatalog`](crate::catalog::StandardCatalog): readers report one of
//! these as the external type of a column, and the same set serves as the
//! output types a column can be converted to.

use std::{fmt, str::FromStr};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

const DECIMAL_MAX_PRECISION: u32 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecimalSpec {
    pub precision: u32,
    pub scale: u32,
}

impl DecimalSpec {
    pub fn new(precision: u32, scale: u32) -> Result<Self> {
        let spec = Self { precision, scale };
        spec.ensure_valid()?;
        Ok(spec)
    }

    fn ensure_valid(&self) -> Result<()> {
        ensure!(self.precision > 0, "Decimal precision must be positive");
        ensure!(
            self.precision <= DECIMAL_MAX_PRECISION,
            "Decimal precision must be <= {}",
            DECIMAL_MAX_PRECISION
        );
        ensure!(
            self.scale <= self.precision,
            "Decimal scale ({}) cannot exceed precision ({})",
            self.scale,
            self.precision
        );
        Ok(())
    }

    pub fn signature(&self) -> String {
        format!("decimal({},{})", self.precision, self.scale)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Time,
    Guid,
    Currency,
    Decimal(DecimalSpec),
}

/// Every variant without parameters, in token order.
const PLAIN_TYPES: [ColumnType; 9] = [
    ColumnType::String,
    ColumnType::Integer,
    ColumnType::Float,
    ColumnType::Boolean,
    ColumnType::Date,
    ColumnType::DateTime,
    ColumnType::Time,
    ColumnType::Guid,
    ColumnType::Currency,
];

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Time => "time",
            ColumnType::Guid => "guid",
            ColumnType::Currency => "currency",
            ColumnType::Decimal(_) => "decimal",
        }
    }

    /// Stable token used inside conversion path ids, e.g. `integer` or
    /// `decimal(18,4)`.
    pub fn signature_token(&self) -> String {
        match self {
            ColumnType::Decimal(spec) => spec.signature(),
            _ => self.as_str().to_string(),
        }
    }

    /// Inverse of [`signature_token`](Self::signature_token). Matching is
    /// case-insensitive and ignores surrounding whitespace.
    pub fn from_token(token: &str) -> Result<Self> {
        let token = token.trim().to_ascii_lowercase();
        if let Some(found) = PLAIN_TYPES.iter().find(|ty| ty.as_str() == token) {
            return Ok(found.clone());
        }
        if let Some(arguments) = token
            .strip_prefix("decimal(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let (precision, scale) = arguments
                .split_once(',')
                .with_context(|| format!("Decimal token '{token}' needs precision and scale"))?;
            let precision = precision
                .trim()
                .parse()
                .with_context(|| format!("Decimal precision in '{token}'"))?;
            let scale = scale
                .trim()
                .parse()
                .with_context(|| format!("Decimal scale in '{token}'"))?;
            return Ok(ColumnType::Decimal(DecimalSpec::new(precision, scale)?));
        }
        let known = PLAIN_TYPES.iter().map(ColumnType::as_str).collect::<Vec<_>>();
        bail!(
            "Unknown column type '{token}'. Expected one of {} or decimal(p,s)",
            known.join(", ")
        )
    }

    /// The type every other type can be rendered as.
    pub fn most_generic() -> Self {
        ColumnType::String
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature_token())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ColumnType::from_token(value)
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_token(&token).map_err(de::Error::custom)
    }
}
