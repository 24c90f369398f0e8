use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{ConfigurationError, Error};

/// Data types supported for trend columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Int2,
    Integer,
    Int8,
    Real,
    Double,
    Numeric,
    Boolean,
    Text,
    Int2Array,
    IntegerArray,
    Int8Array,
    RealArray,
    DoubleArray,
    NumericArray,
    BooleanArray,
    TextArray,
}

impl DataType {
    /// Type that can hold an aggregate (sum, count) over many values of this
    /// type without overflowing.
    #[must_use]
    pub fn widen(self) -> DataType {
        match self {
            DataType::Int2 => DataType::Int8,
            DataType::Integer => DataType::Int8,
            DataType::Int8 => DataType::Numeric,
            DataType::Real => DataType::Double,
            DataType::Double => DataType::Double,
            DataType::Numeric => DataType::Numeric,
            other => other,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            DataType::Int2Array
                | DataType::IntegerArray
                | DataType::Int8Array
                | DataType::RealArray
                | DataType::DoubleArray
                | DataType::NumericArray
                | DataType::BooleanArray
                | DataType::TextArray
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int2 => "smallint",
            DataType::Integer => "integer",
            DataType::Int8 => "bigint",
            DataType::Real => "real",
            DataType::Double => "double precision",
            DataType::Numeric => "numeric",
            DataType::Boolean => "boolean",
            DataType::Text => "text",
            DataType::Int2Array => "smallint[]",
            DataType::IntegerArray => "integer[]",
            DataType::Int8Array => "bigint[]",
            DataType::RealArray => "real[]",
            DataType::DoubleArray => "double precision[]",
            DataType::NumericArray => "numeric[]",
            DataType::BooleanArray => "boolean[]",
            DataType::TextArray => "text[]",
        }
    }
}

/// Widened counterpart of `data_type` for aggregated columns.
pub fn widen(data_type: DataType) -> DataType {
    data_type.widen()
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data_type = match s.trim().to_lowercase().as_str() {
            "smallint" | "int2" => DataType::Int2,
            "integer" | "int" | "int4" => DataType::Integer,
            "bigint" | "int8" => DataType::Int8,
            "real" | "float4" => DataType::Real,
            "double precision" | "float" | "float8" => DataType::Double,
            "numeric" => DataType::Numeric,
            "boolean" | "bool" => DataType::Boolean,
            "text" => DataType::Text,
            "smallint[]" | "int2[]" => DataType::Int2Array,
            "integer[]" | "int[]" | "int4[]" => DataType::IntegerArray,
            "bigint[]" | "int8[]" => DataType::Int8Array,
            "real[]" | "float4[]" => DataType::RealArray,
            "double precision[]" | "float[]" | "float8[]" => DataType::DoubleArray,
            "numeric[]" => DataType::NumericArray,
            "boolean[]" | "bool[]" => DataType::BooleanArray,
            "text[]" => DataType::TextArray,
            _ => {
                return Err(ConfigurationError::from_msg(format!(
                    "Unsupported data type '{s}'"
                ))
                .into())
            }
        };

        Ok(data_type)
    }
}

impl TryFrom<String> for DataType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DataType::from_str(&value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DataType; 16] = [
        DataType::Int2,
        DataType::Integer,
        DataType::Int8,
        DataType::Real,
        DataType::Double,
        DataType::Numeric,
        DataType::Boolean,
        DataType::Text,
        DataType::Int2Array,
        DataType::IntegerArray,
        DataType::Int8Array,
        DataType::RealArray,
        DataType::DoubleArray,
        DataType::NumericArray,
        DataType::BooleanArray,
        DataType::TextArray,
    ];

    #[test]
    fn widening_table() {
        assert_eq!(widen(DataType::Int2), DataType::Int8);
        assert_eq!(widen(DataType::Integer), DataType::Int8);
        assert_eq!(widen(DataType::Int8), DataType::Numeric);
        assert_eq!(widen(DataType::Real), DataType::Double);
        assert_eq!(widen(DataType::Double), DataType::Double);
        assert_eq!(widen(DataType::Numeric), DataType::Numeric);
        assert_eq!(widen("float".parse().unwrap()), DataType::Double);
    }

    #[test]
    fn widening_settles_within_two_steps() {
        for data_type in [DataType::Double, DataType::Numeric, DataType::Boolean, DataType::Text] {
            assert_eq!(widen(data_type), data_type, "{data_type}");
        }

        // smallint -> bigint -> numeric
        assert_eq!(widen(widen(DataType::Int2)), DataType::Numeric);

        for data_type in ALL {
            let twice = widen(widen(data_type));

            assert_eq!(widen(twice), twice, "{data_type}");
        }
    }

    #[test]
    fn non_numeric_types_pass_through() {
        for data_type in ALL.into_iter().filter(|t| t.is_array()) {
            assert_eq!(widen(data_type), data_type);
        }

        assert_eq!(widen(DataType::Text), DataType::Text);
        assert_eq!(widen(DataType::Boolean), DataType::Boolean);
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(DataType::DoubleArray.to_string(), "double precision[]");
        assert_eq!("int4".parse::<DataType>().unwrap(), DataType::Integer);
        assert_eq!("Double Precision".parse::<DataType>().unwrap(), DataType::Double);
        assert!("timestamp".parse::<DataType>().is_err());
    }
}
