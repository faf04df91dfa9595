//! Warehouse data type parsing

use vinyl_core::LogicalType;

/// Parse a warehouse type string (`varchar(255)`, `NUMERIC(10,2)`, `int64`)
pub fn parse_data_type(data_type: &str) -> LogicalType {
    let lower = data_type.trim().to_lowercase();
    let (base, params) = match lower.find('(') {
        Some(start) => {
            let end = lower.rfind(')').unwrap_or(lower.len());
            (lower[..start].trim(), Some(&lower[(start + 1).min(end)..end]))
        }
        None => (lower.as_str(), None),
    };

    match base {
        "int" | "integer" | "bigint" | "smallint" | "tinyint" | "int64" | "int4" | "int8"
        | "int2" | "hugeint" | "ubigint" | "uinteger" | "long" | "serial" | "bigserial" => {
            LogicalType::Int
        }

        "float" | "double" | "real" | "float64" | "float8" | "float4" | "double precision" => {
            LogicalType::Float
        }

        "decimal" | "numeric" | "number" | "bignumeric" => {
            let parts: Vec<&str> = params
                .map(|p| p.split(',').map(str::trim).collect())
                .unwrap_or_default();
            LogicalType::Decimal {
                precision: parts.first().and_then(|p| p.parse().ok()),
                scale: parts.get(1).and_then(|s| s.parse().ok()),
            }
        }

        "string" | "varchar" | "char" | "text" | "character varying" | "character" | "bpchar"
        | "nvarchar" | "uuid" => LogicalType::String,

        "bool" | "boolean" => LogicalType::Bool,

        "date" => LogicalType::Date,

        s if s.starts_with("timestamp") || s == "datetime" => LogicalType::Timestamp,

        "json" | "jsonb" | "variant" | "object" => LogicalType::Json,

        _ => LogicalType::Unknown,
    }
}
