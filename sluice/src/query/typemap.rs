use crate::store::DestinationType;

/// Fallback destination type when the source type has no mapping.
///
/// A wide string column accepts any textual rendering, so an unmapped source
/// type degrades to text instead of failing the table build.
const FALLBACK_VARCHAR: &str = "varchar";
const FALLBACK_STRING: &str = "string";

/// Maps a source column type name to the destination engine's type name.
///
/// The mapping is a fixed lookup table keyed by the textual source type (as
/// reported by the source's information schema). Object-store destinations
/// carry no table schema and always answer with the fallback.
pub fn destination_column_type(destination: DestinationType, source_type: &str) -> &'static str {
    match destination {
        DestinationType::Snowflake => snowflake_column_type(source_type),
        DestinationType::Redshift => redshift_column_type(source_type),
        DestinationType::BigQuery => bigquery_column_type(source_type),
        DestinationType::ObjectStore => FALLBACK_VARCHAR,
    }
}

fn snowflake_column_type(source_type: &str) -> &'static str {
    match source_type {
        "smallint" => "smallint",
        "integer" => "integer",
        "bigint" => "bigint",
        "decimal" | "numeric" => "decimal",
        "real" => "real",
        "double precision" => "double precision",
        "boolean" => "boolean",
        "char" | "varchar" => "varchar",
        "text" => "text",
        "bytea" => "binary",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamp with time zone" => "timestamptz",
        "date" => "date",
        "time" => "time",
        "jsonb" => "variant",
        "USER-DEFINED" => "varchar",
        _ => FALLBACK_VARCHAR,
    }
}

fn redshift_column_type(source_type: &str) -> &'static str {
    match source_type {
        "smallint" => "smallint",
        "integer" => "integer",
        "bigint" => "bigint",
        "decimal" | "numeric" => "decimal",
        "real" => "real",
        "double precision" => "double precision",
        "boolean" => "boolean",
        "char" | "varchar" => "varchar",
        "text" => "varchar",
        "bytea" => "varbyte",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamp with time zone" => "timestamptz",
        "date" => "date",
        "time" => "time",
        "jsonb" => "super",
        _ => FALLBACK_VARCHAR,
    }
}

fn bigquery_column_type(source_type: &str) -> &'static str {
    match source_type {
        "tinyint" | "smallint" | "mediumint" | "integer" | "bigint" => "int64",
        "decimal" | "numeric" => "numeric",
        "real" | "double precision" => "float64",
        "boolean" => "bool",
        "char" | "varchar" => "string",
        "bytea" => "bytes",
        "tinytext" | "text" | "mediumtext" | "longtext" => "string",
        "timestamp" | "timestamp without time zone" | "timestamp with time zone" => "timestamp",
        "date" => "date",
        "time" => "time",
        "jsonb" => "json",
        _ => FALLBACK_STRING,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonb_maps_per_destination() {
        assert_eq!(
            destination_column_type(DestinationType::Snowflake, "jsonb"),
            "variant"
        );
        assert_eq!(
            destination_column_type(DestinationType::Redshift, "jsonb"),
            "super"
        );
        assert_eq!(
            destination_column_type(DestinationType::BigQuery, "jsonb"),
            "json"
        );
    }

    #[test]
    fn unmapped_types_fall_back_to_wide_strings() {
        assert_eq!(
            destination_column_type(DestinationType::Snowflake, "tsvector"),
            "varchar"
        );
        assert_eq!(
            destination_column_type(DestinationType::BigQuery, "tsvector"),
            "string"
        );
    }
}
