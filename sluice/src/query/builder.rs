//! Statement builders for extraction and the staged-load protocol.
//!
//! Source-side builders produce parameterized [`Statement`]s; destination-side
//! builders render complete SQL text with every identifier quoted, so loaders
//! can pass them to `query` or `query_unsafe` directly. The only inline
//! literals are staging credentials and object URLs, which come from operator
//! configuration, never from user input.

use chrono::{DateTime, Utc};

use crate::connections::EngineType;
use crate::query::QuoteStyle;
use crate::query::typemap::destination_column_type;
use crate::store::DestinationType;
use crate::types::{Statement, Value};

/// One destination column together with its source type name.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub source_type: String,
}

/// Escapes a string literal for inline rendering, doubling single quotes.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Builds the watermark probe: the current maximum last-modified value for
/// one tenant, newest first.
pub fn max_last_modified(
    engine: EngineType,
    table: &str,
    last_modified_column: &str,
    tenant_column: &str,
    tenant_id: &str,
) -> Statement {
    let style = QuoteStyle::for_engine(engine);
    let sql = format!(
        "select {lm} from {table} where {tenant} = {p1} order by {lm} desc limit 1",
        lm = style.quote(last_modified_column),
        table = style.quote(table),
        tenant = style.quote(tenant_column),
        p1 = style.placeholder(1),
    );

    Statement::with_binds(sql, vec![Value::String(tenant_id.to_string())])
}

/// Builds the incremental extraction query.
///
/// Projects the configuration's source-to-destination column mapping over the
/// view's declared columns, filtered to one tenant and to rows modified after
/// the destination's watermark (exclusive).
pub fn extraction(
    engine: EngineType,
    table: &str,
    view_columns: &[String],
    mappings: &[(String, String)],
    tenant_column: &str,
    tenant_id: &str,
    last_modified_column: &str,
    watermark: DateTime<Utc>,
) -> Statement {
    let style = QuoteStyle::for_engine(engine);

    let projection = mappings
        .iter()
        .map(|(source, destination)| {
            format!("{} as {}", style.quote(source), style.quote(destination))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let inner_projection = view_columns
        .iter()
        .map(|column| style.quote(column))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "select {projection} from (select {inner_projection} from {table}) as {alias} \
         where {tenant} = {p1} and {lm} > {p2}",
        table = style.quote(table),
        alias = style.quote("t"),
        tenant = style.quote(tenant_column),
        lm = style.quote(last_modified_column),
        p1 = style.placeholder(1),
        p2 = style.placeholder(2),
    );

    Statement::with_binds(
        sql,
        vec![
            Value::String(tenant_id.to_string()),
            Value::TimestampTz(watermark),
        ],
    )
}

/// Renders a column list with destination types, e.g. `"id" bigint, "name" varchar`.
fn columns_with_types(
    style: QuoteStyle,
    destination: DestinationType,
    columns: &[ColumnDef],
) -> String {
    columns
        .iter()
        .map(|column| {
            format!(
                "{} {}",
                style.quote(&column.name),
                destination_column_type(destination, &column.source_type)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// Transaction wrappers shared by the transactional loaders. DDL auto-commits
// on every supported warehouse, so only DML belongs between these.

pub fn begin_transaction() -> Statement {
    Statement::raw("begin transaction")
}

pub fn commit_transaction() -> Statement {
    Statement::raw("commit")
}

pub fn rollback_transaction() -> Statement {
    Statement::raw("rollback")
}

// Snowflake

pub fn snowflake_create_schema(database: &str, schema: &str) -> String {
    let style = QuoteStyle::DoubleQuote;
    format!(
        "create schema if not exists {} with managed access",
        style.quote_path(&[database, schema])
    )
}

pub fn snowflake_create_table(schema: &str, table: &str, columns: &[ColumnDef]) -> String {
    let style = QuoteStyle::DoubleQuote;
    format!(
        "create table if not exists {} ( {} )",
        style.quote_path(&[schema, table]),
        columns_with_types(style, DestinationType::Snowflake, columns)
    )
}

/// Builds the stage pointing Snowflake at the uploaded object.
///
/// Credentials and the object URL are operator-provided literals; this
/// statement must go through `query_unsafe` since stages cannot be
/// parameterized.
pub fn snowflake_create_stage(
    schema: &str,
    stage: &str,
    object_url: &str,
    aws_key_id: &str,
    aws_secret_key: &str,
    kms_key_id: &str,
) -> String {
    let style = QuoteStyle::DoubleQuote;
    format!(
        "create or replace stage {}\n  \
         url='{}'\n  \
         credentials = (aws_key_id='{}' aws_secret_key='{}')\n  \
         encryption = (TYPE='AWS_SSE_KMS' KMS_KEY_ID='{}')\n  \
         file_format = (TYPE='CSV' FIELD_DELIMITER=',' SKIP_HEADER=1)",
        style.quote_path(&[schema, stage]),
        escape_literal(object_url),
        escape_literal(aws_key_id),
        escape_literal(aws_secret_key),
        escape_literal(kms_key_id),
    )
}

/// Builds the Snowflake MERGE from a staged file into the target table.
///
/// The `$n` references address stage file columns by position, matching the
/// column order the egress stream writes.
pub fn snowflake_merge(
    schema: &str,
    table: &str,
    stage: &str,
    columns: &[String],
    primary_key: &str,
) -> String {
    let style = QuoteStyle::DoubleQuote;
    let target = style.quote_path(&[schema, table]);

    let staged_projection = columns
        .iter()
        .enumerate()
        .map(|(index, column)| format!("${} {}", index + 1, style.quote(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = merge_update_list(style, columns, primary_key);
    let insert_columns = quoted_list(style, columns);
    let insert_values = columns
        .iter()
        .map(|column| format!("newData.{}", style.quote(column)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "merge into {target} using ( select {staged_projection} from @{stage} ) newData \
         on {target}.{pk} = newData.{pk} \
         when matched then update set {updates} \
         when not matched then insert ( {insert_columns} ) values ( {insert_values} )",
        stage = style.quote_path(&[schema, stage]),
        pk = style.quote(primary_key),
    )
}

pub fn snowflake_remove_stage_files(schema: &str, stage: &str) -> String {
    format!(
        "remove @{}",
        QuoteStyle::DoubleQuote.quote_path(&[schema, stage])
    )
}

pub fn snowflake_drop_stage(schema: &str, stage: &str) -> String {
    format!(
        "drop stage {}",
        QuoteStyle::DoubleQuote.quote_path(&[schema, stage])
    )
}

// Redshift

pub fn redshift_create_schema(schema: &str) -> String {
    format!(
        "create schema if not exists {}",
        QuoteStyle::DoubleQuote.quote(schema)
    )
}

pub fn redshift_create_table(table: &str, columns: &[ColumnDef]) -> String {
    let style = QuoteStyle::DoubleQuote;
    format!(
        "create table if not exists {} ( {} )",
        style.quote(table),
        columns_with_types(style, DestinationType::Redshift, columns)
    )
}

pub fn redshift_create_stage_table(stage: &str, table: &str) -> String {
    let style = QuoteStyle::DoubleQuote;
    format!(
        "create temp table if not exists {} (like {})",
        style.quote(stage),
        style.quote(table)
    )
}

/// Builds the COPY loading the staged object into the temp table.
///
/// Credentials are inline per Redshift's COPY syntax; must go through
/// `query_unsafe`.
pub fn redshift_copy(
    stage: &str,
    object_url: &str,
    aws_key_id: &str,
    aws_secret_key: &str,
) -> String {
    format!(
        "copy {} from '{}' credentials '{}' csv gzip timeformat 'auto' IGNOREHEADER 1",
        QuoteStyle::DoubleQuote.quote(stage),
        escape_literal(object_url),
        escape_literal(&format!(
            "aws_access_key_id={aws_key_id};aws_secret_access_key={aws_secret_key}"
        )),
    )
}

/// Builds the decomposed upsert for Redshift, which lacks native MERGE:
/// update matched rows, delete already-applied staged rows, insert the rest.
pub fn redshift_upsert(
    table: &str,
    stage: &str,
    columns: &[String],
    primary_key: &str,
) -> Vec<String> {
    let style = QuoteStyle::DoubleQuote;
    let target = style.quote(table);
    let staged = style.quote(stage);
    let pk = style.quote(primary_key);
    let updates = merge_update_list(style, columns, primary_key);

    vec![
        format!(
            "update {target} set {updates} from {staged} as newData \
             where {target}.{pk} = newData.{pk}"
        ),
        format!(
            "delete from {staged} using {target} \
             where {staged}.{pk} = {target}.{pk}"
        ),
        format!("insert into {target} select * from {staged}"),
    ]
}

pub fn redshift_drop_table(table: &str) -> String {
    format!("drop table {}", QuoteStyle::DoubleQuote.quote(table))
}

// BigQuery

pub fn bigquery_create_schema(project: &str, dataset: &str) -> String {
    format!(
        "create schema if not exists {}",
        QuoteStyle::Backtick.quote_joined_path(&[project, dataset])
    )
}

pub fn bigquery_create_table(
    project: &str,
    dataset: &str,
    table: &str,
    columns: &[ColumnDef],
) -> String {
    let style = QuoteStyle::Backtick;
    format!(
        "create table if not exists {} ( {} )",
        style.quote_joined_path(&[project, dataset, table]),
        columns_with_types(style, DestinationType::BigQuery, columns)
    )
}

/// Registers an external table over the staged object in the staging bucket.
pub fn bigquery_external_table(
    project: &str,
    dataset: &str,
    stage: &str,
    columns: &[ColumnDef],
    object_uri: &str,
) -> String {
    let style = QuoteStyle::Backtick;
    format!(
        "create external table {} ( {} ) options (format = 'CSV', uris = ['{}'], \
         skip_leading_rows = 1, compression = 'GZIP')",
        style.quote_joined_path(&[project, dataset, stage]),
        columns_with_types(style, DestinationType::BigQuery, columns),
        escape_literal(object_uri),
    )
}

pub fn bigquery_merge(
    project: &str,
    dataset: &str,
    table: &str,
    stage: &str,
    columns: &[String],
    primary_key: &str,
) -> String {
    let style = QuoteStyle::Backtick;
    let target = style.quote_joined_path(&[project, dataset, table]);

    let staged_projection = quoted_list(style, columns);
    let updates = merge_update_list(style, columns, primary_key);
    let insert_values = columns
        .iter()
        .map(|column| format!("newData.{}", style.quote(column)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "merge into {target} newTarget using ( select {staged_projection} from {stage} ) newData \
         on newTarget.{pk} = newData.{pk} \
         when matched then update set {updates} \
         when not matched then insert ( {insert_columns} ) values ( {insert_values} )",
        stage = style.quote_joined_path(&[project, dataset, stage]),
        pk = style.quote(primary_key),
        insert_columns = staged_projection,
    )
}

pub fn bigquery_drop_table(project: &str, dataset: &str, table: &str) -> String {
    format!(
        "drop external table if exists {}",
        QuoteStyle::Backtick.quote_joined_path(&[project, dataset, table])
    )
}

fn quoted_list(style: QuoteStyle, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| style.quote(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders `"col" = newData."col"` for every non-key column.
fn merge_update_list(style: QuoteStyle, columns: &[String], primary_key: &str) -> String {
    columns
        .iter()
        .filter(|column| column.as_str() != primary_key)
        .map(|column| {
            let quoted = style.quote(column);
            format!("{quoted} = newData.{quoted}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string(), "updated_at".to_string()]
    }

    fn column_defs() -> Vec<ColumnDef> {
        vec![
            ColumnDef {
                name: "id".to_string(),
                source_type: "bigint".to_string(),
            },
            ColumnDef {
                name: "payload".to_string(),
                source_type: "jsonb".to_string(),
            },
        ]
    }

    #[test]
    fn extraction_filters_by_tenant_and_watermark() {
        let watermark = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let statement = extraction(
            EngineType::Postgres,
            "orders",
            &["id".to_string(), "tenant_id".to_string()],
            &[("id".to_string(), "order_id".to_string())],
            "tenant_id",
            "acme",
            "updated_at",
            watermark,
        );

        assert_eq!(
            statement.sql,
            "select \"id\" as \"order_id\" from (select \"id\", \"tenant_id\" from \"orders\") \
             as \"t\" where \"tenant_id\" = $1 and \"updated_at\" > $2"
        );
        assert_eq!(
            statement.binds,
            vec![
                Value::String("acme".to_string()),
                Value::TimestampTz(watermark)
            ]
        );
    }

    #[test]
    fn extraction_uses_mysql_placeholders() {
        let watermark = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let statement = extraction(
            EngineType::MySql,
            "orders",
            &["id".to_string()],
            &[("id".to_string(), "id".to_string())],
            "tenant_id",
            "acme",
            "updated_at",
            watermark,
        );

        assert!(statement.sql.contains("`orders`"));
        assert!(statement.sql.contains("= ?"));
        assert!(statement.sql.contains("> ?"));
    }

    #[test]
    fn max_last_modified_orders_newest_first() {
        let statement =
            max_last_modified(EngineType::Postgres, "orders", "updated_at", "tenant_id", "acme");

        assert_eq!(
            statement.sql,
            "select \"updated_at\" from \"orders\" where \"tenant_id\" = $1 \
             order by \"updated_at\" desc limit 1"
        );
    }

    #[test]
    fn snowflake_merge_addresses_stage_columns_by_position() {
        let sql = snowflake_merge("public", "SharedData_acme_1", "stage_1", &columns(), "id");

        assert!(sql.contains("$1 \"id\", $2 \"name\", $3 \"updated_at\""));
        assert!(sql.contains("from @\"public\".\"stage_1\""));
        assert!(sql.contains("on \"public\".\"SharedData_acme_1\".\"id\" = newData.\"id\""));
        assert!(sql.contains(
            "update set \"name\" = newData.\"name\", \"updated_at\" = newData.\"updated_at\""
        ));
        assert!(sql.contains("insert ( \"id\", \"name\", \"updated_at\" )"));
    }

    #[test]
    fn snowflake_stage_embeds_csv_file_format() {
        let sql = snowflake_create_stage(
            "public",
            "stage_1",
            "s3://bucket/snowflake/1/key.gz",
            "AKIA",
            "secret",
            "kms-key",
        );

        assert!(sql.contains("create or replace stage \"public\".\"stage_1\""));
        assert!(sql.contains("url='s3://bucket/snowflake/1/key.gz'"));
        assert!(sql.contains("credentials = (aws_key_id='AKIA' aws_secret_key='secret')"));
        assert!(sql.contains("encryption = (TYPE='AWS_SSE_KMS' KMS_KEY_ID='kms-key')"));
        assert!(sql.contains("file_format = (TYPE='CSV' FIELD_DELIMITER=',' SKIP_HEADER=1)"));
    }

    #[test]
    fn redshift_upsert_decomposes_into_three_statements() {
        let statements = redshift_upsert("target", "staged", &columns(), "id");

        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("update \"target\" set"));
        assert!(statements[0].contains("where \"target\".\"id\" = newData.\"id\""));
        assert!(statements[1].starts_with("delete from \"staged\" using \"target\""));
        assert_eq!(
            statements[2],
            "insert into \"target\" select * from \"staged\""
        );
    }

    #[test]
    fn bigquery_paths_quote_once() {
        let sql = bigquery_create_table("proj", "dataset", "table", &column_defs());

        assert!(sql.contains("`proj.dataset.table`"));
        assert!(sql.contains("`id` int64"));
        assert!(sql.contains("`payload` json"));
    }

    #[test]
    fn bigquery_external_table_points_at_staged_object() {
        let sql = bigquery_external_table(
            "proj",
            "dataset",
            "stage",
            &column_defs(),
            "gs://staging/bigquery/1/key.gz",
        );

        assert!(sql.contains("create external table `proj.dataset.stage`"));
        assert!(sql.contains("uris = ['gs://staging/bigquery/1/key.gz']"));
        assert!(sql.contains("skip_leading_rows = 1"));
        assert!(sql.contains("compression = 'GZIP'"));
    }

    #[test]
    fn literals_with_quotes_cannot_escape() {
        let sql = redshift_copy("stage", "s3://bucket/it's", "key", "secret");

        assert!(sql.contains("'s3://bucket/it''s'"));
    }
}
