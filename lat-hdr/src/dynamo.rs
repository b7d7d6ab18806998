use std::collections::HashMap;

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::{HdrError, Result};
use crate::record::{FieldValue, Row, TIME_COLUMN, WriteRecord};
use crate::store::{QueryStatement, SummaryStore};

pub const DEFAULT_TABLE_NAME: &str = "latency-summaries";

const MEASUREMENT_KEY: &str = "measurement";
const SORT_KEY: &str = "sk";
const TAGS_ATTR: &str = "tags";

/// Summary rows in a DynamoDB table.
///
/// Partition key `measurement`, sort key `sk = "<zero-padded ns>#<k=v,...>"`, so a
/// rewrite of the same series and window replaces the earlier item.
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
    table: String,
}

impl DynamoStore {
    pub fn new(client: Client, table: String) -> Self {
        Self { client, table }
    }
}

fn sort_key_prefix(timestamp_ns: i64) -> String {
    format!("{:020}", timestamp_ns.max(0))
}

/// Percent-escapes the separators used inside the sort key.
fn escape_key_part(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | ',' | '=' | '#' => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn sort_key(record: &WriteRecord) -> String {
    let series: Vec<String> = record
        .tags
        .iter()
        .map(|(k, v)| format!("{}={}", escape_key_part(k), escape_key_part(v)))
        .collect();
    format!("{}#{}", sort_key_prefix(record.timestamp_ns), series.join(","))
}

fn field_to_attr(value: &FieldValue) -> AttributeValue {
    match value {
        FieldValue::Str(s) => AttributeValue::S(s.clone()),
        FieldValue::Int(v) => AttributeValue::N(v.to_string()),
        FieldValue::UInt(v) => AttributeValue::N(v.to_string()),
        FieldValue::Float(v) => AttributeValue::N(v.to_string()),
    }
}

fn attr_to_field(value: &AttributeValue) -> Option<FieldValue> {
    match value {
        AttributeValue::S(s) => Some(FieldValue::Str(s.clone())),
        AttributeValue::N(n) => {
            if let Ok(v) = n.parse::<i64>() {
                Some(FieldValue::Int(v))
            } else if let Ok(v) = n.parse::<u64>() {
                Some(FieldValue::UInt(v))
            } else {
                n.parse::<f64>().ok().map(FieldValue::Float)
            }
        }
        AttributeValue::Bool(b) => Some(FieldValue::Str(b.to_string())),
        _ => None,
    }
}

/// Converts a WriteRecord into a HashMap of AttributeValues ready for DynamoDB
fn record_to_item(record: &WriteRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();

    item.insert(
        MEASUREMENT_KEY.to_string(),
        AttributeValue::S(record.measurement.clone()),
    );
    item.insert(SORT_KEY.to_string(), AttributeValue::S(sort_key(record)));
    item.insert(
        TIME_COLUMN.to_string(),
        AttributeValue::N(record.timestamp_ns.to_string()),
    );

    let tags = record
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), AttributeValue::S(v.clone())))
        .collect();
    item.insert(TAGS_ATTR.to_string(), AttributeValue::M(tags));

    for (name, value) in &record.fields {
        item.insert(name.clone(), field_to_attr(value));
    }
    item
}

fn item_to_row(item: &HashMap<String, AttributeValue>) -> Row {
    let mut row = Row::new();
    for (name, value) in item {
        match name.as_str() {
            MEASUREMENT_KEY | SORT_KEY => {}
            TAGS_ATTR => {
                if let AttributeValue::M(tags) = value {
                    for (k, v) in tags {
                        if let Some(v) = attr_to_field(v) {
                            row.insert(k, v);
                        }
                    }
                }
            }
            _ => {
                if let Some(v) = attr_to_field(value) {
                    row.insert(name, v);
                }
            }
        }
    }
    row
}

/// Filter expression and placeholder bindings for the statement's tag filters.
fn filter_expression(
    statement: &QueryStatement,
) -> Option<(String, Vec<(String, String)>, Vec<(String, AttributeValue)>)> {
    if statement.filters.is_empty() {
        return None;
    }
    let mut clauses = Vec::new();
    let mut names = vec![("#tags".to_string(), TAGS_ATTR.to_string())];
    let mut values = Vec::new();
    for (i, (tag, allowed)) in statement.filters.iter().enumerate() {
        let name = format!("#t{i}");
        let placeholders: Vec<String> = allowed
            .iter()
            .enumerate()
            .map(|(j, v)| {
                let p = format!(":t{i}_{j}");
                values.push((p.clone(), AttributeValue::S(v.clone())));
                p
            })
            .collect();
        clauses.push(format!("#tags.{name} IN ({})", placeholders.join(", ")));
        names.push((name, tag.clone()));
    }
    Some((clauses.join(" AND "), names, values))
}

impl SummaryStore for DynamoStore {
    async fn query(&self, statement: &QueryStatement) -> Result<Vec<Row>> {
        let (Some(start), Some(end)) = (
            statement.start.timestamp_nanos_opt(),
            statement.end.timestamp_nanos_opt(),
        ) else {
            return Err(HdrError::UpstreamQuery(format!(
                "time range out of bounds: {statement}"
            )));
        };
        log::debug!("dynamodb query: {statement}");

        let filter = filter_expression(statement);
        let mut rows = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            // Every item key carries a '#' suffix, so BETWEEN on bare prefixes is [start, end).
            let mut req = self
                .client
                .query()
                .table_name(&self.table)
                .key_condition_expression("#m = :m AND #sk BETWEEN :lo AND :hi")
                .expression_attribute_names("#m", MEASUREMENT_KEY)
                .expression_attribute_names("#sk", SORT_KEY)
                .expression_attribute_values(":m", AttributeValue::S(statement.measurement.clone()))
                .expression_attribute_values(":lo", AttributeValue::S(sort_key_prefix(start)))
                .expression_attribute_values(":hi", AttributeValue::S(sort_key_prefix(end)))
                .set_exclusive_start_key(exclusive_start_key.take());

            if let Some((expr, names, values)) = &filter {
                req = req.filter_expression(expr);
                for (k, v) in names {
                    req = req.expression_attribute_names(k, v);
                }
                for (k, v) in values {
                    req = req.expression_attribute_values(k, v.clone());
                }
            }

            let out = req
                .send()
                .await
                .map_err(|e| HdrError::UpstreamQuery(format!("DynamoDB query failed: {e}")))?;
            rows.extend(out.items().iter().map(item_to_row));

            match out.last_evaluated_key() {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key.clone()),
                _ => break,
            }
        }
        Ok(rows)
    }

    async fn write(&self, record: WriteRecord) -> Result<()> {
        let item = record_to_item(&record);

        match self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
        {
            Ok(_) => {
                log::debug!(
                    "stored {} row at {}",
                    record.measurement,
                    record.timestamp_ns
                );
                Ok(())
            }
            Err(e) => Err(HdrError::Write(format!("DynamoDB storage failed: {e}"))),
        }
    }
}
