//! LanceDB connection and housekeeping helpers.
//!
//! Provides database open functions, an ensure helper for tables, and a simple
//! key/value metadata table holding the index checkpoint (dimension, embedder
//! id, entry count).
use anyhow::Result;
use lancedb::{connect, Connection};

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use std::sync::Arc;
use chrono::Utc;
use lancedb::query::{QueryBase, ExecutableQuery};

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

fn build_meta_schema() -> Arc<arrow_schema::Schema> {
    Arc::new(arrow_schema::Schema::new(vec![
        arrow_schema::Field::new("key", arrow_schema::DataType::Utf8, false),
        arrow_schema::Field::new("value", arrow_schema::DataType::Utf8, false),
        arrow_schema::Field::new("updated_at", arrow_schema::DataType::Timestamp(arrow_schema::TimeUnit::Millisecond, None), false),
    ]))
}

pub async fn ensure_meta_table(conn: &Connection, name: &str) -> Result<()> {
    ensure_table(conn, name, build_meta_schema()).await
}

/// Upsert several keys in one commit.
pub async fn set_meta_many(conn: &Connection, table: &str, entries: &[(&str, String)]) -> Result<()> {
    if entries.is_empty() { return Ok(()); }
    ensure_meta_table(conn, table).await?;
    let t = conn.open_table(table).execute().await?;
    let now = Utc::now().timestamp_millis();
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(entries.iter().map(|(k, _)| (*k).to_string()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(entries.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>())),
            Arc::new(TimestampMillisecondArray::from(vec![now; entries.len()])),
        ],
    )?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // Upsert behavior via merge_insert: key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await?;
    Ok(())
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    set_meta_many(conn, table, &[(key, value.to_string())]).await
}

pub async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, table).await? { return Ok(None); }
    let t = conn.open_table(table).execute().await?;
    let mut stream = t.query().only_if(format!("key = '{}'", sql_quote(key))).execute().await?;
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await? {
        if batch.num_rows() == 0 { continue; }
        let val = batch.column_by_name("value").and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow::anyhow!("meta.value column missing"))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

/// Escape a value for a single-quoted Lance SQL literal.
pub fn sql_quote(value: &str) -> String {
    value.replace('\'', "''")
}
