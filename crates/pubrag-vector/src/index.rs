use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use pubrag_core::error::{Error, Result};
use pubrag_core::traits::VectorIndex;
use pubrag_core::types::{DocumentId, SearchHit};

use crate::schema::{self, ID_COLUMN, DISTANCE_COLUMN};
use crate::table::{ensure_meta_table, ensure_table, get_meta, open_db, set_meta, set_meta_many, sql_quote};

/// Candidates fetched per requested hit before the tie-break sort.
pub const SEARCH_OVERFETCH: usize = 10;

/// Ids per `IN (...)` predicate when deleting.
const DELETE_CHUNK: usize = 500;

pub const META_DIM: &str = "dim";
pub const META_EMBEDDER: &str = "embedder_id";
pub const META_ENTRIES: &str = "entries";
pub const META_CHECKPOINT: &str = "checkpoint_at";

fn index_err(e: impl std::fmt::Display) -> Error {
    Error::Index(e.to_string())
}

/// Cosine-similarity index over document embeddings, stored as a LanceDB table.
///
/// One row per document id. A sibling `<table>_meta` table records the
/// dimension and embedder id the vectors were built with, plus the last
/// checkpoint written by [`VectorIndex::persist`].
pub struct LanceVectorIndex {
    db: Connection,
    path: PathBuf,
    table_name: String,
    meta_table: String,
    dim: usize,
    embedder_id: String,
}

impl LanceVectorIndex {
    /// Open or create the index at `path`. An existing table built with a
    /// different dimension is refused.
    pub async fn open(path: &Path, table: &str, dim: usize, embedder_id: &str) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("index dimension must be positive".into()));
        }
        std::fs::create_dir_all(path)?;
        let uri = path.to_string_lossy();
        let db = open_db(uri.as_ref()).await.map_err(index_err)?;
        let index = Self {
            db,
            path: path.to_path_buf(),
            table_name: table.to_string(),
            meta_table: format!("{table}_meta"),
            dim,
            embedder_id: embedder_id.to_string(),
        };
        index.check_existing().await?;

        ensure_table(&index.db, &index.table_name, schema::build_vectors_schema(dim)?).await.map_err(index_err)?;
        ensure_meta_table(&index.db, &index.meta_table).await.map_err(index_err)?;
        set_meta(&index.db, &index.meta_table, META_DIM, &dim.to_string()).await.map_err(index_err)?;
        info!(path = %index.path.display(), table, dim, "vector index ready");
        Ok(index)
    }

    async fn check_existing(&self) -> Result<()> {
        if self.db.table_names().execute().await.map_err(index_err)?.contains(&self.table_name) {
            let table = self.open_table().await?;
            let arrow_schema = table.schema().await.map_err(index_err)?;
            match schema::stored_dim(&arrow_schema) {
                Some(actual) if actual != self.dim => {
                    return Err(Error::DimensionMismatch { expected: self.dim, actual });
                }
                Some(_) => {}
                None => return Err(Error::Index(format!("table '{}' has no vector column", self.table_name))),
            }
        }
        if let Some(stored) = get_meta(&self.db, &self.meta_table, META_DIM).await.map_err(index_err)? {
            if let Ok(actual) = stored.parse::<usize>() {
                if actual != self.dim {
                    return Err(Error::DimensionMismatch { expected: self.dim, actual });
                }
            }
        }
        if let Some(stored) = get_meta(&self.db, &self.meta_table, META_EMBEDDER).await.map_err(index_err)? {
            if stored != self.embedder_id {
                warn!(stored = %stored, current = %self.embedder_id, "index was built with a different embedder; run reindex");
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last checkpoint written by `persist`, as key/value pairs.
    pub async fn checkpoint(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for key in [META_DIM, META_EMBEDDER, META_ENTRIES, META_CHECKPOINT] {
            if let Some(v) = get_meta(&self.db, &self.meta_table, key).await.map_err(index_err)? {
                out.insert(key.to_string(), v);
            }
        }
        Ok(out)
    }

    async fn open_table(&self) -> Result<Table> {
        self.db.open_table(&self.table_name).execute().await.map_err(index_err)
    }

    fn check_dim(&self, actual: usize) -> Result<()> {
        if actual == self.dim { Ok(()) } else { Err(Error::DimensionMismatch { expected: self.dim, actual }) }
    }

    fn to_record_batch(&self, entries: &[(DocumentId, Vec<f32>)]) -> Result<RecordBatch> {
        let schema = schema::build_vectors_schema(self.dim)?;
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        let vectors = entries.iter().map(|(_, v)| Some(v.iter().copied().map(Some).collect::<Vec<_>>()));
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, schema::arrow_dim(self.dim)?);
        RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(ids)), Arc::new(vectors)]).map_err(index_err)
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn add_batch(&self, entries: &[(DocumentId, Vec<f32>)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        for (_, v) in entries {
            self.check_dim(v.len())?;
        }
        // merge_insert rejects duplicate keys in one source; the last entry wins.
        let mut latest: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, (id, _)) in entries.iter().enumerate() {
            latest.insert(id.as_str(), i);
        }
        let mut positions: Vec<usize> = latest.into_values().collect();
        positions.sort_unstable();
        let unique: Vec<(DocumentId, Vec<f32>)> = positions.into_iter().map(|i| entries[i].clone()).collect();

        let batch = self.to_record_batch(&unique)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let table = self.open_table().await?;
        let mut mi = table.merge_insert(&[ID_COLUMN]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(index_err)?;
        debug!(written = unique.len(), "vector entries upserted");
        Ok(unique.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check_dim(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let table = self.open_table().await?;
        if table.count_rows(None).await.map_err(index_err)? == 0 {
            return Ok(Vec::new());
        }
        let mut stream = table
            .vector_search(query.to_vec())
            .map_err(index_err)?
            .distance_type(DistanceType::Cosine)
            .select(Select::columns(&[ID_COLUMN]))
            .limit(k.saturating_mul(SEARCH_OVERFETCH))
            .execute()
            .await
            .map_err(index_err)?;

        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(index_err)? {
            let ids = batch
                .column_by_name(ID_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::Index("search result has no id column".into()))?;
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| Error::Index("search result has no distance column".into()))?;
            for i in 0..batch.num_rows() {
                hits.push(SearchHit { id: ids.value(i).to_string(), score: 1.0 - distances.value(i) });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove(&self, ids: &[DocumentId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.open_table().await?;
        let before = table.count_rows(None).await.map_err(index_err)?;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let list = chunk.iter().map(|id| format!("'{}'", sql_quote(id))).collect::<Vec<_>>().join(", ");
            table.delete(&format!("{ID_COLUMN} IN ({list})")).await.map_err(index_err)?;
        }
        let after = table.count_rows(None).await.map_err(index_err)?;
        Ok(before.saturating_sub(after))
    }

    async fn ids(&self) -> Result<Vec<DocumentId>> {
        let table = self.open_table().await?;
        let mut stream = table
            .query()
            .select(Select::columns(&[ID_COLUMN]))
            .execute()
            .await
            .map_err(index_err)?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(index_err)? {
            let col = batch
                .column_by_name(ID_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::Index("id column missing".into()))?;
            out.extend((0..col.len()).map(|i| col.value(i).to_string()));
        }
        out.sort();
        Ok(out)
    }

    async fn len(&self) -> Result<usize> {
        self.open_table().await?.count_rows(None).await.map_err(index_err)
    }

    async fn clear(&self) -> Result<()> {
        self.open_table().await?.delete(&format!("{ID_COLUMN} IS NOT NULL")).await.map_err(index_err)?;
        info!(table = %self.table_name, "vector index cleared");
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let entries = self.len().await?;
        set_meta_many(
            &self.db,
            &self.meta_table,
            &[
                (META_DIM, self.dim.to_string()),
                (META_EMBEDDER, self.embedder_id.clone()),
                (META_ENTRIES, entries.to_string()),
                (META_CHECKPOINT, Utc::now().to_rfc3339()),
            ],
        )
        .await
        .map_err(index_err)?;
        debug!(entries, "index checkpoint written");
        Ok(())
    }
}
