use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

use pubrag_core::error::{Error, Result};

pub const ID_COLUMN: &str = "id";
pub const VECTOR_COLUMN: &str = "vector";
pub const DISTANCE_COLUMN: &str = "_distance";

pub fn vector_field(dim: i32) -> Field {
	Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true)
}

/// `(id, vector)` rows; one per indexed document.
pub fn build_vectors_schema(dim: usize) -> Result<Arc<Schema>> {
	let dim = arrow_dim(dim)?;
	Ok(Arc::new(Schema::new(vec![
		Field::new(ID_COLUMN, DataType::Utf8, false),
		vector_field(dim),
	])))
}

/// Dimension of the vector column in an existing table, if it has one.
pub fn stored_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
		_ => None,
	}
}

pub fn arrow_dim(dim: usize) -> Result<i32> {
	i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("embedding dimension {dim} is too large")))
}
