use pubrag_core::config::Config;
use pubrag_core::traits::VectorIndex;
use pubrag_vector::LanceVectorIndex;

/// Print the configured index's size and last checkpoint.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Config::load()?.settings()?;
    let embedder_id = if settings.embedding.use_fake {
        format!("fake:xxhash:d{}", settings.embedding.dimension)
    } else {
        format!("bert:{}:d{}", settings.embedding.model_name, settings.embedding.dimension)
    };
    let index = LanceVectorIndex::open(
        &settings.index.path,
        &settings.index.table,
        settings.embedding.dimension,
        &embedder_id,
    )
    .await?;
    println!("index: path={} entries={}", index.path().display(), index.len().await?);
    for (key, value) in index.checkpoint().await? {
        println!("  {key} = {value}");
    }
    Ok(())
}
