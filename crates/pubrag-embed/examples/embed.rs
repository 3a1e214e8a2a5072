use pubrag_core::config::Config;
use pubrag_core::traits::Embedder;
use pubrag_embed::get_default_embedder;

fn main() -> anyhow::Result<()> {
    let settings = Config::load()?.settings()?;
    let embedder = get_default_embedder(&settings.embedding)?;
    let texts = vec!["Hirschsprung disease".to_string(), "RET proto-oncogene".to_string()];
    let embs = embedder.embed_batch(&texts)?;
    println!("model={} B={} dim={}", embedder.model_id(), embs.len(), embedder.dim());
    Ok(())
}
