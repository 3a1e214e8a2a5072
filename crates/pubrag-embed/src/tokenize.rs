use anyhow::{anyhow, bail, Result};
use candle_core::{Device, Tensor};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Token tensors for one batch, all shaped `[B, T]`.
pub struct TokenBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

/// Truncate to `max_len` tokens and pad every batch to its longest member.
pub fn configure_tokenizer(tokenizer: &mut Tokenizer, max_len: usize) -> Result<()> {
    tokenizer.with_padding(Some(PaddingParams { strategy: PaddingStrategy::BatchLongest, ..Default::default() }));
    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    Ok(())
}

pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], device: &Device) -> Result<TokenBatch> {
    let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let encodings = tokenizer.encode_batch(inputs, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let batch = encodings.len();
    let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());
    if batch == 0 || seq_len == 0 { bail!("Tokenizer produced an empty batch"); }

    let mut ids = Vec::with_capacity(batch * seq_len);
    let mut mask = Vec::with_capacity(batch * seq_len);
    for enc in &encodings {
        if enc.get_ids().len() != seq_len { bail!("Tokenizer produced a ragged batch; padding is not configured"); }
        ids.extend_from_slice(enc.get_ids());
        mask.extend_from_slice(enc.get_attention_mask());
    }
    let input_ids = Tensor::from_vec(ids, (batch, seq_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (batch, seq_len), device)?;
    let token_type_ids = input_ids.zeros_like()?;
    Ok(TokenBatch { input_ids, attention_mask, token_type_ids })
}
