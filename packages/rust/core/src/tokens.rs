//! Token counting and prompt cost estimates.

use tiktoken_rs::CoreBPE;
use tracing::debug;

use versebatch_shared::{Result, VersebatchError};

use crate::model::Pricing;

fn encoding_for(model: &str) -> Result<CoreBPE> {
    tiktoken_rs::get_bpe_from_model(model).or_else(|_| {
        debug!(model, "no tokenizer for model, using cl100k_base");
        tiktoken_rs::cl100k_base()
            .map_err(|e| VersebatchError::config(format!("cannot load tokenizer: {e}")))
    })
}

/// Number of tokens `text` encodes to under `model`'s tokenizer.
pub fn count_tokens(model: &str, text: &str) -> Result<usize> {
    Ok(encoding_for(model)?.encode_with_special_tokens(text).len())
}

/// Prompt cost in dollars for `tokens`, billed per started thousand and
/// rounded to cents. `None` for free models and those without a listed price.
pub fn estimate_cost(model: &str, tokens: usize) -> Option<f64> {
    let pricing = Pricing::for_model(model).filter(|p| p.prompt_per_1k > 0.0)?;
    let thousands = tokens.div_ceil(1000) as f64;
    Some((thousands * pricing.prompt_per_1k * 100.0).round() / 100.0)
}
