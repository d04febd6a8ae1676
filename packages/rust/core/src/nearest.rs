//! Nearest-example lookup: pick the example translation whose input is most
//! similar to the text being prompted.

use std::path::Path;

use tracing::debug;

use versebatch_shared::{Result, VersebatchError};

use crate::embeddings::{Embedder, EmbeddingClient, similarity};

/// Parallel example inputs, outputs and input embeddings.
#[derive(Debug, Clone, Default)]
pub struct ExampleSet {
    inputs: Vec<String>,
    outputs: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl ExampleSet {
    /// Build from line-aligned sources. `embeddings` holds one JSON array per
    /// line; blank lines are skipped.
    pub fn parse(inputs: &str, outputs: &str, embeddings: &str) -> Result<Self> {
        let inputs: Vec<String> = inputs.lines().map(str::to_string).collect();
        let outputs: Vec<String> = outputs.lines().map(str::to_string).collect();

        let mut vectors: Vec<Vec<f32>> = Vec::new();
        for (n, line) in embeddings.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let vector: Vec<f32> = serde_json::from_str(line).map_err(|e| {
                VersebatchError::config(format!("embeddings line {}: {e}", n + 1))
            })?;
            let expected = vectors.first().map_or(vector.len(), Vec::len);
            if vector.len() != expected {
                return Err(VersebatchError::config(format!(
                    "embeddings line {} has {} dimensions, expected {expected}",
                    n + 1,
                    vector.len(),
                )));
            }
            vectors.push(vector);
        }

        if outputs.len() != inputs.len() {
            return Err(VersebatchError::config(format!(
                "wrong number of output examples; expected {} but got {}",
                inputs.len(),
                outputs.len()
            )));
        }
        if vectors.len() != inputs.len() {
            return Err(VersebatchError::config(format!(
                "wrong number of example embeddings; expected {} but got {}",
                inputs.len(),
                vectors.len()
            )));
        }

        Ok(Self {
            inputs,
            outputs,
            embeddings: vectors,
        })
    }

    /// Load from files. All three paths must be given together, or none.
    pub fn load(
        inputs: Option<&Path>,
        outputs: Option<&Path>,
        embeddings: Option<&Path>,
    ) -> Result<Option<Self>> {
        let (inputs, outputs, embeddings) = match (inputs, outputs, embeddings) {
            (None, None, None) => return Ok(None),
            (Some(i), Some(o), Some(e)) => (i, o, e),
            (Some(_), _, _) => {
                return Err(VersebatchError::config(
                    "--examples-in also requires --examples-out and --examples-embeddings",
                ));
            }
            (None, _, _) => {
                return Err(VersebatchError::config(
                    "--examples-out and --examples-embeddings require --examples-in",
                ));
            }
        };

        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|e| VersebatchError::io(path, e))
        };
        let set = Self::parse(&read(inputs)?, &read(outputs)?, &read(embeddings)?)?;
        debug!(examples = set.len(), "examples loaded");
        Ok(Some(set))
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// The example pair with the highest similarity; the first wins ties.
    pub fn nearest(&self, embedding: &[f32]) -> Result<Option<(&str, &str)>> {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in self.embeddings.iter().enumerate() {
            if candidate.len() != embedding.len() {
                return Err(VersebatchError::validation(format!(
                    "embedding has {} dimensions but examples have {}",
                    embedding.len(),
                    candidate.len()
                )));
            }
            let score = similarity(candidate, embedding);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((i, score));
            }
        }
        Ok(best.map(|(i, _)| (self.inputs[i].as_str(), self.outputs[i].as_str())))
    }
}

/// Example set plus the embedder used to place new text among it.
#[derive(Debug)]
pub struct NearestExamples {
    set: ExampleSet,
    embedder: Embedder,
}

impl NearestExamples {
    pub fn new(set: ExampleSet, embedder: Embedder) -> Self {
        Self { set, embedder }
    }

    /// Example input and output closest to `text`; empty strings when the
    /// set is empty.
    pub async fn lookup(&self, text: &str) -> Result<(String, String)> {
        let embedding = self.embedder.embed(text).await?;
        Ok(self
            .set
            .nearest(&embedding)?
            .map(|(i, o)| (i.to_string(), o.to_string()))
            .unwrap_or_default())
    }
}
