//! Batch prompting and document download pipelines for versebatch.
//!
//! This crate ties the worker pool, text validation and fetching together
//! into end-to-end runs (e.g. [`prompt_all`], [`map_reduce`],
//! [`download_csv`]), plus the model client and prompt templates they use.
//! Nearest-example lookup, interactive chat and token counting sit alongside.

pub mod chat;
pub mod embeddings;
pub mod expr;
pub mod input;
pub mod model;
pub mod nearest;
pub mod output;
pub mod pipelines;
pub mod template;
pub mod tokens;

pub use chat::{ChatSession, read_message};
pub use embeddings::{
    Embedder, EmbeddingClient, NgramEmbedding, OpenAiEmbeddings, compute_embeddings, similarity,
};
pub use model::{
    ChatMessage, Completion, MathModel, Model, ModelClient, OpenAiClient, Pricing, Role, TokenUsage,
};
pub use nearest::{ExampleSet, NearestExamples};
pub use output::OutputWriter;
pub use pipelines::{
    DownloadReport, DownloadRow, MapReduceSettings, ProgressReporter, PromptSettings, SharedProgress,
    SilentProgress, download_csv, download_url, map_reduce, parse_download_csv, prompt_all,
    prompt_folder, prompt_one,
};
pub use template::{PromptContext, Template, Variables, Wordlist};
pub use tokens::{count_tokens, estimate_cost};
