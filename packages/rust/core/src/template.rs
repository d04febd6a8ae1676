//! Prompt templates, per-item template variables and wordlists.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::debug;

use versebatch_shared::{Result, VersebatchError};
use versebatch_text::{count_words, normalize};

use crate::expr;
use crate::nearest::NearestExamples;

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A prompt with `{...}` placeholders.
///
/// A placeholder holding a variable name is replaced by that variable's
/// value. Anything else is evaluated as arithmetic over the numeric
/// variables, e.g. `{LEN * 2}` or `{max(LEN, 10)}`.
#[derive(Debug, Clone)]
pub struct Template {
    text: String,
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        std::fs::read_to_string(path)
            .map(Self::new)
            .map_err(|e| VersebatchError::io(path, e))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitute every placeholder. Fails on unknown names or bad
    /// expressions; the text is scanned once, so values are never re-expanded.
    pub fn expand(&self, vars: &Variables) -> Result<String> {
        static PLACEHOLDER_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"));

        let numeric = vars.numeric();
        let mut failure = None;

        let expanded = PLACEHOLDER_RE.replace_all(&self.text, |caps: &Captures<'_>| {
            let inner = &caps[1];
            if let Some(value) = vars.get(inner.trim()) {
                return value.to_string();
            }
            match expr::evaluate(inner, &numeric) {
                Ok(value) => expr::format_number(value),
                Err(e) => {
                    failure.get_or_insert_with(|| {
                        VersebatchError::Task(format!("cannot expand {{{inner}}}: {e}"))
                    });
                    String::new()
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(expanded.into_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// Named template values.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Values that parse as numbers, for use in expressions.
    fn numeric(&self) -> HashMap<String, f64> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.trim().parse::<f64>().ok().map(|n| (k.clone(), n)))
            .collect()
    }
}

/// Attribution phrase for an item id: `BH*` and `AB*` ids name their author.
pub fn author_for(id: &str) -> &'static str {
    if id.starts_with("BH") {
        "by Bahá’u’lláh"
    } else if id.starts_with("AB") {
        "by `Abdu’l-Bahá"
    } else {
        "from the Baha’i Writings"
    }
}

// ---------------------------------------------------------------------------
// Wordlist
// ---------------------------------------------------------------------------

/// Preferred translations for specific words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordlistEntry {
    pub original: String,
    pub translations: Vec<String>,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Annotated(String, Vec<String>, String),
    Plain(String, Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct Wordlist {
    entries: Vec<WordlistEntry>,
}

impl Wordlist {
    /// Parse JSON lines of `[original, [translations...]]` or
    /// `[original, [translations...], comment]`. Blank lines are skipped.
    pub fn parse(source: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (n, line) in source.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawEntry = serde_json::from_str(line).map_err(|e| {
                VersebatchError::config(format!("wordlist line {}: {e}", n + 1))
            })?;
            entries.push(match raw {
                RawEntry::Plain(original, translations) => WordlistEntry {
                    original,
                    translations,
                    comment: None,
                },
                RawEntry::Annotated(original, translations, comment) => WordlistEntry {
                    original,
                    translations,
                    comment: Some(comment),
                },
            });
        }

        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| VersebatchError::io(path, e))?;
        let wordlist = Self::parse(&source)?;
        debug!(path = %path.display(), entries = wordlist.len(), "wordlist loaded");
        Ok(wordlist)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the entries whose original occurs in `text` (after
    /// normalization), or an empty string if none do.
    pub fn render(&self, text: &str) -> String {
        let haystack = normalize(text);
        let mut out = String::new();

        for entry in &self.entries {
            let needle = normalize(&entry.original);
            if needle.is_empty() || !haystack.contains(&needle) {
                continue;
            }

            let translations = entry.translations.join("; ");
            match &entry.comment {
                Some(comment) => out.push_str(&format!(
                    "{} => {translations}  (NOTE: {comment})\n",
                    entry.original
                )),
                None => out.push_str(&format!("{} => {translations}\n", entry.original)),
            }
        }

        if out.is_empty() {
            out
        } else {
            format!("Prefer using the following translations.\n{out}")
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt context
// ---------------------------------------------------------------------------

/// Builds the variables available to a work item's prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    wordlist: Option<Wordlist>,
    examples: Option<Arc<NearestExamples>>,
}

impl PromptContext {
    pub fn new(wordlist: Option<Wordlist>) -> Self {
        Self {
            wordlist,
            examples: None,
        }
    }

    /// Also provide `NEAREST_EXAMPLE_IN` and `NEAREST_EXAMPLE_OUT`.
    pub fn with_examples(mut self, examples: NearestExamples) -> Self {
        self.examples = Some(Arc::new(examples));
        self
    }

    /// `LEN`, `AUTHOR`, `WORDLIST`, `ID` and `INDEX` for one item.
    pub fn variables(&self, text: &str, id: &str, index: usize) -> Variables {
        let wordlist = self
            .wordlist
            .as_ref()
            .map(|w| w.render(text))
            .unwrap_or_default();

        let mut vars = Variables::new();
        vars.set("LEN", count_words(text))
            .set("AUTHOR", author_for(id))
            .set("WORDLIST", wordlist)
            .set("ID", id)
            .set("INDEX", index);
        vars
    }

    /// [`variables`](Self::variables) plus the nearest example pair, which is
    /// empty when no examples are loaded.
    pub async fn item_variables(&self, text: &str, id: &str, index: usize) -> Result<Variables> {
        let mut vars = self.variables(text, id, index);
        let (input, output) = match &self.examples {
            Some(examples) => examples.lookup(text).await?,
            None => Default::default(),
        };
        vars.set("NEAREST_EXAMPLE_IN", input)
            .set("NEAREST_EXAMPLE_OUT", output);
        Ok(vars)
    }
}
