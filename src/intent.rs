//! Intent labelling by nearest example phrase, and greedy grouping of
//! intent labels that mean nearly the same thing.

use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::ranker::cosine_similarity;
use crate::types::DEFAULT_INTENT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// One label with the phrases that exemplify it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentLabel {
    pub name: String,
    pub examples: Vec<String>,
}

/// Ordered set of labels. Order decides ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentLibrary {
    labels: Vec<IntentLabel>,
}

const BUILTIN: &[(&str, &[&str])] = &[
    ("greeting", &["hello", "hi there", "good morning", "good evening", "what's up"]),
    ("farewell", &["goodbye", "see you later", "take care"]),
    ("question", &["why did this happen", "how does this work", "what should i do"]),
    ("help_request", &["can you help me", "could you support me", "i have a question"]),
    ("confirmation", &["yes", "i agree", "that's right"]),
    ("rejection", &["no", "i disagree", "that's wrong"]),
    ("positive_emotion", &["i'm happy", "i'm excited", "i feel great"]),
    ("negative_emotion", &["i'm sad", "i'm unhappy", "i'm bored", "i'm angry"]),
    ("thanks", &["thank you", "thanks a lot", "i'm grateful"]),
    ("apology", &["i'm sorry", "pardon me", "excuse me"]),
    ("tech_support", &["the app won't open", "reset my password", "i can't log in"]),
    ("coding", &["what is python", "if else example", "how to navigate between pages"]),
    ("medical", &["i have a fever", "my head hurts", "can you recommend a medicine"]),
    ("user_info", &["i'm a doctor", "i'm a student", "i am 23 years old"]),
    ("info_request", &["give me information", "explain in detail", "tell me about this"]),
    ("recommendation", &["which books do you recommend", "what should i watch", "what do you suggest"]),
    ("chitchat", &["i'm bored", "let's talk a bit", "let's just chat"]),
    ("joke", &["tell me a joke", "say something funny", "do you know a joke"]),
    ("motivation", &["say something motivating", "give me strength", "a positive sentence"]),
    ("system", &["reset the settings", "delete my data", "close my account"]),
];

impl Default for IntentLibrary {
    fn default() -> Self {
        Self {
            labels: BUILTIN
                .iter()
                .map(|(name, examples)| IntentLabel {
                    name: name.to_string(),
                    examples: examples.iter().map(|e| e.to_string()).collect(),
                })
                .collect(),
        }
    }
}

impl IntentLibrary {
    pub fn new(labels: Vec<IntentLabel>) -> Result<Self> {
        let library = Self { labels };
        library.validate()?;
        Ok(library)
    }

    /// Load a YAML list of `{name, examples}` entries
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let library: Self = serde_yaml::from_str(&content)?;
        library.validate()?;
        info!(path = %path.display(), labels = library.labels.len(), "loaded intent library");
        Ok(library)
    }

    fn validate(&self) -> Result<()> {
        for (i, label) in self.labels.iter().enumerate() {
            if label.name.trim().is_empty() {
                return Err(Error::validation("intent label name must not be empty"));
            }
            if label.examples.iter().all(|e| e.trim().is_empty()) {
                return Err(Error::validation(format!(
                    "intent {:?} has no examples",
                    label.name
                )));
            }
            if self.labels[..i].iter().any(|l| l.name == label.name) {
                return Err(Error::validation(format!(
                    "intent {:?} is defined twice",
                    label.name
                )));
            }
        }
        Ok(())
    }

    pub fn labels(&self) -> &[IntentLabel] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Outcome of classifying one text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    pub score: f64,
}

struct CachedExample {
    label: usize,
    embedding: Vec<f32>,
}

/// Nearest-example classifier with example embeddings computed once per library
pub struct IntentClassifier {
    library: IntentLibrary,
    examples: Vec<CachedExample>,
    floor: f64,
}

impl IntentClassifier {
    pub fn new(library: IntentLibrary, embedder: &dyn Embedder, floor: f64) -> Result<Self> {
        let examples = Self::embed_examples(&library, embedder)?;
        Ok(Self {
            library,
            examples,
            floor,
        })
    }

    fn embed_examples(library: &IntentLibrary, embedder: &dyn Embedder) -> Result<Vec<CachedExample>> {
        let mut owners = Vec::new();
        let mut texts: Vec<&str> = Vec::new();
        for (label, entry) in library.labels.iter().enumerate() {
            for example in entry.examples.iter().filter(|e| !e.trim().is_empty()) {
                owners.push(label);
                texts.push(example.as_str());
            }
        }

        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts)?
        };
        debug!(examples = embeddings.len(), embedder = embedder.name(), "cached intent examples");

        Ok(owners
            .into_iter()
            .zip(embeddings)
            .map(|(label, embedding)| CachedExample { label, embedding })
            .collect())
    }

    /// Replace the library and rebuild the example cache
    pub fn set_library(&mut self, library: IntentLibrary, embedder: &dyn Embedder) -> Result<()> {
        self.examples = Self::embed_examples(&library, embedder)?;
        self.library = library;
        Ok(())
    }

    pub fn library(&self) -> &IntentLibrary {
        &self.library
    }

    /// Best label for `text`, or the generic label when nothing reaches the floor.
    ///
    /// The first example to reach the running maximum keeps it.
    pub fn classify(&self, text: &str, embedder: &dyn Embedder) -> Result<Classification> {
        let query = embedder.embed(text)?;

        let mut best: Option<(usize, f64)> = None;
        for example in &self.examples {
            let Some(score) = cosine_similarity(&query, &example.embedding) else {
                continue;
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((example.label, score));
            }
        }

        let classification = match best {
            Some((label, score)) if score >= self.floor => Classification {
                label: self.library.labels[label].name.clone(),
                score,
            },
            Some((_, score)) => Classification {
                label: DEFAULT_INTENT.to_string(),
                score,
            },
            None => Classification {
                label: DEFAULT_INTENT.to_string(),
                score: 0.0,
            },
        };

        debug!(label = %classification.label, score = classification.score, "classified intent");
        Ok(classification)
    }
}

/// Group labels whose own embeddings are at least `threshold` similar.
///
/// Greedy single pass in input order: each ungrouped label seeds a group and
/// absorbs every later ungrouped label close to it. Singletons are dropped.
pub fn cluster_labels(
    labels: &[String],
    embedder: &dyn Embedder,
    threshold: f64,
) -> Result<Vec<Vec<String>>> {
    let mut unique: Vec<&str> = Vec::new();
    for label in labels {
        if !unique.contains(&label.as_str()) {
            unique.push(label);
        }
    }
    if unique.len() < 2 {
        return Ok(Vec::new());
    }

    let embeddings = embedder.embed_batch(&unique)?;
    let mut grouped = vec![false; unique.len()];
    let mut groups = Vec::new();

    for i in 0..unique.len() {
        if grouped[i] {
            continue;
        }
        let mut group = vec![unique[i].to_string()];
        for j in (i + 1)..unique.len() {
            if grouped[j] {
                continue;
            }
            let similar = cosine_similarity(&embeddings[i], &embeddings[j])
                .is_some_and(|score| score >= threshold);
            if similar {
                grouped[j] = true;
                group.push(unique[j].to_string());
            }
        }
        if group.len() > 1 {
            grouped[i] = true;
            groups.push(group);
        }
    }

    Ok(groups)
}
