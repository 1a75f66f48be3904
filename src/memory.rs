use crate::config::{
    default_data_path, find_data_path, intent_library_file, ProjectConfig, Settings,
};
use crate::embeddings::{get_embedder, Embedder};
use crate::error::{Error, Result};
use crate::index::MemoryStore;
use crate::intent::{cluster_labels, Classification, IntentClassifier, IntentLibrary};
use crate::ranker::{self, MatchPolicy};
use crate::stats::{self, TransitionMatrix};
use crate::types::{
    CleanupFilter, IntentStat, Match, MatchLogEntry, MemoryRecord, MemoryStats, MemoryUpdate,
    NewMemory, Scored,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything `learn_with` accepts
#[derive(Debug, Clone, Default)]
pub struct LearnRequest {
    pub prompt: String,
    pub response: String,
    /// Classified from the prompt when absent
    pub intent: Option<String>,
    pub tags: Vec<String>,
    pub priority: Option<u32>,
    pub category: Option<String>,
}

/// The caller-facing memory interface
pub struct MemoryEngine {
    data_path: Option<PathBuf>,
    store: MemoryStore,
    embedder: Box<dyn Embedder>,
    classifier: IntentClassifier,
    settings: Settings,
}

impl MemoryEngine {
    /// Open the memory store found from the current directory
    pub fn open() -> Result<Self> {
        let data_path = find_data_path().unwrap_or_else(default_data_path);
        if !data_path.exists() {
            fs::create_dir_all(&data_path)?;
        }
        Self::open_at(data_path)
    }

    /// Open a memory store at a specific data directory
    pub fn open_at(data_path: PathBuf) -> Result<Self> {
        if !data_path.is_dir() {
            return Err(Error::Config(format!(
                "data directory does not exist: {}",
                data_path.display()
            )));
        }

        let settings = ProjectConfig::new(data_path.clone())?.settings()?;
        let store = MemoryStore::open(&data_path.join("memory.db"))?;
        let embedder = get_embedder(&settings);
        let library = match intent_library_file(&data_path) {
            Some(path) => IntentLibrary::load(&path)?,
            None => IntentLibrary::default(),
        };

        let mut engine = Self::with_library(store, embedder, settings, library)?;
        engine.data_path = Some(data_path);
        Ok(engine)
    }

    /// Initialize a new data directory under `path`
    pub fn init(path: &Path) -> Result<Self> {
        let data_path = path.join(crate::config::DATA_DIR);
        fs::create_dir_all(&data_path)?;
        info!(path = %data_path.display(), "initialized data directory");
        Self::open_at(data_path)
    }

    /// Assemble an engine from parts, using the built-in intent library
    pub fn with_parts(store: MemoryStore, embedder: Box<dyn Embedder>, settings: Settings) -> Result<Self> {
        Self::with_library(store, embedder, settings, IntentLibrary::default())
    }

    pub fn with_library(
        store: MemoryStore,
        embedder: Box<dyn Embedder>,
        settings: Settings,
        library: IntentLibrary,
    ) -> Result<Self> {
        settings.validate()?;
        let classifier = IntentClassifier::new(library, embedder.as_ref(), settings.classifier_floor)?;
        debug!(embedder = embedder.name(), "memory engine ready");

        Ok(Self {
            data_path: None,
            store,
            embedder,
            classifier,
            settings,
        })
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    fn default_policy(&self) -> MatchPolicy {
        MatchPolicy::with_threshold(self.settings.confidence_threshold)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        self.embedder.embed(query.trim())
    }

    // =========================================================================
    // Learning
    // =========================================================================

    /// Store a new prompt/response pair
    pub fn learn(&self, prompt: &str, response: &str, intent: Option<&str>) -> Result<i64> {
        self.learn_with(LearnRequest {
            prompt: prompt.to_string(),
            response: response.to_string(),
            intent: intent.map(str::to_string),
            ..Default::default()
        })
    }

    /// Validate, embed, tag and store. Nothing is written if any step fails.
    pub fn learn_with(&self, request: LearnRequest) -> Result<i64> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(Error::validation("prompt must not be empty"));
        }
        if request.response.trim().is_empty() {
            return Err(Error::validation("response must not be empty"));
        }

        let embedding = self.embedder.embed(prompt)?;
        let intent = match request.intent.filter(|i| !i.trim().is_empty()) {
            Some(intent) => intent,
            None => self.classifier.classify(prompt, self.embedder.as_ref())?.label,
        };

        let mut memory = NewMemory::new(request.prompt.as_str(), request.response)
            .with_embedding(embedding)
            .with_intent(intent)
            .with_tags(request.tags);
        memory.priority = request.priority;
        memory.category = request.category;

        let id = self.store.create(memory)?;
        info!(id, "learned new memory");
        Ok(id)
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Best stored answer for `query` under the configured threshold
    pub fn find_best(&self, query: &str) -> Result<Match> {
        self.find_best_with(query, self.default_policy())
    }

    /// Best stored answer under an explicit policy. Does not touch statistics.
    pub fn find_best_with(&self, query: &str, policy: MatchPolicy) -> Result<Match> {
        let embedding = self.embed_query(query)?;
        let candidates = self.store.candidates()?;
        ranker::find_best(&embedding, &candidates, policy)
    }

    /// Answer a query: find the best match, log the attempt, and count the
    /// use when the match is served
    pub fn respond(&self, query: &str) -> Result<Match> {
        self.respond_with(query, self.default_policy())
    }

    pub fn respond_with(&self, query: &str, policy: MatchPolicy) -> Result<Match> {
        let found = self.find_best_with(query, policy)?;

        if let Some(id) = found.memory_id {
            let logged = self
                .store
                .log_match(id, query.trim(), found.score, found.is_accepted())?;
            let served = logged.is_some() && found.is_accepted();
            if served && !self.store.record_use(id, Some(found.score))? {
                debug!(id, "served memory was deleted before its use was recorded");
            }
        }

        Ok(found)
    }

    /// Up to `k` memories at or above the configured threshold, best first
    pub fn similar(&self, query: &str, k: usize) -> Result<Vec<(MemoryRecord, f64)>> {
        let embedding = self.embed_query(query)?;
        let candidates = self.store.candidates()?;
        let scored =
            ranker::top_matches(&embedding, &candidates, k, self.settings.confidence_threshold)?;
        self.resolve(scored)
    }

    fn resolve(&self, scored: Vec<Scored>) -> Result<Vec<(MemoryRecord, f64)>> {
        let mut results = Vec::with_capacity(scored.len());
        for s in scored {
            if let Some(record) = self.store.get(s.id)? {
                results.push((record, s.score));
            }
        }
        Ok(results)
    }

    /// Count a use of a memory; `false` when it no longer exists
    pub fn record_feedback(&self, id: i64, score: Option<f64>) -> Result<bool> {
        self.store.record_use(id, score)
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub fn get(&self, id: i64) -> Result<Option<MemoryRecord>> {
        self.store.get(id)
    }

    /// Newest first
    pub fn list(&self, limit: Option<usize>, offset: usize) -> Result<Vec<MemoryRecord>> {
        self.store.list_all(limit, offset)
    }

    pub fn update(&self, id: i64, update: MemoryUpdate) -> Result<bool> {
        self.store.update(id, update)
    }

    /// Re-embed every memory whose prompt changed since it was embedded
    pub fn refresh_stale(&self) -> Result<usize> {
        let mut refreshed = 0;
        for record in self.store.stale()? {
            let embedding = self.embedder.embed(record.prompt.trim())?;
            let update = MemoryUpdate {
                embedding: Some(embedding),
                ..Default::default()
            };
            if self.store.update(record.id, update)? {
                refreshed += 1;
            }
        }
        info!(refreshed, "re-embedded stale memories");
        Ok(refreshed)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        self.store.delete(id)
    }

    pub fn delete_by_intent(&self, intent: &str) -> Result<usize> {
        self.store.delete_by_intent(intent)
    }

    pub fn cleanup(&self, filter: &CleanupFilter) -> Result<usize> {
        self.store.delete_where(filter)
    }

    pub fn remove_duplicates(&self) -> Result<usize> {
        self.store.remove_duplicates()
    }

    pub fn clear_all(&self) -> Result<usize> {
        self.store.clear_all()
    }

    /// Every memory, newest first
    pub fn export_all(&self) -> Result<Vec<MemoryRecord>> {
        self.store.list_all(None, 0)
    }

    pub fn history(&self, id: i64) -> Result<Vec<MatchLogEntry>> {
        self.store.match_history(id)
    }

    // =========================================================================
    // Intents and statistics
    // =========================================================================

    pub fn classify(&self, text: &str) -> Result<Classification> {
        if text.trim().is_empty() {
            return Err(Error::validation("text must not be empty"));
        }
        self.classifier.classify(text.trim(), self.embedder.as_ref())
    }

    /// Swap the intent library; example embeddings are recomputed
    pub fn set_intent_library(&mut self, library: IntentLibrary) -> Result<()> {
        self.classifier.set_library(library, self.embedder.as_ref())
    }

    /// Groups of stored intent labels that are near-synonyms
    pub fn clusters(&self, threshold: Option<f64>) -> Result<Vec<Vec<String>>> {
        let threshold = threshold.unwrap_or(self.settings.cluster_threshold);
        let labels = self.store.distinct_intents()?;
        cluster_labels(&labels, self.embedder.as_ref(), threshold)
    }

    pub fn intent_stats(&self) -> Result<Vec<IntentStat>> {
        let records = self.store.all_by_id()?;
        let log = self.store.match_log()?;
        Ok(stats::intent_stats(&records, &log))
    }

    pub fn transitions(&self) -> Result<TransitionMatrix> {
        let records = self.store.all_by_id()?;
        let log = self.store.match_log()?;
        Ok(TransitionMatrix::from_log(&records, &log))
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(stats::memory_stats(&self.store.all_by_id()?))
    }

    /// Most valuable memories by usage and priority
    pub fn important(&self, top_n: usize) -> Result<Vec<MemoryRecord>> {
        let records = self.store.all_by_id()?;
        Ok(stats::important_learnings(&records, top_n)
            .into_iter()
            .cloned()
            .collect())
    }

    /// High-priority memories that have never been served
    pub fn unused(&self, min_priority: u32) -> Result<Vec<MemoryRecord>> {
        let records = self.store.all_by_id()?;
        Ok(stats::unused_high_priority(&records, min_priority)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn tags(&self) -> Result<Vec<(String, usize)>> {
        self.store.tags()
    }

    /// Embedding dimension the store is pinned to, once anything is embedded
    pub fn dimension(&self) -> Result<Option<usize>> {
        self.store.dimension()
    }
}
