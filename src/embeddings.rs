use crate::config::Settings;
use crate::error::{Error, Result};
use md5::{Digest, Md5};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Default embedding dimension for the lite embedder
pub const LITE_DIM: usize = 384;

/// Largest response accepted from the embedding daemon
const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

/// Text to fixed-length vector. Must be deterministic for identical text.
pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Name recorded in logs and `config` output
    fn name(&self) -> &str;
}

// =============================================================================
// LiteEmbedder - N-gram hashing
// =============================================================================

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"[\p{L}\p{N}_']+").expect("static word pattern"))
}

/// Lightweight embedder using character trigram and word hashing
pub struct LiteEmbedder {
    dim: usize,
}

impl Default for LiteEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteEmbedder {
    pub fn new() -> Self {
        Self { dim: LITE_DIM }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        (md5_hash(token) % self.dim as u128) as usize
    }
}

impl Embedder for LiteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return Err(Error::embedding("cannot embed empty text"));
        }

        let mut vector = vec![0.0f32; self.dim];

        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[self.bucket(&trigram)] += 1.0;
        }

        // Words weigh more than trigrams
        for word in word_pattern().find_iter(&text) {
            vector[self.bucket(word.as_str())] += 2.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(Error::embedding(format!(
                "no embeddable tokens in {:?}",
                text
            )));
        }
        for v in &mut vector {
            *v /= norm;
        }

        Ok(vector)
    }

    fn name(&self) -> &str {
        "lite"
    }
}

fn md5_hash(text: &str) -> u128 {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    u128::from_be_bytes(hasher.finalize().into())
}

// =============================================================================
// SocketEmbedder - Unix socket client for an external model daemon
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request<'a> {
    Embed { text: &'a str },
    EmbedBatch { texts: &'a [&'a str] },
    Ping,
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl Response {
    fn into_result(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(Error::embedding(
                self.error.unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }
}

/// Embedder backed by a model daemon listening on a Unix socket.
///
/// One JSON request per connection; the write half is shut down to mark the
/// end of the request.
pub struct SocketEmbedder {
    socket_path: PathBuf,
    timeout: Duration,
    expected_dim: Option<usize>,
}

impl SocketEmbedder {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(60),
            expected_dim: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject daemon vectors that do not have this length
    pub fn with_expected_dim(mut self, dim: usize) -> Self {
        self.expected_dim = Some(dim);
        self
    }

    /// Check that the daemon answers a ping
    pub fn is_running(&self) -> bool {
        self.socket_path.exists() && self.ping().is_ok()
    }

    /// Ping the daemon and return the model it serves
    pub fn ping(&self) -> Result<String> {
        let response = self.send(&Request::Ping)?;
        Ok(response.model.unwrap_or_default())
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        match self.expected_dim {
            Some(expected) if expected != vector.len() => Err(Error::embedding(format!(
                "daemon returned {} dimensions, expected {}",
                vector.len(),
                expected
            ))),
            _ => Ok(()),
        }
    }

    fn send(&self, request: &Request<'_>) -> Result<Response> {
        send_request(&self.socket_path, self.timeout, request)?.into_result()
    }
}

impl Embedder for SocketEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self
            .send(&Request::Embed { text })?
            .embedding
            .ok_or_else(|| Error::embedding("no embedding in response"))?;
        self.check_dim(&embedding)?;
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let embeddings = self
            .send(&Request::EmbedBatch { texts })?
            .embeddings
            .ok_or_else(|| Error::embedding("no embeddings in response"))?;
        if embeddings.len() != texts.len() {
            return Err(Error::embedding(format!(
                "daemon returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        for embedding in &embeddings {
            self.check_dim(embedding)?;
        }
        Ok(embeddings)
    }

    fn name(&self) -> &str {
        "server"
    }
}

fn send_request(socket: &Path, timeout: Duration, request: &Request<'_>) -> Result<Response> {
    let io_err = |what: &str, e: std::io::Error| Error::embedding(format!("{}: {}", what, e));

    let mut stream = UnixStream::connect(socket).map_err(|e| io_err("connect", e))?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| io_err("set timeout", e))?;

    let json = serde_json::to_vec(request)?;
    stream.write_all(&json).map_err(|e| io_err("send", e))?;
    stream
        .shutdown(std::net::Shutdown::Write)
        .map_err(|e| io_err("shutdown write", e))?;

    let mut buffer = Vec::new();
    stream
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut buffer)
        .map_err(|e| io_err("read response", e))?;

    serde_json::from_slice(&buffer)
        .map_err(|e| Error::embedding(format!("malformed daemon response: {}", e)))
}

// =============================================================================
// Embedder factory
// =============================================================================

/// Build the embedder named in the settings.
///
/// `server` falls back to the lite embedder when the daemon does not answer.
pub fn get_embedder(settings: &Settings) -> Box<dyn Embedder> {
    match settings.embedding_model.as_str() {
        "server" => {
            let embedder = SocketEmbedder::new(&settings.socket_path)
                .with_timeout(Duration::from_secs(settings.embed_timeout_secs))
                .with_expected_dim(settings.embedding_dim);
            if embedder.is_running() {
                debug!(socket = %settings.socket_path, "using embedding daemon");
                return Box::new(embedder);
            }
            warn!(
                socket = %settings.socket_path,
                "embedding daemon not reachable, falling back to lite embedder"
            );
            Box::new(LiteEmbedder::with_dim(settings.embedding_dim))
        }
        "lite" => Box::new(LiteEmbedder::with_dim(settings.embedding_dim)),
        other => {
            warn!(model = other, "unknown embedding model, using lite embedder");
            Box::new(LiteEmbedder::with_dim(settings.embedding_dim))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranker::cosine_similarity;

    #[test]
    fn test_lite_embedder() {
        let embedder = LiteEmbedder::new();
        let embedding = embedder.embed("hello world").unwrap();

        assert_eq!(embedding.len(), LITE_DIM);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_lite_embedder_is_deterministic() {
        let embedder = LiteEmbedder::with_dim(64);
        let a = embedder.embed("How are you?").unwrap();
        let b = embedder.embed("How are you?").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_lite_embedder_rejects_empty_text() {
        let embedder = LiteEmbedder::new();
        assert!(matches!(
            embedder.embed("   "),
            Err(Error::EmbeddingFailed(_))
        ));
    }

    #[test]
    fn test_similar_texts_have_higher_similarity() {
        let embedder = LiteEmbedder::new();

        let a = embedder.embed("the quick brown fox").unwrap();
        let b = embedder.embed("the quick brown dog").unwrap();
        let c = embedder.embed("completely different text").unwrap();

        let sim_ab = cosine_similarity(&a, &b).unwrap();
        let sim_ac = cosine_similarity(&a, &c).unwrap();

        assert!(sim_ab > sim_ac);
    }

    #[test]
    fn test_punctuation_does_not_change_words() {
        let embedder = LiteEmbedder::new();
        let a = embedder.embed("good morning").unwrap();
        let b = embedder.embed("good morning!").unwrap();
        assert!(cosine_similarity(&a, &b).unwrap() > 0.9);
    }

    #[test]
    fn test_socket_embedder_reports_unreachable_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = SocketEmbedder::new(dir.path().join("missing.sock"));

        assert!(!embedder.is_running());
        assert!(matches!(
            embedder.embed("hello"),
            Err(Error::EmbeddingFailed(_))
        ));
    }

    #[test]
    fn test_factory_falls_back_to_lite() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            embedding_model: "server".to_string(),
            socket_path: dir.path().join("none.sock").display().to_string(),
            embedding_dim: 32,
            ..Settings::default()
        };

        let embedder = get_embedder(&settings);
        assert_eq!(embedder.name(), "lite");
        assert_eq!(embedder.embed("fallback").unwrap().len(), 32);
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(Request::Embed { text: "hi" }).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "embed", "text": "hi"}));

        let json = serde_json::to_value(Request::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "ping"}));
    }
}
