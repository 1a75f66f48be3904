use clap::{Parser, Subcommand};
use recollect::config::{find_data_path, ProjectConfig, LOG_ENV};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "recollect")]
#[command(version)]
#[command(about = "Learned answers, recalled by meaning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .recollect directory
    Init {
        /// Directory to initialize .recollect in
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Learn a prompt and its response
    Learn {
        prompt: String,
        response: String,

        /// Intent label (classified from the prompt when omitted)
        #[arg(short, long)]
        intent: Option<String>,

        /// Comma-separated tags
        #[arg(short, long, default_value = "")]
        tags: String,

        #[arg(short, long)]
        priority: Option<u32>,

        #[arg(short, long)]
        category: Option<String>,
    },

    /// Answer a query from memory and record the use
    Ask {
        query: String,

        /// Minimum similarity to accept a match
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Show the best match without recording anything
    Find {
        query: String,

        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// List the closest memories to a query
    Similar {
        query: String,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },

    /// Show one memory in full
    Show { id: i64 },

    /// List memories, newest first
    List {
        /// Maximum results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Update a memory
    Update {
        id: i64,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        response: Option<String>,

        #[arg(short, long)]
        intent: Option<String>,

        /// New tags (comma-separated, replaces existing)
        #[arg(short, long)]
        tags: Option<String>,

        #[arg(short, long)]
        priority: Option<u32>,

        #[arg(short, long)]
        category: Option<String>,
    },

    /// Forget a memory
    Forget {
        /// Memory ID to forget
        id: i64,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Count a use of a memory
    Feedback {
        id: i64,

        /// Match score of this use
        #[arg(short, long)]
        score: Option<f64>,
    },

    /// Delete memories matching every given criterion
    Cleanup {
        /// Created more than this many days ago
        #[arg(long)]
        older_than_days: Option<i64>,

        /// Used at most this many times
        #[arg(long)]
        max_usage: Option<u64>,

        /// Priority at most this
        #[arg(long)]
        max_priority: Option<u32>,

        #[arg(short, long)]
        intent: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        /// Delete everything
        #[arg(long, conflicts_with_all = ["older_than_days", "max_usage", "max_priority", "intent", "category"])]
        all: bool,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Remove repeated prompt/response pairs
    Dedupe,

    /// Re-embed memories whose prompt was edited
    Reembed,

    /// Classify text against the intent library
    Classify { text: String },

    /// Group near-synonym intent labels
    Clusters {
        /// Minimum label similarity
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Per-intent success rates
    Intents {
        /// Show which intent tends to follow which
        #[arg(long)]
        transitions: bool,
    },

    /// Match attempts recorded for a memory
    History { id: i64 },

    /// Show statistics
    Stats {
        /// Number of top memories to show
        #[arg(short = 'n', long, default_value = "5")]
        top: usize,
    },

    /// List all tags
    Tags,

    /// Export memories to stdout as JSON
    Export,

    /// View or set configuration
    Config {
        /// Config key
        key: Option<String>,

        /// Config value
        value: Option<String>,

        /// List available models
        #[arg(long)]
        list_models: bool,
    },
}

fn init_logging() {
    let fallback = find_data_path()
        .and_then(|path| ProjectConfig::new(path).ok())
        .and_then(|config| config.settings().ok())
        .map(|settings| settings.log_level)
        .unwrap_or_else(|| "warn".to_string());

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Init { path } => cli::memory::run_init(&path),
        Commands::Learn {
            prompt,
            response,
            intent,
            tags,
            priority,
            category,
        } => cli::memory::run_learn(&prompt, &response, intent, &tags, priority, category),
        Commands::Ask { query, threshold } => cli::memory::run_ask(&query, threshold),
        Commands::Find { query, threshold } => cli::memory::run_find(&query, threshold),
        Commands::Similar { query, limit } => cli::memory::run_similar(&query, limit),
        Commands::Show { id } => cli::memory::run_show(id),
        Commands::List { limit, offset } => cli::memory::run_list(limit, offset),
        Commands::Update {
            id,
            prompt,
            response,
            intent,
            tags,
            priority,
            category,
        } => cli::memory::run_update(
            id,
            recollect::MemoryUpdate {
                prompt,
                response,
                intent,
                tags: tags.as_deref().map(cli::parse_tags),
                priority,
                category,
                embedding: None,
            },
        ),
        Commands::Forget { id, force } => cli::memory::run_forget(id, force),
        Commands::Feedback { id, score } => cli::memory::run_feedback(id, score),
        Commands::Cleanup {
            older_than_days,
            max_usage,
            max_priority,
            intent,
            category,
            all,
            force,
        } => {
            if all {
                cli::memory::run_clear(force)
            } else {
                cli::memory::run_cleanup(
                    older_than_days,
                    recollect::CleanupFilter {
                        older_than: None,
                        max_usage,
                        max_priority,
                        intent,
                        category,
                    },
                    force,
                )
            }
        }
        Commands::Dedupe => cli::memory::run_dedupe(),
        Commands::Reembed => cli::memory::run_reembed(),
        Commands::Classify { text } => cli::analysis::run_classify(&text),
        Commands::Clusters { threshold } => cli::analysis::run_clusters(threshold),
        Commands::Intents { transitions } => cli::analysis::run_intents(transitions),
        Commands::History { id } => cli::memory::run_history(id),
        Commands::Stats { top } => cli::analysis::run_stats(top),
        Commands::Tags => cli::memory::run_tags(),
        Commands::Export => cli::memory::run_export(),
        Commands::Config {
            key,
            value,
            list_models,
        } => cli::config::run_config(key.as_deref(), value.as_deref(), list_models),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
