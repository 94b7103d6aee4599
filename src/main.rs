use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use cardsim::config::Config;
use cardsim::corpus::Corpus;
use cardsim::fusion::QueryOutcome;
use cardsim::ingest::{IngestOptions, IngestOutcome};
use cardsim::model::kind::{ModelKind, ModelParams};
use cardsim::model::{SkipReason, TrainOutcome};
use cardsim::project::Project;
use cardsim::settings::TokenStats;

/// Cardsim: ranked card similarity over delimited data files.
///
/// Ingests attribute tables into per-project corpora, builds a
/// frequency-filtered vocabulary, trains vector models, and answers
/// "which cards look like this one" with a weighted consensus.
#[derive(Parser)]
#[command(name = "cardsim", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project (single-corpus by default)
    Init {
        project: String,

        /// Split the project into weighted dimensions, one corpus each
        #[arg(long)]
        dimensioned: bool,
    },

    /// Ingest a delimited file, or resume an interrupted run
    Ingest {
        project: String,

        /// Source file; omit to resume a pending run
        file: Option<PathBuf>,

        /// Field separator
        #[arg(long, default_value_t = ';')]
        sep: char,

        /// Stop after this many data rows
        #[arg(long)]
        rows: Option<u64>,

        /// Target dimension (dimensioned projects only)
        #[arg(long)]
        dimension: Option<String>,

        /// Treat plain values as whole tokens instead of composing them
        /// with the column name
        #[arg(long)]
        pre_tokenized: bool,
    },

    /// Rebuild the vocabulary and retrain every model
    Build {
        project: String,

        #[arg(long)]
        dimension: Option<String>,
    },

    /// Retrain models without touching the vocabulary
    Train {
        project: String,

        #[arg(long)]
        dimension: Option<String>,

        /// Train only this model (tfidf, tfidf-pivot, topic)
        #[arg(long)]
        model: Option<String>,
    },

    /// Rank the cards most similar to one card
    Similar {
        project: String,
        card: String,

        /// Restrict to these dimensions (dimensioned projects only)
        #[arg(long)]
        dimension: Vec<String>,

        /// Keep every score: no thresholds, no result cap
        #[arg(long)]
        test: bool,
    },

    /// Corpus statistics, before and after the vocabulary filter
    Stats {
        project: String,

        #[arg(long)]
        dimension: Option<String>,
    },

    /// Project status: layout, pending runs, built indexes
    Status {
        project: String,
    },

    /// Adjust corpus and query parameters
    Tune {
        project: String,

        #[arg(long)]
        dimension: Option<String>,

        /// Minimum cards a token must appear in
        #[arg(long)]
        no_below: Option<i64>,

        /// Maximum fraction of cards a token may appear in
        #[arg(long)]
        no_above: Option<f64>,

        /// Hard cap on vocabulary size
        #[arg(long)]
        keep_n: Option<i64>,

        /// Minimum word length in free-text attributes
        #[arg(long)]
        min_len: Option<usize>,

        /// Maximum word length in free-text attributes
        #[arg(long)]
        max_len: Option<usize>,

        /// Fusion weight for one model, as MODEL=WEIGHT
        #[arg(long)]
        model_weight: Vec<String>,

        /// Score threshold for one model, as MODEL=THRESHOLD
        #[arg(long)]
        model_threshold: Vec<String>,

        /// Output dimensionality of the topic model
        #[arg(long)]
        num_topics: Option<usize>,

        /// Cards returned per query
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Show or edit the relationship tags
    Tags {
        project: String,

        #[arg(long)]
        dimension: Option<String>,

        #[arg(long)]
        add: Vec<String>,

        #[arg(long)]
        remove: Vec<String>,
    },

    /// Show or edit the accent-stripped attributes
    Accents {
        project: String,

        #[arg(long)]
        dimension: Option<String>,

        #[arg(long)]
        add: Vec<String>,

        #[arg(long)]
        remove: Vec<String>,
    },

    /// Manage dimensions of a dimensioned project
    Dimension {
        project: String,

        #[command(subcommand)]
        action: DimensionAction,
    },

    /// Rebuild the aggregated frequencies from the occurrence log, then
    /// the vocabulary and models
    Recover {
        project: String,

        #[arg(long)]
        dimension: Option<String>,
    },
}

#[derive(Subcommand)]
enum DimensionAction {
    /// List dimensions and their fusion weights
    List,
    /// Add a dimension
    Add { name: String },
    /// Set a dimension's fusion weight
    Weight { name: String, weight: f64 },
}

fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cardsim=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init {
            project,
            dimensioned,
        } => {
            let project = Project::open(&config.data_dir, &project, Some(dimensioned))?;
            println!("Project created at: {}", project.dir().display());
            if project.state.dimensioned {
                println!("Layout: dimensioned (the relationships dimension is reserved)");
                println!("Next: cardsim dimension {} add <name>", project.link);
            } else {
                println!("Layout: single corpus");
                println!("Next: cardsim ingest {} <file>", project.link);
            }
        }

        Commands::Ingest {
            project,
            file,
            sep,
            rows,
            dimension,
            pre_tokenized,
        } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            let opts = IngestOptions {
                separator: sep,
                row_cap: rows,
                pre_tokenized,
            };
            info!(project = %project.link, "starting ingestion");
            match project.ingest(dimension.as_deref(), file.as_deref(), &opts)? {
                IngestOutcome::Completed { rows, resumed } => {
                    let verb = if resumed { "Resumed and completed" } else { "Completed" };
                    println!("{verb}: {rows} rows ingested");
                    println!("{}", "Vocabulary rebuilt and models retrained.".dimmed());
                }
                IngestOutcome::Refused(reason) => {
                    println!("{} {reason}", "Not ingested:".yellow());
                }
            }
        }

        Commands::Build { project, dimension } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            let corpus = project.corpus(dimension.as_deref())?;
            let vocab_size = corpus.build_vocabulary()?;
            println!("Vocabulary rebuilt: {vocab_size} tokens kept");
            print_train_outcomes(&corpus.train(None)?);
        }

        Commands::Train {
            project,
            dimension,
            model,
        } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            let corpus = project.corpus(dimension.as_deref())?;
            let only = match model.as_deref() {
                Some(name) => Some(vec![parse_model(name)?]),
                None => None,
            };
            print_train_outcomes(&corpus.train(only.as_deref())?);
        }

        Commands::Similar {
            project,
            card,
            dimension,
            test,
        } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            let dims = (!dimension.is_empty()).then_some(dimension.as_slice());
            match project.similar(&card, dims, test)? {
                QueryOutcome::Ranked(entries) => {
                    if entries.is_empty() {
                        println!("No card scored above the configured thresholds.");
                    }
                    for entry in entries {
                        println!(
                            "{:>4}  {:>6.2}  {}",
                            entry.rank,
                            entry.score,
                            entry.key.bold()
                        );
                    }
                }
                QueryOutcome::Unavailable(reason) => {
                    println!("{} {reason}", "Unavailable:".yellow());
                }
            }
        }

        Commands::Stats { project, dimension } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            let corpus = project.corpus(dimension.as_deref())?;
            let stats = corpus.stats()?;
            println!("{}", format!("Corpus: {}", corpus.link).bold());
            println!("  rows ingested:  {}", stats.num_docs);
            println!("  cards:          {}", stats.num_cards);
            println!("  attributes:     {}", stats.num_attributes);
            println!("  words:          {}", stats.num_words);
            print_token_stats("Full corpus", &stats.full);
            print_token_stats("Filtered corpus", &stats.filtered);
        }

        Commands::Status { project } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            println!("{}", format!("Project: {}", project.name).bold());
            if project.state.dimensioned {
                println!("Layout: dimensioned, max {} results", project.state.max_results);
                for (link, entry) in &project.state.dimensions {
                    println!("\n{}", format!("Dimension {} (weight {})", entry.name, entry.weight).bold());
                    print_corpus_status(&project.corpus(Some(link.as_str()))?)?;
                }
            } else {
                println!("Layout: single corpus, max {} results", project.state.max_results);
                print_corpus_status(&project.corpus(None)?)?;
            }
        }

        Commands::Tune {
            project,
            dimension,
            no_below,
            no_above,
            keep_n,
            min_len,
            max_len,
            model_weight,
            model_threshold,
            num_topics,
            max_results,
        } => {
            let mut project = Project::open(&config.data_dir, &project, None)?;
            if let Some(max) = max_results {
                project.set_max_results(max)?;
                println!("max results: {max}");
            }
            let mut corpus = project.corpus(dimension.as_deref())?;
            let weights = parse_model_values(&model_weight)?;
            let thresholds = parse_model_values(&model_threshold)?;
            corpus.update_settings(|s| {
                if let Some(v) = no_below {
                    s.no_below = v;
                }
                if let Some(v) = no_above {
                    s.no_above = v;
                }
                if let Some(v) = keep_n {
                    s.keep_n = v;
                }
                if let Some(v) = min_len {
                    s.min_len = v;
                }
                if let Some(v) = max_len {
                    s.max_len = v;
                }
                for (kind, weight) in weights {
                    s.models
                        .entry(kind)
                        .or_insert_with(|| ModelParams::defaults_for(kind))
                        .weight = weight;
                }
                for (kind, threshold) in thresholds {
                    s.models
                        .entry(kind)
                        .or_insert_with(|| ModelParams::defaults_for(kind))
                        .min_similarity = threshold;
                }
                if let Some(v) = num_topics {
                    s.models
                        .entry(ModelKind::Topic)
                        .or_insert_with(|| ModelParams::defaults_for(ModelKind::Topic))
                        .num_topics = Some(v);
                }
            })?;
            println!("Settings saved for corpus {}.", corpus.link);
            println!(
                "{}",
                "Run `cardsim build` to apply them to the vocabulary and models.".dimmed()
            );
        }

        Commands::Tags {
            project,
            dimension,
            add,
            remove,
        } => {
            let mut corpus =
                Project::open(&config.data_dir, &project, None)?.corpus(dimension.as_deref())?;
            edit_list(&mut corpus, "relationship tags", add, remove, |s| {
                &mut s.relationship_tags
            })?;
        }

        Commands::Accents {
            project,
            dimension,
            add,
            remove,
        } => {
            let mut corpus =
                Project::open(&config.data_dir, &project, None)?.corpus(dimension.as_deref())?;
            edit_list(&mut corpus, "accent-stripped attributes", add, remove, |s| {
                &mut s.accent_attrs
            })?;
        }

        Commands::Dimension { project, action } => {
            let mut project = Project::open(&config.data_dir, &project, None)?;
            match action {
                DimensionAction::List => {
                    for (link, entry) in &project.state.dimensions {
                        println!("{:>8.2}  {} ({})", entry.weight, entry.name.bold(), link);
                    }
                }
                DimensionAction::Add { name } => {
                    project.add_dimension(&name)?;
                    println!("Dimension {name:?} added with weight 1.0");
                }
                DimensionAction::Weight { name, weight } => {
                    project.set_dimension_weight(&name, weight)?;
                    println!("Dimension {name:?} now weighs {weight}");
                }
            }
        }

        Commands::Recover { project, dimension } => {
            let project = Project::open(&config.data_dir, &project, None)?;
            let corpus = project.corpus(dimension.as_deref())?;
            corpus.rebuild_frequencies()?;
            let vocab_size = corpus.build_vocabulary()?;
            println!("Frequencies rebuilt from the occurrence log; {vocab_size} tokens kept");
            print_train_outcomes(&corpus.train(None)?);
        }
    }

    Ok(())
}

fn parse_model(name: &str) -> Result<ModelKind> {
    ModelKind::parse(name).ok_or_else(|| anyhow!("unknown model {name:?}"))
}

/// Parse repeated MODEL=VALUE flags.
fn parse_model_values(values: &[String]) -> Result<Vec<(ModelKind, f64)>> {
    values
        .iter()
        .map(|item| {
            let (name, value) = item
                .split_once('=')
                .with_context(|| format!("expected MODEL=VALUE, got {item:?}"))?;
            Ok((parse_model(name)?, value.parse()?))
        })
        .collect()
}

fn print_train_outcomes(outcomes: &[TrainOutcome]) {
    for outcome in outcomes {
        match outcome {
            TrainOutcome::Trained { kind, vectors } => {
                println!("{} {kind}: {vectors} vectors indexed", "Trained".green());
            }
            TrainOutcome::Skipped { kind, reason } => {
                let reason = match reason {
                    SkipReason::EmptyVocabulary => "no vocabulary built".to_string(),
                    SkipReason::MissingPrerequisite(req) => {
                        format!("requires the {req} index")
                    }
                };
                println!("{} {kind}: {reason}", "Skipped".yellow());
            }
        }
    }
}

fn print_token_stats(label: &str, stats: &TokenStats) {
    println!("{}", label.bold());
    println!(
        "  tokens: {} (doc freq {}..{})",
        stats.num_tokens, stats.doc_freq_min, stats.doc_freq_max
    );
    let stdev = stats
        .tokens_per_card_stdev
        .map(|s| format!("{s:.2}"))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "  tokens per card: {}..{} (mean {:.2}, stdev {stdev}) across {} cards",
        stats.tokens_per_card_min,
        stats.tokens_per_card_max,
        stats.tokens_per_card_mean,
        stats.cards_with_tokens
    );
}

fn print_corpus_status(corpus: &Corpus) -> Result<()> {
    let stats = corpus.stats()?;
    println!(
        "  {} cards, {} words, vocabulary of {}",
        stats.num_cards,
        stats.num_words,
        corpus.vocabulary_size()?
    );
    if let Some(cp) = corpus.pending_checkpoint()? {
        println!(
            "  {} {} rows of {:?} done, rerun `ingest` to finish",
            "Interrupted run:".yellow(),
            cp.rows_consumed,
            cp.source_path
        );
    }
    for (kind, built) in corpus.model_status()? {
        let state = if built { "index built".green() } else { "no index".dimmed() };
        println!("  model {kind}: {state}");
    }
    for source in corpus.sources()? {
        println!(
            "  {} {} ({}, cap {:?})",
            "source".dimmed(),
            source.origin,
            source.date,
            source.row_cap
        );
    }
    Ok(())
}

/// Small helper for the tags/accents commands.
fn edit_list<F>(corpus: &mut Corpus, label: &str, add: Vec<String>, remove: Vec<String>, field: F) -> Result<()>
where
    F: Fn(&mut cardsim::settings::CorpusSettings) -> &mut Vec<String>,
{
    let changed = !add.is_empty() || !remove.is_empty();
    corpus.update_settings(|s| {
        let list = field(s);
        for item in add {
            if !list.contains(&item) {
                list.push(item);
            }
        }
        list.retain(|item| !remove.contains(item));
    })?;
    let list = field(&mut corpus.settings).clone();
    println!("{label}: {}", list.join(", "));
    if changed {
        println!(
            "{}",
            "Changes apply to future ingestion runs only.".dimmed()
        );
    }
    Ok(())
}
