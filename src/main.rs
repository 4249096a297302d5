use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use quiz_ingest::config::Settings;
use quiz_ingest::fetch::HttpFetcher;
use quiz_ingest::ingest::Ingestor;
use quiz_ingest::{db, watch};

#[derive(Parser)]
#[command(name = "quiz_ingest", about = "Pulls new quizzes from the listing site into SQLite")]
struct Cli {
    /// Settings file (default: ./quiz_ingest.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database path, overrides settings
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Check the listing once and store any new quizzes
    Ingest,
    /// Keep checking for new quizzes on the poll interval until Ctrl-C
    Watch,
    /// Most recent quizzes
    List {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Print a quiz with its questions and answers
    Show {
        /// Quiz number as shown by `list`
        id: i64,
    },
    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db {
        settings.db_path = db_path;
    }

    let conn = db::connect(&settings.db_path)
        .with_context(|| format!("Failed to open {:?}", settings.db_path))?;
    db::init_schema(&conn)?;

    match cli.command {
        Commands::Init => {
            println!("Schema ready at {:?}", settings.db_path);
        }
        Commands::Ingest => {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} quizzes")?
                    .progress_chars("=> "),
            );
            let fetcher = HttpFetcher::new(&settings)?;
            let ingestor = Ingestor::new(settings, Arc::new(fetcher)).with_progress(pb);
            let added = ingestor.run(&conn).await?;
            if added.is_empty() {
                println!("No new quizzes.");
            }
            for quiz in &added {
                println!("{}", watch::announcement(quiz));
            }
        }
        Commands::Watch => {
            let every = settings.poll_interval();
            let fetcher = HttpFetcher::new(&settings)?;
            let ingestor = Ingestor::new(settings, Arc::new(fetcher));
            watch::run(&ingestor, &conn, every, &watch::Stdout, watch::ctrl_c()).await;
        }
        Commands::List { limit } => {
            let rows = db::recent_quizzes(&conn, limit)?;
            if rows.is_empty() {
                println!("No quizzes yet. Run 'ingest' first.");
                return Ok(());
            }
            println!("{:>4} | {:<40} | {:<16} | {:>9}", "#", "Name", "Published", "Questions");
            println!("{}", "-".repeat(78));
            for r in &rows {
                let published = r
                    .published_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:>4} | {:<40} | {:<16} | {:>9}",
                    r.id,
                    truncate(&r.name, 40),
                    published,
                    r.question_count
                );
            }
        }
        Commands::Show { id } => {
            let Some(tree) = db::load_quiz(&conn, id)? else {
                println!("Quiz #{} does not exist.", id);
                return Ok(());
            };
            println!("#{} {}", tree.quiz.id, tree.quiz.name);
            for (n, q) in tree.questions.iter().enumerate() {
                println!("\nQuestion #{}: {}", n + 1, q.question.text);
                if let Some(path) = &q.question.image_path {
                    println!("  image: {}", path);
                }
                if q.question.freetext {
                    let accepted: Vec<&str> = q.answers.iter().map(|a| a.text.as_str()).collect();
                    println!("  accepts: {}", accepted.join(" / "));
                } else {
                    for (i, a) in q.answers.iter().enumerate() {
                        let mark = if a.correct { "*" } else { " " };
                        println!("  {} {} - {}", mark, i + 1, a.text);
                    }
                }
            }
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Quizzes:   {}", s.quizzes);
            println!("Questions: {} ({} free-text)", s.questions, s.freetext);
            println!("Answers:   {}", s.answers);
            println!("Images:    {}", s.images);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
