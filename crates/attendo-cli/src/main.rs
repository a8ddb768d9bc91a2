use anyhow::{bail, Context, Result};
use attendo_core::{ArcFaceEncoder, ScrfdLocator, ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use attendo_store::{import_roster, parse_roster, sample_roster, EmployeeStore, SqliteEmployeeStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod encode;

#[derive(Parser)]
#[command(name = "attendo", about = "attendo face-recognition attendance tools")]
struct Cli {
    /// Employee database
    #[arg(long, global = true, default_value = "data/attendance.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the known-face table from a directory of `<identity>.<ext>` images
    Encode {
        /// Directory of labeled face images
        dir: PathBuf,
        /// Output embedding table
        #[arg(short, long, default_value = "data/encodings.json")]
        output: PathBuf,
        /// Directory containing the ONNX models
        #[arg(long, default_value = "models")]
        models: PathBuf,
    },
    /// Create the employee table if it does not exist
    InitDb,
    /// Import employees from a JSON roster (built-in sample roster if omitted)
    Import {
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Show one employee record
    Show {
        identity: String,
    },
    /// List all employees
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { dir, output, models } => {
            let files = encode::image_files(&dir).with_context(|| format!("cannot read {}", dir.display()))?;
            if files.is_empty() {
                bail!("no images found in {}", dir.display());
            }
            println!("Encoding {} image(s)...", files.len());

            let (table, skipped) = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut locator = ScrfdLocator::load(&models.join(SCRFD_MODEL_FILE))?;
                let mut encoder = ArcFaceEncoder::load(&models.join(ARCFACE_MODEL_FILE))?;
                Ok(encode::build_table(&files, &mut locator, &mut encoder))
            })
            .await??;

            for s in &skipped {
                println!("  skipped {}: {}", s.path.display(), s.reason);
            }
            table
                .save(&output)
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("Encoding complete: {} face(s) written to {}", table.len(), output.display());
        }
        Commands::InitDb => {
            let store = SqliteEmployeeStore::open(&cli.db).await?;
            store.close().await?;
            println!("Database ready at {}", cli.db.display());
        }
        Commands::Import { json } => {
            let records = match json {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    parse_roster(&raw)?
                }
                None => sample_roster(),
            };
            let store = SqliteEmployeeStore::open(&cli.db).await?;
            let summary = import_roster(&store, records).await;
            store.close().await?;
            for (identity, error) in &summary.failures {
                println!("  failed {identity}: {error}");
            }
            println!("Inserted {} of {} employee(s)", summary.inserted, summary.total);
        }
        Commands::Show { identity } => {
            let store = SqliteEmployeeStore::open(&cli.db).await?;
            let record = store.get(&identity).await?;
            store.close().await?;
            match record {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("Employee ID {identity} not found"),
            }
        }
        Commands::List => {
            let store = SqliteEmployeeStore::open(&cli.db).await?;
            let records = store.list().await?;
            store.close().await?;
            if records.is_empty() {
                println!("No employees");
            }
            for r in records {
                println!(
                    "{:<10} {:<24} {:<20} total={:<4} last={}",
                    r.identity,
                    r.name,
                    r.major,
                    r.total_attendance,
                    r.last_attendance_time.as_deref().unwrap_or("never")
                );
            }
        }
    }

    Ok(())
}
