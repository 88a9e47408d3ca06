// NEXT School - maintenance CLI
//
//   next-school seed                 load the demo roster
//   next-school import <students> <payments> [--teachers <csv>]
//   next-school report [--debt-only]
//   next-school audit [--limit N] [--actor ID]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use next_school::config::{init_tracing, DEFAULT_LOG_FILTER};
use next_school::{
    seed, AuditLog, FinancialStatus, Identity, Roster, School, SqliteAuditLog, SqliteStore,
    StaticDirectory, TracingNotifier,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "next-school", version, about = "NEXT school roster maintenance")]
struct Cli {
    /// Roster database
    #[arg(long, env = "NEXT_DATABASE_PATH", default_value = "next_school.db", global = true)]
    database: PathBuf,

    /// Audit database (defaults to the roster database)
    #[arg(long, env = "NEXT_AUDIT_PATH", global = true)]
    audit: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace the roster with the demo data
    Seed,

    /// Replace the roster with CSV files
    Import {
        students: PathBuf,
        payments: PathBuf,
        #[arg(long)]
        teachers: Option<PathBuf>,
    },

    /// Print every student's financial status
    Report {
        #[arg(long)]
        debt_only: bool,
    },

    /// Print the audit trail, newest first
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        actor: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(DEFAULT_LOG_FILTER);

    let cli = Cli::parse();
    let audit_path = cli.audit.clone().unwrap_or_else(|| cli.database.clone());

    match cli.command {
        Command::Seed => {
            println!("🌱 Seeding demo roster");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            let roster = seed::demo_roster()?;
            run_reseed(&cli.database, &audit_path, roster)?;
        }
        Command::Import {
            students,
            payments,
            teachers,
        } => {
            println!("📂 Importing roster from CSV");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            let roster = seed::load_roster_csv(&students, &payments, teachers.as_deref())?;
            println!(
                "✓ Loaded {} students, {} payments",
                roster.students.len(),
                roster.payment_count()
            );
            run_reseed(&cli.database, &audit_path, roster)?;
        }
        Command::Report { debt_only } => run_report(&cli.database, &audit_path, debt_only)?,
        Command::Audit { limit, actor } => run_audit(&audit_path, limit, actor.as_deref())?,
    }

    Ok(())
}

fn open_school(database: &Path, audit_path: &Path) -> Result<School> {
    let store = SqliteStore::open(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    let audit = SqliteAuditLog::open(audit_path)
        .with_context(|| format!("Failed to open audit log {}", audit_path.display()))?;

    let school = School::open(
        Arc::new(store),
        Arc::new(audit),
        Arc::new(StaticDirectory::default()),
        Arc::new(TracingNotifier),
    )
    .context("Failed to load roster")?;
    Ok(school)
}

fn run_reseed(database: &Path, audit_path: &Path, roster: Roster) -> Result<()> {
    let school = open_school(database, audit_path)?;
    school
        .reseed(&Identity::system(), roster)
        .context("Failed to replace roster")?;

    let summary = school.summary();
    println!("✓ Roster saved to {}", database.display());
    println!(
        "✓ {} students: {} clean, {} in debt",
        summary.total_students, summary.clean, summary.debt
    );
    Ok(())
}

fn run_report(database: &Path, audit_path: &Path, debt_only: bool) -> Result<()> {
    let school = open_school(database, audit_path)?;

    println!("📊 Financial status report");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for student in school.students() {
        if debt_only && student.financial_status() == FinancialStatus::Clean {
            continue;
        }
        let report = student.status_report();
        println!(
            "{:<12} {:<28} {:<6} {}",
            student.enrollment,
            student.name,
            student.financial_status().as_str(),
            report.summary()
        );
    }

    let summary = school.summary();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "{} students | {} clean | {} debt | {} awaiting verification | ${:.2} outstanding",
        summary.total_students,
        summary.clean,
        summary.debt,
        summary.awaiting_verification,
        summary.outstanding_amount
    );
    Ok(())
}

fn run_audit(audit_path: &Path, limit: usize, actor: Option<&str>) -> Result<()> {
    let audit = SqliteAuditLog::open(audit_path)
        .with_context(|| format!("Failed to open audit log {}", audit_path.display()))?;
    let entries = match actor {
        Some(actor) => audit.entries_for_actor(actor)?,
        None => audit.list()?,
    };

    println!("📜 Audit trail ({} entries)", entries.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for entry in entries.iter().take(limit) {
        println!(
            "#{:<5} {} {:<10} {:<8} {:<20} {}",
            entry.sequence,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.actor_id,
            entry.role.as_str(),
            entry.action.as_str(),
            entry.detail
        );
    }
    Ok(())
}
