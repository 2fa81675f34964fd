use std::fs::File;
use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use literacy_enrollment::{
    accounts, audit, blob, db, enrollment, entities::content, Argon2Hasher, Args, Command,
    FsBlobStore, PaymentStatus,
};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let mode = if args.dev_mode { "development" } else { "production" };
    info!(
        database = %args.database.display(),
        mode,
        "literacy-enrollment {}",
        literacy_enrollment::VERSION
    );

    let settings = args.settings();
    let conn = db::open_database(&args.database, &settings)
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;

    match &args.command {
        Command::Init => {
            println!("✓ Schema ready at {}", args.database.display());
        }

        Command::Seed {
            admin_email,
            admin_password,
        } => {
            let admin = match accounts::find_admin_by_email(&conn, admin_email)? {
                Some(existing) => {
                    println!("✓ Admin {} already exists", existing.email);
                    existing
                }
                None => {
                    let created = accounts::create_admin(
                        &conn,
                        &Argon2Hasher,
                        admin_email,
                        admin_password,
                        "Admin",
                        "User",
                    )
                    .context("Failed to create admin")?;
                    println!("✓ Created admin {}", created.email);
                    created
                }
            };
            let inserted = content::seed_assessment_defaults(&conn)?;
            println!("✓ Seeded {} assessment content item(s)", inserted);
            info!(admin_id = %admin.admin_id, "seed complete");
        }

        Command::Payments { status } => {
            let status = status
                .as_deref()
                .map(str::parse::<PaymentStatus>)
                .transpose()?;
            let admin = args.admin_actor()?;
            let payments = enrollment::list_payments(&conn, &admin, status)?;
            println!("💳 {} payment(s)", payments.len());
            for p in payments {
                println!(
                    "  {}  {:<9} {:<15} {} (grade {})  parent {} <{}>  {}",
                    p.payment.id,
                    p.payment.status,
                    p.payment.method,
                    p.child_name,
                    p.grade,
                    p.parent_name,
                    p.parent_email,
                    p.payment.transaction_id.as_deref().unwrap_or("-"),
                );
            }
        }

        Command::ReviewExport { date, out } => {
            let date = db::parse_task_date(date)?;
            let admin = args.admin_actor()?;
            let rows = match out {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    literacy_enrollment::export_daily_review_csv(&conn, &admin, date, file)?
                }
                None => literacy_enrollment::export_daily_review_csv(
                    &conn,
                    &admin,
                    date,
                    io::stdout().lock(),
                )?,
            };
            info!(%date, rows, "review exported");
        }

        Command::Audit { child } => {
            let entries = audit::entries_for_child(&conn, child)?;
            println!("🧾 {} audit entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
            for entry in entries {
                println!(
                    "  {}  {:<20} by {}  {}",
                    entry.timestamp.to_rfc3339(),
                    entry.action,
                    entry.admin_id,
                    entry.metadata
                );
            }
        }

        Command::AdminLogin { email, password } => {
            let tokens = args.token_gateway()?;
            let session = accounts::admin_login(&conn, &Argon2Hasher, &tokens, email, password)?;
            println!("{}", session.token);
        }

        Command::File { id, out } => {
            let blobs = FsBlobStore::new(&args.uploads_dir)?;
            let (file, bytes) = blob::read_file(&conn, &blobs, id)?;
            std::fs::write(out, &bytes)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "✓ Wrote {} ({}, {} bytes, sha256 {})",
                out.display(),
                file.mime_type,
                file.byte_size,
                file.sha256
            );
        }
    }

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("literacy_enrollment={},info", args.log_level).into());

    // Logs go to stderr so CSV on stdout stays clean
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}
