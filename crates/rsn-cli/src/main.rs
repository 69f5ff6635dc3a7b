use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use rsn_db::{audit, gate, licenses};

#[derive(Parser)]
#[command(name = "rsn")]
#[command(about = "Resonant order-fulfillment core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// License lifecycle commands
    License {
        #[command(subcommand)]
        cmd: LicenseCmd,
    },

    /// Credential gate inspection
    Gate {
        /// Organization id
        #[arg(long)]
        org: Uuid,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses while orders are
    /// mid-fulfillment (finalized, awaiting results) unless --yes is given.
    Migrate {
        /// Acknowledge migrating a database with in-flight orders.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum LicenseCmd {
    /// Expire every ACTIVE license past its expiration date. Run this on a
    /// schedule; the credential gate is only as fresh as the last sweep.
    Sweep,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Print the most recent audit rows as JSON lines.
    Tail {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Print the full trail for one entity.
    Entity {
        /// Entity kind (order, specimen, license, patient, ...)
        #[arg(long)]
        kind: String,

        /// Entity id
        #[arg(long)]
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev-time env bootstrap; missing files are fine.
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let pool = rsn_db::connect_from_env()
        .await
        .context("connect to Postgres")?;

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => {
                let st = rsn_db::status(&pool).await?;
                println!("ok: {}", st.ok);
                println!("schema present: {}", st.has_orders_table);
            }
            DbCmd::Migrate { yes } => {
                let in_flight = rsn_db::count_in_flight_orders(&pool).await?;
                if in_flight > 0 && !yes {
                    bail!(
                        "{in_flight} order(s) are mid-fulfillment; re-run with --yes to migrate anyway"
                    );
                }
                rsn_db::migrate(&pool).await?;
                println!("migrations applied");
            }
        },

        Commands::License { cmd } => match cmd {
            LicenseCmd::Sweep => {
                let expired = licenses::expire_due_licenses(&pool).await?;
                println!("expired {expired} license(s)");
            }
        },

        Commands::Gate { org } => {
            let mut conn = pool.acquire().await?;
            let locked = gate::org_is_locked(&mut conn, org).await?;
            println!("organization {org} locked: {locked}");
        }

        Commands::Audit { cmd } => {
            let mut conn = pool.acquire().await?;
            let records = match cmd {
                AuditCmd::Tail { limit } => audit::list_recent(&mut conn, limit).await?,
                AuditCmd::Entity { kind, id } => {
                    audit::list_for_entity(&mut conn, &kind, id).await?
                }
            };
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    Ok(())
}
