/// Create an admin account, or reset the password and role of an existing one.
///
/// Usage: create-admin --email EMAIL --nom NOM --prenom PRENOM [--password PASSWORD]
///   Without --password a random one is generated and printed once.

use anyhow::Context;
use clap::Parser;
use rand::{distributions::Alphanumeric, Rng};

use ecole_api::db;

const GENERATED_PASSWORD_LEN: usize = 16;

#[derive(Parser)]
#[command(name = "create-admin", about = "Create or reset an administrator account")]
struct Args {
    #[arg(long)]
    email: String,

    #[arg(long)]
    nom: String,

    #[arg(long)]
    prenom: String,

    /// Generated when omitted
    #[arg(long)]
    password: Option<String>,
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;

    let pool = db::create_pool(&database_url, 2).await?;
    db::schema::provision_schema(&pool).await?;

    let generated = args.password.is_none();
    let password = args.password.unwrap_or_else(generate_password);
    let hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO utilisateurs (email, password_hash, nom, prenom, role, actif)
         VALUES (lower($1), $2, $3, $4, 'admin', TRUE)
         ON CONFLICT (email) DO UPDATE
            SET password_hash = EXCLUDED.password_hash,
                nom = EXCLUDED.nom,
                prenom = EXCLUDED.prenom,
                role = 'admin',
                actif = TRUE
         RETURNING id",
    )
    .bind(args.email.trim())
    .bind(&hash)
    .bind(args.nom.trim())
    .bind(args.prenom.trim())
    .fetch_one(&pool)
    .await
    .context("Failed to upsert admin account")?;

    tracing::info!("Admin account ready: {} (id {})", args.email.trim(), id);
    if generated {
        println!("Generated password: {password}");
    }

    Ok(())
}
