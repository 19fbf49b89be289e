//! ProfileKit CLI - Command line interface for account and profile operations.
//!
//! Signs in against the configured backend, keeps the profile row in place
//! and uploads avatar and banner images.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use profilekit_common::MediaKind;
use profilekit_profile::{
    account, ensure_profile_best_effort, ensure_profile_exists, upload_profile_image,
    BackendConfig, ProfileContext, ReconcileOutcome,
};

#[derive(Parser)]
#[command(name = "profilekit")]
#[command(about = "ProfileKit - Account and profile helpers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON config file (default: PROFILEKIT_* environment variables).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an OAuth sign-in and print the URL to open.
    SignInOauth {
        /// OAuth provider name.
        #[arg(short, long, default_value = "google")]
        provider: String,
    },

    /// Finish an OAuth sign-in with the code from the redirect.
    CompleteOauth {
        /// Authorization code.
        #[arg(long)]
        code: String,
    },

    /// Email a sign-in link and one-time code.
    SignInEmail {
        /// Email address.
        #[arg(short, long)]
        email: String,
    },

    /// Sign in with an emailed one-time code.
    VerifyOtp {
        /// Email address the code was sent to.
        #[arg(short, long)]
        email: String,

        /// One-time code.
        #[arg(short, long)]
        token: String,
    },

    /// End the current session.
    SignOut,

    /// Show the signed-in user.
    Whoami,

    /// Create the profile row for the signed-in user if missing.
    EnsureProfile,

    /// Upload an avatar or banner image.
    Upload {
        /// Image file to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// Media kind: "avatar" or "banner".
        #[arg(short, long, default_value = "avatar")]
        kind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = connect(cli.config.as_deref())?;

    match cli.command {
        Commands::SignInOauth { provider } => cmd_sign_in_oauth(&ctx, &provider).await,

        Commands::CompleteOauth { code } => cmd_complete_oauth(&ctx, &code).await,

        Commands::SignInEmail { email } => cmd_sign_in_email(&ctx, &email).await,

        Commands::VerifyOtp { email, token } => cmd_verify_otp(&ctx, &email, &token).await,

        Commands::SignOut => cmd_sign_out(&ctx).await,

        Commands::Whoami => cmd_whoami(&ctx).await,

        Commands::EnsureProfile => cmd_ensure_profile(&ctx).await,

        Commands::Upload { file, kind } => cmd_upload(&ctx, &file, &kind).await,
    }
}

/// Load configuration and resolve the backend.
fn connect(config: Option<&Path>) -> Result<ProfileContext> {
    let config = match config {
        Some(path) => BackendConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BackendConfig::from_env().context("Failed to read configuration from environment")?,
    };

    let backend = config
        .connect()
        .with_context(|| format!("Failed to connect to '{}' backend", config.provider))?;
    Ok(ProfileContext::new(backend, config.settings))
}

async fn cmd_sign_in_oauth(ctx: &ProfileContext, provider: &str) -> Result<()> {
    let redirect = account::sign_in_with_provider(ctx, provider)
        .await
        .context("Failed to start OAuth sign-in")?;

    println!("Open this URL to sign in with {}:", redirect.provider);
    println!("  {}", redirect.url);
    println!("\nThen run: profilekit complete-oauth --code <code>");

    Ok(())
}

async fn cmd_complete_oauth(ctx: &ProfileContext, code: &str) -> Result<()> {
    let identity = account::complete_oauth_sign_in(ctx, code)
        .await
        .context("Failed to complete OAuth sign-in")?;

    println!("Signed in as {}", identity.id);
    ensure_profile_best_effort(ctx).await;

    Ok(())
}

async fn cmd_sign_in_email(ctx: &ProfileContext, email: &str) -> Result<()> {
    account::sign_in_with_email_link(ctx, email)
        .await
        .context("Failed to send sign-in link")?;

    println!("Sign-in link sent to {}", email);
    println!("Run: profilekit verify-otp --email {} --token <code>", email);

    Ok(())
}

async fn cmd_verify_otp(ctx: &ProfileContext, email: &str, token: &str) -> Result<()> {
    let identity = account::verify_email_otp(ctx, email, token)
        .await
        .context("Failed to verify code")?;

    println!("Signed in as {}", identity.id);
    ensure_profile_best_effort(ctx).await;

    Ok(())
}

async fn cmd_sign_out(ctx: &ProfileContext) -> Result<()> {
    account::sign_out(ctx).await.context("Failed to sign out")?;
    println!("Signed out.");
    Ok(())
}

async fn cmd_whoami(ctx: &ProfileContext) -> Result<()> {
    match account::current_user(ctx)
        .await
        .context("Failed to fetch current user")?
    {
        Some(identity) => {
            println!("User: {}", identity.id);
            if let Some(email) = identity.email {
                println!("  Email: {}", email);
            }
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

async fn cmd_ensure_profile(ctx: &ProfileContext) -> Result<()> {
    let outcome = ensure_profile_exists(ctx)
        .await
        .context("Failed to check profile")?;

    match outcome {
        ReconcileOutcome::NoSession => println!("Not signed in, nothing to do."),
        ReconcileOutcome::AlreadyExists => println!("Profile already exists."),
        ReconcileOutcome::Created => println!("Profile created."),
    }
    Ok(())
}

async fn cmd_upload(ctx: &ProfileContext, file: &Path, kind: &str) -> Result<()> {
    let kind: MediaKind = kind.parse().context("Invalid media kind")?;
    info!("Uploading {} as {}", file.display(), kind);

    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let size = data.len();
    let url = upload_profile_image(ctx, data, &file_name, kind)
        .await
        .context("Failed to upload image")?;

    println!("Uploaded {} ({} bytes)", kind, size);
    println!("  URL: {}", url);

    Ok(())
}
