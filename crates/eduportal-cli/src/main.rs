//! eduportal - command-line client for the educational platform's admin
//! backend.
//!
//! Restores the saved session on every run, then performs one command:
//! account flows, a raw authenticated call, or a dashboard listing.

mod args;

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Command};
use eduportal_core::api::{LoginRequest, Method, SignupRequest};
use eduportal_core::{ApiGateway, CallOptions, Config, SessionState};

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the log file on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "eduportal.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(&config);
    debug!(api = %config.base_url(), storage = ?config.storage, "eduportal starting");

    let gateway = ApiGateway::from_config(&config)?;
    let state = gateway.restore_session().await;
    if let SessionState::Authenticated(ref session) = state {
        debug!(user_id = session.profile.id, "Session restored");
    }

    run(cli.command, &gateway, &mut config, &state).await
}

async fn run(
    command: Command,
    gateway: &ApiGateway,
    config: &mut Config,
    state: &SessionState,
) -> Result<()> {
    match command {
        Command::Login { email, no_remember } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;
            let remember_me = config.remember_me && !no_remember;

            let session = gateway
                .login(LoginRequest {
                    email: email.clone(),
                    password,
                    remember_me,
                })
                .await?;

            config.last_email = Some(email);
            config.save()?;
            info!(user_id = session.profile.id, "Login complete");
            println!("Logged in as {}", session.profile.full_name());
            if !remember_me {
                // the session dies with this process
                gateway.stop_refresh_loop();
                println!("Credentials accepted. Session is not saved; it ends when this command exits.");
            }
        }
        Command::Logout => {
            gateway.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => match state {
            SessionState::Authenticated(_) => {
                let profile = gateway.profile().await?;
                print_json(&serde_json::to_value(&profile)?)?;
            }
            SessionState::Unauthenticated => println!("Not logged in"),
        },
        Command::Signup {
            email,
            first_name,
            last_name,
            role,
        } => {
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;
            let response = gateway
                .signup(SignupRequest {
                    email,
                    password,
                    first_name,
                    last_name,
                    role,
                })
                .await?;
            print_json(&response)?;
        }
        Command::VerifyEmail { token } => {
            print_json(&gateway.verify_email(&token).await?)?;
        }
        Command::ForgotPassword { email } => {
            print_json(&gateway.request_password_reset(&email).await?)?;
        }
        Command::ResetPassword { uid, token } => {
            let password = rpassword::prompt_password("New password: ")
                .context("Failed to read password")?;
            print_json(&gateway.reset_password(&password, &uid, &token).await?)?;
        }
        Command::Call { method, path, data } => {
            let method = method
                .to_uppercase()
                .parse::<Method>()
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let mut options = CallOptions::new(method);
            if let Some(data) = data {
                let body: Value = serde_json::from_str(&data).context("--data is not valid JSON")?;
                options = options.json(body);
            }
            print_json(&gateway.call(&path, options).await?)?;
        }
        Command::Students { search } => {
            let students = gateway.users().students(search.as_deref()).await?;
            print_json(&serde_json::to_value(students)?)?;
        }
        Command::Teachers { search } => {
            let teachers = gateway.users().teachers(search.as_deref()).await?;
            print_json(&serde_json::to_value(teachers)?)?;
        }
        Command::Plans => {
            print_json(&serde_json::to_value(gateway.plans().list().await?)?)?;
        }
        Command::Sections => {
            print_json(&serde_json::to_value(gateway.content().list().await?)?)?;
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
