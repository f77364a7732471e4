use std::{process::ExitCode, sync::Arc};

use async_trait::async_trait;
use clap::Parser;
use wsfed_relying_party::{
    config::RelyingPartyConfig,
    observability::init_tracing,
    wsfed::{
        RedirectOptions, RedirectOutcome, RequestContext, TokenValidationError, TokenValidator,
        ValidatedToken, ValidationContext, WsFederationHandler,
    },
};

/// CLI arguments for the WS-Federation relying party tool
#[derive(Parser, Debug)]
#[command(version, about = "WS-Federation relying party tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "wsfed.toml")]
    config: String,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print the sign-in redirect URL for a request
    SignInUrl {
        /// Host the request was made to (e.g. app.example.com)
        #[arg(long)]
        host: String,
        /// Scheme the request was made with
        #[arg(long, default_value = "https")]
        scheme: String,
        /// Requested path, used as the return URL
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Print the sign-out redirect URL
    SignOutUrl {
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "https")]
        scheme: String,
        /// Where the STS should send the browser afterwards
        #[arg(long)]
        return_url: Option<String>,
    },
    /// Resolve federation metadata and print what was learned
    Metadata,
}

/// The CLI never receives tokens, so it has nothing to validate them with.
struct NoTokenValidation;

#[async_trait]
impl TokenValidator for NoTokenValidation {
    async fn validate(
        &self,
        _token: &str,
        _context: &ValidationContext,
    ) -> Result<ValidatedToken, TokenValidationError> {
        Err(TokenValidationError::Unsupported(
            "token validation is not available from the command line".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match RelyingPartyConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _tracing_guard = match init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let handler = match WsFederationHandler::builder(config.wsfed, Arc::new(NoTokenValidation))
        .build()
    {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::SignInUrl { host, scheme, path } => {
            let request = RequestContext::new(scheme, host, path);
            handler
                .build_sign_in_redirect(&request, RedirectOptions::default())
                .await
                .map(print_redirect)
        }
        Command::SignOutUrl {
            host,
            scheme,
            return_url,
        } => {
            let request = RequestContext::new(scheme, host, "/");
            let options = RedirectOptions {
                return_url,
                ..Default::default()
            };
            handler
                .build_sign_out_redirect(&request, options)
                .await
                .map(print_redirect)
        }
        Command::Metadata => handler
            .resolver()
            .resolve_with_timeout(
                handler.config().metadata_cache_address(),
                handler.config().metadata_timeout(),
            )
            .await
            .map(|metadata| {
                println!(
                    "entity id:       {}",
                    metadata.entity_id.as_deref().unwrap_or("-")
                );
                println!("passive endpoint: {}", metadata.sign_in_endpoint);
                for key in &metadata.signing_keys {
                    println!(
                        "signing key:     sha256 {}",
                        key.thumbprint().as_deref().unwrap_or("<invalid base64>")
                    );
                }
            })
            .map_err(|e| {
                wsfed_relying_party::wsfed::ProtocolFailure::metadata_unavailable(
                    wsfed_relying_party::wsfed::FlowStage::Redirect,
                    &e,
                )
            }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_redirect(outcome: RedirectOutcome) {
    match outcome {
        RedirectOutcome::Redirect(redirect) => println!("{}", redirect.url),
        RedirectOutcome::Handled | RedirectOutcome::Skipped => {
            println!("(redirect suppressed by event hook)")
        }
    }
}
