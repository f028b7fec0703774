use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use glove_acl::{AclListener, Whitelist};
use glove_ca::CertificateAuthority;
use glove_proxy::{Action, Engine, ProxyServer, Rule};
use glove_runtime::{setup_global, BuildInfo, Hook, Mode};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "glove", about = "Glove HTTP proxy", version)]
struct Cli {
    /// Logging mode [auto, console, struct]
    #[arg(long = "logMode", global = true, default_value = "auto")]
    log_mode: Mode,

    /// Logging level [trace, debug, info, warn, error]
    #[arg(long = "logLevel", global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the proxy server
    Listen(ListenArgs),
    /// Print version and build information
    Version,
}

#[derive(Args)]
struct ListenArgs {
    /// Bind the socket to this host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind the socket to this port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Allow-listed client IP address or CIDR mask; repeatable
    #[arg(long = "whitelist")]
    whitelist: Vec<String>,

    /// Path to the CA certificate in PEM format
    #[arg(long = "caCert", requires = "ca_private_key")]
    ca_cert: Option<PathBuf>,

    /// Path to the CA private key in PEM format
    #[arg(long = "caPrivateKey", requires = "ca_cert")]
    ca_private_key: Option<PathBuf>,

    /// Default strategy for connections to hosts without a rule
    /// [block, tunnel, mitm]
    #[arg(long = "defaultAction", default_value = "tunnel")]
    default_action: Action,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = setup_global(cli.log_mode, cli.log_level) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Version => {
            print_version();
            Ok(())
        }
        Command::Listen(args) => listen(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "exit");
            ExitCode::FAILURE
        }
    }
}

fn print_version() {
    let info = BuildInfo::current();
    println!("glove {}", info.version);
    if !info.build_time.is_empty() {
        println!("built:    {}", info.build_time);
    }
    if !info.branch.is_empty() {
        println!("branch:   {}", info.branch);
    }
    if !info.commit_hash.is_empty() {
        println!("commit:   {}", info.commit_hash);
    }
    if !info.environment.is_empty() {
        println!("built by: {}", info.environment);
    }
    println!("platform: {}/{}", info.os, info.arch);
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    let engine = Arc::new(build_engine(&args)?);

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to listen on {address}"))?;

    let server = ProxyServer::new(engine);
    let hook = Hook::new();
    hook.register("server", Arc::new(server.handle()));

    // the cancel channel stays open for the whole process lifetime; signals
    // are the only shutdown trigger for the CLI
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    hook.start(cancel_rx);

    tracing::info!(
        pid = std::process::id(),
        host = %args.host,
        port = args.port,
        "listen"
    );

    let outcome = if args.whitelist.is_empty() {
        server.run(listener).await
    } else {
        let whitelist = Whitelist::with_entries(args.whitelist.iter().map(String::as_str))
            .context("failed to parse the whitelist")?;
        server.run(AclListener::new(listener, whitelist)).await
    };

    outcome.context("proxy server terminated with an error")
}

fn build_engine(args: &ListenArgs) -> anyhow::Result<Engine> {
    let mut builder =
        Engine::builder().with_default_rule(Arc::new(Rule::new(args.default_action)));

    if let (Some(ca_cert), Some(ca_private_key)) = (&args.ca_cert, &args.ca_private_key) {
        let authority = Arc::new(
            CertificateAuthority::load(ca_cert, ca_private_key, None)
                .context("failed to load the certificate authority")?,
        );
        builder = builder.with_client_config(Arc::new(move |host: &str| {
            Ok(authority.server_config_for(host)?)
        }));
    }

    Ok(builder.build()?)
}
