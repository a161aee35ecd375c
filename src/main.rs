use anyhow::Context;
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing::info;

use erlang_language_server::config::CliOverrides;
use erlang_language_server::logging::init_logger;
use erlang_language_server::lsp::backend::ErlangBackend;

#[derive(Parser, Debug)]
#[command(name = "erlang-language-server")]
#[command(version, about = "Erlang language server with a live runtime bridge", long_about = None)]
struct Cli {
    /// Log filter for stderr, e.g. `debug` or `erlang_language_server=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Disable ANSI colors in stderr logs
    #[arg(long)]
    no_color: bool,

    /// Do not write a per-session debug log file
    #[arg(long)]
    no_file_logging: bool,

    /// Runtime node name, overriding `runtime.nodeName`
    #[arg(long)]
    node_name: Option<String>,

    /// Distribution cookie, overriding `runtime.cookie`
    #[arg(long)]
    cookie: Option<String>,

    /// Never connect to or start an Erlang runtime
    #[arg(long)]
    no_runtime: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            node_name: self.node_name.clone(),
            cookie: self.cookie.clone(),
            no_runtime: self.no_runtime,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logger(cli.no_color, cli.log_level.as_deref(), !cli.no_file_logging)
        .context("failed to initialize logging")?;
    info!("Starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let overrides = cli.overrides();
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let (service, socket) = LspService::new(move |client| ErlangBackend::new(client, overrides));

    Server::new(stdin, stdout, socket).serve(service).await;
    info!("Server exited");
    Ok(())
}
