use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser as ClapParser, Subcommand};
use color_eyre::eyre::{bail, Result, WrapErr};
use tracing_subscriber::EnvFilter;

use grammarian::{GrammarService, HandleKind, LanguageHandle, LoadOptions, PrefixPolicy, Settings};

#[derive(ClapParser, Debug)]
#[command(name = "grammarian", about = "Install and use tree-sitter grammars")]
struct Cli {
    /// Storage root (defaults to $GRAMMARIAN_HOME or the user data dir).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Registry base URL.
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Per-file download timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Match manifest entries as-is when they lack the manifest prefix.
    #[arg(long, global = true)]
    keep_unprefixed: bool,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed grammars.
    List,
    /// Install a grammar from the registry.
    Install { id: String },
    /// Remove an installed grammar.
    Uninstall { id: String },
    /// Show modules, extensions and queries of an installed grammar.
    Info { id: String },
    /// Parse a file and print its syntax tree.
    Parse {
        id: String,
        file: PathBuf,
        /// Install the grammar first if it is missing.
        #[arg(long)]
        install: bool,
    },
    /// Print a query document of an installed grammar.
    Query { id: String, name: String },
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = Settings::from_env();
        if let Some(root) = &self.root {
            settings.storage_root = root.clone();
        }
        if let Some(registry) = &self.registry {
            settings.registry_url = registry.clone();
        }
        if let Some(secs) = self.timeout {
            settings.download_timeout = Duration::from_secs(secs);
        }
        if self.keep_unprefixed {
            settings.prefix_policy = PrefixPolicy::Keep;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let service = GrammarService::with_defaults(cli.settings());
    service.wait_for_init().await?;

    match &cli.command {
        Command::List => {
            for id in service.get_available_languages().await? {
                match service.installed_version(&id).await? {
                    Some(version) => println!("{id} {version}"),
                    None => println!("{id}"),
                }
            }
        }
        Command::Install { id } => {
            if service.install_language(id).await? {
                println!("Installed {id}");
            } else {
                println!("{id} is already installed");
            }
        }
        Command::Uninstall { id } => {
            if service.uninstall_language(id).await? {
                println!("Uninstalled {id}");
            } else {
                println!("{id} is not installed");
            }
        }
        Command::Info { id } => {
            let Some(handle) = service.get_language(id, LoadOptions::default()).await? else {
                bail!("{id} is not installed");
            };
            print_info(&handle, service.installed_version(id).await?);
        }
        Command::Parse { id, file, install } => {
            let source = fs::read_to_string(file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            if *install {
                service.ensure_language(id).await?;
            }
            let tree = service.parse(id, &source, LoadOptions::default()).await?;
            println!("{}", tree.root_node().to_sexp());
        }
        Command::Query { id, name } => {
            let Some(handle) = service.get_language(id, LoadOptions::default()).await? else {
                bail!("{id} is not installed");
            };
            match handle.query(name) {
                Some(text) => print!("{text}"),
                None => bail!("{id} has no query named {name}"),
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn print_info(handle: &LanguageHandle, version: Option<String>) {
    println!("Grammar: {}", handle.name());
    if let Some(version) = version {
        println!("Version: {version}");
    }
    for grammar in &handle.config().grammars {
        match &grammar.scope {
            Some(scope) => println!("  {} ({scope})", grammar.name),
            None => println!("  {}", grammar.name),
        }
    }

    if let HandleKind::Container { primary, extensions } = handle.kind() {
        match primary {
            Some(module) => println!("Module: {}", module.file_name),
            None => println!("Module: <unresolved>"),
        }
        for (name, ext) in extensions {
            if let Some(module) = ext.module() {
                println!("  extension {name}: {}", module.file_name);
            }
        }
    }

    let queries: Vec<_> = handle.query_names().collect();
    if !queries.is_empty() {
        println!("Queries: {}", queries.join(", "));
    }
}
