use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use serde::Serialize;
use vhostd::{
    adapters::{ConfiguredPrimaryHost, JsonFileStore, NginxServingLayer, StaticServicesRegistry},
    config::{ConfigValidator, DEFAULT_CONFIG_TOML, EngineConfig, loader},
    core::{
        CommandEngine, ConfigSynthesizer, CreateVirtualHost, EngineError, EngineTimeouts,
        UpdateMapping,
        model::{
            Fqdn, MappingDraft, MappingId, MappingPath, MappingTarget, MatchPattern, TargetType,
            ValidationError, VirtualHostType,
        },
    },
    metrics, tracing_setup,
};

/// Exit code for rejected input, as opposed to infrastructure failures (1).
const EXIT_USER_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    #[clap(short, long, global = true, default_value = "vhostd.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate,
    /// Initialize a new configuration file
    Init,
    #[clap(flatten)]
    Engine(EngineCommands),
}

/// Commands served by a `CommandEngine` built from the configuration.
#[derive(clap::Subcommand, Debug)]
enum EngineCommands {
    /// Manage virtual hosts
    #[clap(subcommand)]
    Vhost(VhostCommands),
    /// Manage path mappings
    #[clap(subcommand)]
    Mapping(MappingCommands),
    /// Show which mapping serves a request
    Resolve {
        hostname: String,
        path: String,
    },
    /// Print the serving configuration rendered from the store
    Render,
}

#[derive(Parser, Debug)]
enum VhostCommands {
    /// List every virtual host
    List,
    /// List server blocks with their aliases and mappings
    Tree,
    /// Create a virtual host
    Create {
        hostname: String,
        /// top-level, alias or wildcard
        #[clap(long = "type", default_value = "top-level")]
        kind: String,
        /// Parent host, required for aliases
        #[clap(long)]
        parent: Option<String>,
    },
    /// Delete a virtual host, its aliases and their mappings
    Delete { hostname: String },
}

#[derive(clap::Args, Debug)]
struct MappingArgs {
    path: String,
    /// equals, begins-with, contains or ends-with
    #[clap(long = "match", default_value = "begins-with")]
    match_pattern: String,
    /// url, inline-response, redirect or response-code
    #[clap(long = "target-type")]
    target_type: String,
    /// URL, body or location, depending on the target type
    #[clap(long)]
    value: Option<String>,
    /// Status code for response-code targets
    #[clap(long = "code")]
    response_code: Option<u16>,
}

impl MappingArgs {
    fn parse(&self) -> Result<(MappingPath, MatchPattern, MappingTarget), ValidationError> {
        let target_type: TargetType = self.target_type.parse()?;
        Ok((
            MappingPath::new(&self.path)?,
            self.match_pattern.parse()?,
            MappingTarget::new(target_type, self.value.as_deref(), self.response_code)?,
        ))
    }
}

#[derive(Parser, Debug)]
enum MappingCommands {
    /// Add a mapping to a virtual host
    Create {
        hostname: String,
        #[clap(flatten)]
        mapping: MappingArgs,
    },
    /// Replace the path, match pattern and target of a mapping
    Update {
        id: String,
        #[clap(flatten)]
        mapping: MappingArgs,
    },
    /// Delete a mapping
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let command = match args.command {
        Commands::Validate => return validate_config_command(&args.config).await,
        Commands::Init => return init_config_command(&args.config).await,
        Commands::Engine(command) => command,
    };

    let config = load_engine_config(&args.config).await?;
    ConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {e}"))?;

    tracing_setup::init_tracing(&config.logging.level, config.logging.json)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics();
    if config.primary_hostname.is_none() {
        tracing::warn!("no primary_hostname configured, every virtual host can be deleted");
    }

    let engine = build_engine(&config).await?;

    if let Err(report) = run_command(&engine, command).await {
        let user_error = report
            .downcast_ref::<EngineError>()
            .map(EngineError::is_user_error)
            .unwrap_or_else(|| report.downcast_ref::<ValidationError>().is_some());
        if user_error {
            eprintln!("error: {report}");
            std::process::exit(EXIT_USER_ERROR);
        }
        return Err(report);
    }
    Ok(())
}

async fn load_engine_config(config_path: &str) -> Result<EngineConfig> {
    if Path::new(config_path).exists() {
        loader::load_config(config_path)
            .await
            .with_context(|| format!("Failed to load config from {config_path}"))
    } else {
        loader::load_default_config()
    }
}

async fn build_engine(config: &EngineConfig) -> Result<CommandEngine> {
    let store = JsonFileStore::open(&config.store.path)
        .await
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;
    let serving = NginxServingLayer::new(
        &config.serving.config_dir,
        config.serving.reload_command.clone(),
    );
    let services = StaticServicesRegistry::new(config.installed_services.iter().cloned());
    let primary = config
        .primary_hostname
        .as_deref()
        .map(Fqdn::new)
        .transpose()
        .context("Invalid primary_hostname")?;
    let timeouts = EngineTimeouts {
        apply: config.serving.apply_timeout().context("Invalid serving.apply_timeout")?,
        reload: config.serving.reload_timeout().context("Invalid serving.reload_timeout")?,
    };

    Ok(CommandEngine::new(
        Arc::new(store),
        Arc::new(serving),
        Arc::new(services),
        Arc::new(ConfiguredPrimaryHost::new(primary)),
    )
    .with_synthesizer(ConfigSynthesizer::new(config.serving.listen_port))
    .with_timeouts(timeouts))
}

async fn run_command(engine: &CommandEngine, command: EngineCommands) -> Result<()> {
    match command {
        EngineCommands::Vhost(VhostCommands::List) => print_json(&engine.read_virtual_hosts().await?),
        EngineCommands::Vhost(VhostCommands::Tree) => {
            print_json(&engine.read_virtual_hosts_with_mappings().await?)
        }
        EngineCommands::Vhost(VhostCommands::Create {
            hostname,
            kind,
            parent,
        }) => {
            let command = CreateVirtualHost {
                hostname: Fqdn::new(&hostname)?,
                kind: kind.parse::<VirtualHostType>()?,
                parent_hostname: parent.as_deref().map(Fqdn::new).transpose()?,
            };
            print_json(&engine.create_virtual_host(command).await?)
        }
        EngineCommands::Vhost(VhostCommands::Delete { hostname }) => {
            print_json(&engine.delete_virtual_host(&Fqdn::new(&hostname)?).await?)
        }
        EngineCommands::Mapping(MappingCommands::Create { hostname, mapping }) => {
            let (path, match_pattern, target) = mapping.parse()?;
            let draft = MappingDraft {
                hostname: Fqdn::new(&hostname)?,
                path,
                match_pattern,
                target,
            };
            print_json(&engine.create_mapping(draft).await?)
        }
        EngineCommands::Mapping(MappingCommands::Update { id, mapping }) => {
            let (path, match_pattern, target) = mapping.parse()?;
            let command = UpdateMapping {
                id: id.parse::<MappingId>()?,
                path,
                match_pattern,
                target,
            };
            print_json(&engine.update_mapping(command).await?)
        }
        EngineCommands::Mapping(MappingCommands::Delete { id }) => {
            print_json(&engine.delete_mapping(id.parse::<MappingId>()?).await?)
        }
        EngineCommands::Resolve { hostname, path } => {
            print_json(&engine.resolve(&Fqdn::new(&hostname)?, &path).await?)
        }
        EngineCommands::Render => {
            for artifact in engine.render().await?.iter() {
                println!("# {}", artifact.file_name);
                println!("{}", artifact.contents);
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{json}");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match loader::load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!(
                "   • Primary Host: {}",
                config.primary_hostname.as_deref().unwrap_or("(none)")
            );
            println!("   • Store: {}", config.store.path.display());
            println!("   • Config Dir: {}", config.serving.config_dir.display());
            println!("   • Reload Command: {}", config.serving.reload_command.join(" "));
            println!("   • Installed Services: {}", config.installed_services.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG_TOML)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'vhostd --config {config_path} vhost list' to check the setup");
    Ok(())
}
