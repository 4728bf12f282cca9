/// devctl: drive keygen, reshare and keysign sessions from the command line

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use session_engine::auth;
use session_engine::logging::init_logging;
use session_engine::mpc::SimulatedMpcBackend;
use session_engine::vault::backup::{export_file_name, export_vault, import_vault};
use session_engine::{
    Completed, DevConfig, EngineConfig, FileVaultStore, KeygenParams, KeysignParams, PartyId,
    ReshareParams, SessionCoordinator, SignatureScheme, Vault, VaultStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "devctl", version = "0.1", about = "TSS session coordination CLI")]
struct Cli {
    /// Write file logs as JSON instead of logfmt
    #[arg(long, global = true)]
    json_logs: bool,

    #[arg(long, global = true, default_value = "logs")]
    log_dir: String,

    /// Config file (defaults to ~/.vultisig/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Vault directory (defaults to ~/.vultisig/vaults)
    #[arg(long, global = true)]
    vault_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, reshare, sign with and inspect vaults
    #[command(subcommand)]
    Vault(VaultCommand),
    /// Install plugins onto a vault
    #[command(subcommand)]
    Plugin(PluginCommand),
    /// Authenticate against the Verifier
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Generate a new 2-of-2 vault with the Fast Vault Server
    Generate {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        password: String,
        #[arg(long, default_value = "")]
        email: String,
        /// Keep the result in memory instead of writing it to disk
        #[arg(long)]
        dry_run: bool,
    },
    /// Reshare a vault to add the Verifier and a plugin
    Reshare {
        #[command(flatten)]
        target: VaultArg,
        #[arg(long)]
        plugin: String,
        #[arg(short, long, default_value = "")]
        password: String,
        /// Verifier URL (overrides config)
        #[arg(long)]
        verifier: Option<String>,
    },
    /// Sign one or more hex message hashes with the Fast Vault Server
    Keysign {
        #[command(flatten)]
        target: VaultArg,
        #[arg(short, long = "message", required = true)]
        messages: Vec<String>,
        #[arg(long)]
        eddsa: bool,
        #[arg(long, default_value = "m/44'/60'/0'/0/0")]
        derive_path: String,
        #[arg(short, long, default_value = "")]
        password: String,
    },
    List,
    Info {
        #[command(flatten)]
        target: VaultArg,
    },
    /// Make a vault the default for later commands
    Use { vault: String },
    /// Import a vault from a .vult backup or vault JSON
    Import {
        #[arg(short, long, env = "VAULT_PATH")]
        file: PathBuf,
        /// Backup password, also used to log in to the Verifier
        #[arg(short, long, env = "VAULT_PASSWORD", default_value = "")]
        password: String,
        /// Replace existing vaults, even ones already reshared with a plugin
        #[arg(long)]
        force: bool,
    },
    /// Write a vault to a JSON file (mode 0600)
    Export {
        #[command(flatten)]
        target: VaultArg,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PluginCommand {
    /// 4-party reshare: CLI + Fast Vault Server + Verifier + plugin
    Install {
        plugin: String,
        #[command(flatten)]
        target: VaultArg,
        #[arg(short, long, default_value = "")]
        password: String,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    Login {
        #[command(flatten)]
        target: VaultArg,
        #[arg(short, long, default_value = "")]
        password: String,
    },
    Logout,
    Status,
}

#[derive(Args, Clone, Default)]
struct VaultArg {
    /// Vault file prefix or public key (defaults to the configured vault)
    #[arg(long = "vault")]
    vault: Option<String>,
}

struct Workspace {
    config_path: PathBuf,
    dev: DevConfig,
    store: FileVaultStore,
}

impl Workspace {
    fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(DevConfig::default_path);
        let dev = DevConfig::load(&config_path).context("load config")?;
        let store = FileVaultStore::new(cli.vault_dir.clone().unwrap_or_else(FileVaultStore::default_dir));
        Ok(Workspace { config_path, dev, store })
    }

    fn coordinator(&self) -> Result<SessionCoordinator> {
        let config = EngineConfig::from_dev_config(&self.dev);
        Ok(SessionCoordinator::from_config(config, Arc::new(SimulatedMpcBackend::new()))?)
    }

    /// Vault named by `--vault`, else the configured one, else the first found.
    fn resolve(&self, target: &VaultArg) -> Result<Vault> {
        let prefix = target
            .vault
            .clone()
            .or_else(|| (!self.dev.public_key_ecdsa.is_empty()).then(|| self.dev.public_key_ecdsa.clone()));
        match prefix {
            Some(prefix) => {
                let key = prefix.get(..16).unwrap_or(&prefix);
                Ok(self.store.load(key).with_context(|| format!("vault not found: {prefix}"))?)
            }
            None => {
                let vault = self
                    .store
                    .list()?
                    .into_iter()
                    .next()
                    .context("no vaults found, run `devctl vault generate` first")?;
                println!("Using vault: {}", vault.name);
                Ok(vault)
            }
        }
    }

    fn save_config(&self) -> Result<()> {
        self.dev.save(&self.config_path).context("save config")
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling session");
            trigger.cancel();
        }
    });
    cancel
}

fn print_roster<T>(done: &Completed<T>) {
    println!("  Session: {}", done.session_id);
    for (i, (party, role)) in done.roster.iter().enumerate() {
        println!("    {}. {:<28} {}", i + 1, party.as_str(), role);
    }
    if let Some(err) = &done.completion_error {
        println!("  Warning: {err}");
    }
}

fn print_vault(vault: &Vault) {
    println!("Vault: {}", vault.name);
    println!("  ECDSA:        {}", vault.public_key_ecdsa);
    println!("  EdDSA:        {}", vault.public_key_eddsa);
    println!("  Local party:  {}", vault.local_party_id);
    println!("  Signers ({}):", vault.signers.len());
    for signer in &vault.signers {
        println!("    - {signer}");
    }
    if !vault.reshare_prefix.is_empty() {
        println!("  Reshare prefix: {}", vault.reshare_prefix);
    }
    println!("  Created:      {}", vault.created_at);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // keep the guard alive so buffered file logs get flushed on exit
    let _guard = init_logging(&cli.log_dir, cli.json_logs);

    let mut ctx = Workspace::load(&cli)?;

    match cli.command {
        Commands::Vault(cmd) => run_vault(&mut ctx, cmd).await,
        Commands::Plugin(PluginCommand::Install { plugin, target, password }) => {
            let _lock = ctx.store.lock()?;
            let vault = ctx.resolve(&target)?;
            let coordinator = ctx.coordinator()?;

            println!("Installing plugin {plugin}...");
            println!("  Vault: {} ({}...)", vault.name, vault.file_name().trim_end_matches(".json"));
            println!("  Verifier: {}", coordinator.config().verifier_url);

            match coordinator.vault_exists(&vault.public_key_ecdsa).await {
                Ok(true) => println!("  Fast Vault: Yes"),
                Ok(false) => bail!("vault {} is not a Fast Vault, plugins need the Fast Vault Server", vault.name),
                Err(e) => println!("  Warning: Could not check Fast Vault Server: {e}"),
            }

            let auth_header = auth::auth_header(&ctx.dev, Utc::now())?;
            reshare(&ctx, &coordinator, &vault, plugin, None, Some(auth_header), password).await
        }
        Commands::Auth(AuthCommand::Login { target, password }) => {
            let vault = ctx.resolve(&target)?;
            let coordinator = ctx.coordinator()?;
            println!("Authenticating with verifier...");
            println!("  Vault: {}", vault.name);
            println!("  Verifier: {}", coordinator.config().verifier_url);

            let token = auth::login(&coordinator, &vault, &password, &cancel_on_ctrl_c()).await?;
            token.store(&mut ctx.dev);
            ctx.save_config()?;
            println!("Authenticated. Token expires: {}", token.expires_at.to_rfc3339());
            Ok(())
        }
        Commands::Auth(AuthCommand::Logout) => {
            auth::logout(&mut ctx.dev);
            ctx.save_config()?;
            println!("Logged out.");
            Ok(())
        }
        Commands::Auth(AuthCommand::Status) => {
            match auth::AuthToken::from_config(&ctx.dev) {
                Ok(token) if token.is_expired(Utc::now()) => {
                    println!("Token expired at {}", token.expires_at.to_rfc3339())
                }
                Ok(token) => {
                    println!("Authenticated");
                    println!("  Public Key: {}", token.public_key);
                    println!("  Expires: {}", token.expires_at.to_rfc3339());
                }
                Err(_) => println!("Not authenticated. Run: devctl auth login"),
            }
            Ok(())
        }
    }
}

async fn run_vault(ctx: &mut Workspace, cmd: VaultCommand) -> Result<()> {
    match cmd {
        VaultCommand::Generate { name, password, email, dry_run } => {
            let _lock = ctx.store.lock()?;
            let coordinator = ctx.coordinator()?;
            let local_party = PartyId::generate_local();

            println!("Generating vault {name} as {local_party}...");
            let started = Instant::now();
            let done = coordinator
                .keygen(
                    local_party,
                    KeygenParams {
                        name,
                        encryption_password: password,
                        email,
                    },
                    &cancel_on_ctrl_c(),
                )
                .await?;

            if dry_run {
                done.value.validate()?;
                println!("Dry run: vault not written to disk");
            } else {
                ctx.store.save(&done.value)?;
                println!("Saved to {}", ctx.store.path_of(&done.value).display());
            }
            print_roster(&done);
            print_vault(&done.value);
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Keygen finished");
            Ok(())
        }
        VaultCommand::Reshare { target, plugin, password, verifier } => {
            let _lock = ctx.store.lock()?;
            let vault = ctx.resolve(&target)?;
            let coordinator = ctx.coordinator()?;
            let auth_header = auth::auth_header(&ctx.dev, Utc::now()).ok();
            if auth_header.is_none() {
                warn!("No valid auth token; the Verifier may refuse the reshare");
            }
            reshare(ctx, &coordinator, &vault, plugin, verifier, auth_header, password).await
        }
        VaultCommand::Keysign { target, messages, eddsa, derive_path, password } => {
            let _lock = ctx.store.lock()?;
            let vault = ctx.resolve(&target)?;
            for message in &messages {
                if hex::decode(message).is_err() {
                    bail!("message is not hex: {message}");
                }
            }
            let scheme = if eddsa { SignatureScheme::EdDsa } else { SignatureScheme::Ecdsa };

            let done = ctx
                .coordinator()?
                .keysign(
                    &vault,
                    KeysignParams {
                        messages: messages.clone(),
                        scheme,
                        derive_path,
                        vault_password: password,
                    },
                    &cancel_on_ctrl_c(),
                )
                .await?;

            print_roster(&done);
            for (message, sig) in messages.iter().zip(&done.value) {
                println!("{message}");
                println!("  r: {}", sig.r);
                println!("  s: {}", sig.s);
                println!("  v: {}", sig.recovery_id);
                println!("  der: {}", sig.der_signature);
            }
            Ok(())
        }
        VaultCommand::List => {
            let vaults = ctx.store.list()?;
            if vaults.is_empty() {
                println!("No vaults in {}", ctx.store.dir().display());
            }
            for vault in vaults {
                let current = if vault.public_key_ecdsa == ctx.dev.public_key_ecdsa { "*" } else { " " };
                println!(
                    "{current} {:<24} {}  {} signers",
                    vault.name,
                    vault.file_name().trim_end_matches(".json"),
                    vault.signers.len()
                );
            }
            Ok(())
        }
        VaultCommand::Info { target } => {
            print_vault(&ctx.resolve(&target)?);
            Ok(())
        }
        VaultCommand::Use { vault } => {
            let vault = ctx.resolve(&VaultArg { vault: Some(vault) })?;
            ctx.dev.vault_name = vault.name.clone();
            ctx.dev.public_key_ecdsa = vault.public_key_ecdsa.clone();
            ctx.dev.public_key_eddsa = vault.public_key_eddsa.clone();
            ctx.save_config()?;
            println!("Now using vault {}", vault.name);
            Ok(())
        }
        VaultCommand::Import { file, password, force } => {
            let _lock = ctx.store.lock()?;
            let data = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let imported = import_vault(&ctx.store, &data, &password, force, Utc::now())?;
            let vault = &imported.vault;

            ctx.dev.vault_name = vault.name.clone();
            ctx.dev.public_key_ecdsa = vault.public_key_ecdsa.clone();
            ctx.dev.public_key_eddsa = vault.public_key_eddsa.clone();
            ctx.save_config()?;

            println!("Imported {} ({})", file.display(), imported.format);
            if imported.replaced > 0 {
                println!("  Replaced {} existing vault(s)", imported.replaced);
            }
            print_vault(vault);
            println!("  Key shares:   {}", vault.key_shares.len());
            println!("  Saved to {}", ctx.store.path_of(vault).display());

            let coordinator = ctx.coordinator()?;
            match coordinator.vault_exists(&vault.public_key_ecdsa).await {
                Ok(true) => println!("Fast Vault: Yes"),
                Ok(false) => {
                    println!("Warning: not a Fast Vault, plugin installs will not work with this vault");
                    return Ok(());
                }
                Err(e) => {
                    println!("Warning: Could not check Fast Vault Server: {e}");
                    return Ok(());
                }
            }

            if password.is_empty() {
                println!("To authenticate, re-run with --password or use: devctl auth login");
                return Ok(());
            }
            println!("Authenticating with verifier...");
            match auth::login(&coordinator, vault, &password, &cancel_on_ctrl_c()).await {
                Ok(token) => {
                    token.store(&mut ctx.dev);
                    ctx.save_config()?;
                    println!("Authenticated. Token expires: {}", token.expires_at.to_rfc3339());
                }
                Err(e) => {
                    warn!(error = %e, "Login after import failed");
                    println!("Warning: Authentication failed: {e}");
                    println!("Authenticate later with: devctl auth login --password <password>");
                }
            }
            Ok(())
        }
        VaultCommand::Export { target, output } => {
            let vault = ctx.resolve(&target)?;
            let path = output.unwrap_or_else(|| PathBuf::from(export_file_name(&vault)));
            export_vault(&vault, &path)?;
            println!("Vault exported to: {}", path.display());
            Ok(())
        }
    }
}

/// Runs the reshare and replaces the stored vault only on success.
async fn reshare(
    ctx: &Workspace,
    coordinator: &SessionCoordinator,
    vault: &Vault,
    plugin_id: String,
    verifier_url: Option<String>,
    auth_header: Option<String>,
    password: String,
) -> Result<()> {
    println!("Initiating {}-party TSS reshare...", vault.signers.len() + 2);
    let started = Instant::now();

    let done = coordinator
        .reshare(
            vault,
            ReshareParams {
                plugin_id,
                verifier_url,
                auth_header,
                vault_password: password,
            },
            &cancel_on_ctrl_c(),
        )
        .await?;

    ctx.store.save(&done.value)?;
    print_roster(&done);
    println!(
        "Reshare complete: {} signers in {:?}",
        done.value.signers.len(),
        started.elapsed()
    );
    Ok(())
}
