//! idreg command line host
//!
//! Plays the role of the execution environment for the identity registry:
//! it supplies the caller and block height, keeps state between invocations
//! and runs exactly one registry operation per invocation.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use idreg_registry::{
    CallContext, IdentityHash, IdentityRegistry, Principal, Proof, RegistryConfig, RegistryError,
    StubVerifier, VerificationError,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

mod config;
mod state;

use config::{init_logging, AppConfig};
use state::StateStore;

#[derive(Parser)]
#[command(name = "idreg-cli")]
#[command(about = "Identity registry command line host", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./idreg.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry state file, overrides `state_path` from the configuration
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh registry administered by `--admin`
    Init {
        #[arg(long)]
        admin: Principal,
        /// Initial metadata limit (defaults to the configured value)
        #[arg(long)]
        max_metadata_size: Option<usize>,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Register the caller's identity hash
    Register(SubmissionArgs),
    /// Replace the caller's hash, expiry and metadata
    Update(SubmissionArgs),
    /// Revoke the caller's identity
    Revoke(CallArgs),
    /// Pause all identity mutations (admin)
    Pause(CallArgs),
    /// Resume identity mutations (admin)
    Unpause(CallArgs),
    /// Transfer admin rights (admin)
    SetAdmin {
        #[command(flatten)]
        call: CallArgs,
        #[arg(long)]
        new_admin: Principal,
    },
    /// Change the metadata size limit (admin)
    SetMaxMetadataSize {
        #[command(flatten)]
        call: CallArgs,
        #[arg(long)]
        size: usize,
    },
    /// Check whether a principal holds a live identity
    IsRegistered(QueryArgs),
    /// Show a principal's live identity record
    Details(QueryArgs),
    /// Show a principal's identity hash
    Hash(QueryArgs),
    /// Look up which principal reserved a hash
    Owner {
        #[arg(long)]
        hash: IdentityHash,
    },
    /// Ask the configured verifier about a principal's proof
    Verify {
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long)]
        proof: Proof,
    },
    /// Compute the SHA-256 identity hash of a document
    Digest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show table counters and configuration
    Stats,
}

#[derive(Args)]
struct CallArgs {
    /// Calling principal
    #[arg(long)]
    caller: Principal,
    /// Current block height
    #[arg(long)]
    height: u64,
}

impl CallArgs {
    fn context(&self) -> CallContext {
        CallContext::new(self.caller, self.height)
    }
}

#[derive(Args)]
struct SubmissionArgs {
    #[command(flatten)]
    call: CallArgs,
    /// Identity hash, hex encoded (must decode to 32 bytes)
    #[arg(long)]
    hash: String,
    /// Expiry block height
    #[arg(long)]
    expiry: u64,
    /// Optional metadata, hex encoded
    #[arg(long)]
    metadata: Option<String>,
}

impl SubmissionArgs {
    fn decode(&self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let hash = decode_hex(&self.hash).context("--hash is not valid hex")?;
        let metadata = self
            .metadata
            .as_deref()
            .map(decode_hex)
            .transpose()
            .context("--metadata is not valid hex")?;
        Ok((hash, metadata))
    }
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long)]
    principal: Principal,
    /// Current block height
    #[arg(long)]
    height: u64,
}

impl Commands {
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            Commands::Register(_)
                | Commands::Update(_)
                | Commands::Revoke(_)
                | Commands::Pause(_)
                | Commands::Unpause(_)
                | Commands::SetAdmin { .. }
                | Commands::SetMaxMetadataSize { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config)?;
    match &config.config_path {
        Some(path) => info!(path = %path.display(), "loaded configuration file"),
        None => info!("no configuration file found, using defaults and environment"),
    }

    let state_path = cli.state.unwrap_or_else(|| config.state_path.clone());
    let output = run(cli.command, &config, &state_path).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn run(command: Commands, config: &AppConfig, state_path: &Path) -> Result<Value> {
    match command {
        Commands::Init {
            admin,
            max_metadata_size,
            force,
        } => {
            let store = StateStore::open(state_path)?;
            if store.exists() && !force {
                anyhow::bail!(
                    "State file {} already exists; pass --force to overwrite it",
                    store.path().display()
                );
            }

            let registry_config = RegistryConfig::new(admin)
                .with_max_metadata_size(max_metadata_size.unwrap_or(config.max_metadata_size));
            let registry = IdentityRegistry::with_config(registry_config);
            store.save(&registry)?;
            info!(%admin, path = %store.path().display(), "registry initialised");

            Ok(json!({ "ok": true, "config": registry.config() }))
        }
        Commands::Digest { file } => {
            let document =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            Ok(json!({ "hash": IdentityHash::digest(&document) }))
        }
        command => {
            let store = StateStore::open(state_path)?;
            let registry = store
                .load()?
                .with_verifier_timeout(config.verifier_timeout);

            let mutation = command.is_mutation();
            let output = execute(command, &registry, config).await?;
            if mutation {
                store.save(&registry)?;
            }
            Ok(output)
        }
    }
}

async fn execute(
    command: Commands,
    registry: &IdentityRegistry,
    config: &AppConfig,
) -> Result<Value> {
    let output = match command {
        Commands::Register(args) => {
            let (hash, metadata) = args.decode()?;
            let result = registry.register(&args.call.context(), hash, args.expiry, metadata);
            accepted(registry, result)?
        }
        Commands::Update(args) => {
            let (hash, metadata) = args.decode()?;
            let result = registry.update(&args.call.context(), hash, args.expiry, metadata);
            accepted(registry, result)?
        }
        Commands::Revoke(call) => accepted(registry, registry.revoke(&call.context()))?,
        Commands::Pause(call) => accepted(registry, registry.pause(&call.context()))?,
        Commands::Unpause(call) => accepted(registry, registry.unpause(&call.context()))?,
        Commands::SetAdmin { call, new_admin } => {
            accepted(registry, registry.set_admin(&call.context(), new_admin))?
        }
        Commands::SetMaxMetadataSize { call, size } => {
            accepted(registry, registry.set_max_metadata_size(&call.context(), size))?
        }
        Commands::IsRegistered(query) => json!({
            "principal": query.principal,
            "registered": registry.is_registered(&query.principal, query.height),
        }),
        Commands::Details(query) => {
            let record = registry
                .get_details(&query.principal, query.height)
                .map_err(rejected)?;
            json!({ "principal": query.principal, "record": record })
        }
        Commands::Hash(query) => {
            let hash = registry
                .get_hash(&query.principal, query.height)
                .map_err(rejected)?;
            json!({ "principal": query.principal, "hash": hash })
        }
        Commands::Owner { hash } => json!({
            "hash": hash,
            "owner": registry.get_owner_of_hash(&hash),
        }),
        Commands::Verify { query, proof } => {
            let verifier = StubVerifier::new();
            for (principal, approved) in &config.verifier_allow {
                verifier.approve(*principal, *approved);
            }
            let verified = registry
                .verify_with_external_verifier(&query.principal, &verifier, &proof, query.height)
                .await
                .map_err(|err| match err {
                    VerificationError::Registry(err) => rejected(err),
                    VerificationError::Verifier(err) => {
                        anyhow::Error::new(err).context("external verifier failed")
                    }
                })?;
            json!({ "principal": query.principal, "verified": verified })
        }
        Commands::Stats => json!({
            "stats": registry.stats(),
            "config": registry.config(),
        }),
        Commands::Init { .. } | Commands::Digest { .. } => {
            anyhow::bail!("command does not operate on loaded registry state")
        }
    };
    Ok(output)
}

/// Report a committed mutation along with the events it produced.
fn accepted(registry: &IdentityRegistry, result: Result<(), RegistryError>) -> Result<Value> {
    result.map_err(rejected)?;
    Ok(json!({ "ok": true, "events": registry.drain_events() }))
}

fn rejected(err: RegistryError) -> anyhow::Error {
    anyhow::anyhow!("{} (code {}): {}", err.symbol(), err.code(), err)
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let value = value.trim();
    Ok(hex::decode(value.strip_prefix("0x").unwrap_or(value))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ADMIN: Principal = Principal::new([0u8; 32]);
    const ALICE: Principal = Principal::new([1u8; 32]);

    fn test_config(state_path: &Path) -> AppConfig {
        AppConfig {
            config_path: None,
            state_path: state_path.to_path_buf(),
            max_metadata_size: 4,
            verifier_timeout: Duration::from_secs(1),
            verifier_allow: vec![(ALICE, Proof::new([7u8; 32]))],
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }

    fn call(caller: Principal, height: u64) -> CallArgs {
        CallArgs { caller, height }
    }

    fn submission(caller: Principal, height: u64, hash: &str, expiry: u64) -> SubmissionArgs {
        SubmissionArgs {
            call: call(caller, height),
            hash: hash.to_string(),
            expiry,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn state_persists_across_invocations() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("state.json");
        let config = test_config(&path);

        let init = Commands::Init {
            admin: ADMIN,
            max_metadata_size: None,
            force: false,
        };
        let output = run(init, &config, &path).await.expect("command succeeds");
        assert_eq!(output["config"]["max_metadata_size"], 4);

        let hash = "aa".repeat(32);
        let output = run(
            Commands::Register(submission(ALICE, 0, &hash, 100)),
            &config,
            &path,
        )
        .await
        .expect("command succeeds");
        assert_eq!(output["events"][0]["event"], "identity_registered");

        let output = run(
            Commands::IsRegistered(QueryArgs {
                principal: ALICE,
                height: 99,
            }),
            &config,
            &path,
        )
        .await
        .expect("command succeeds");
        assert_eq!(output["registered"], true);

        let output = run(
            Commands::Owner {
                hash: IdentityHash::new([0xAA; 32]),
            },
            &config,
            &path,
        )
        .await
        .expect("command succeeds");
        assert_eq!(output["owner"], ALICE.to_string());
    }

    #[tokio::test]
    async fn rejected_mutation_does_not_touch_state() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("state.json");
        let config = test_config(&path);
        run(
            Commands::Init {
                admin: ADMIN,
                max_metadata_size: None,
                force: false,
            },
            &config,
            &path,
        )
        .await
        .expect("command succeeds");
        let before = fs::read_to_string(&path).expect("read file");

        let err = run(
            Commands::Register(submission(ALICE, 0, "abcd", 100)),
            &config,
            &path,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("ERR_INVALID_HASH"));

        let err = run(Commands::Pause(call(ALICE, 0)), &config, &path)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("code 109"));

        assert_eq!(fs::read_to_string(&path).expect("read file"), before);
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("state.json");
        let config = test_config(&path);
        let init = |force| Commands::Init {
            admin: ADMIN,
            max_metadata_size: Some(16),
            force,
        };

        run(init(false), &config, &path).await.expect("command succeeds");
        assert!(run(init(false), &config, &path).await.is_err());
        assert!(run(init(true), &config, &path).await.is_ok());
    }

    #[tokio::test]
    async fn verify_uses_configured_allow_list() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("state.json");
        let config = test_config(&path);
        run(
            Commands::Init {
                admin: ADMIN,
                max_metadata_size: None,
                force: false,
            },
            &config,
            &path,
        )
        .await
        .expect("command succeeds");
        run(
            Commands::Register(submission(ALICE, 0, &"bb".repeat(32), 50)),
            &config,
            &path,
        )
        .await
        .expect("command succeeds");

        let verify = |proof| Commands::Verify {
            query: QueryArgs {
                principal: ALICE,
                height: 1,
            },
            proof,
        };
        let output = run(verify(Proof::new([7u8; 32])), &config, &path)
            .await
            .expect("command succeeds");
        assert_eq!(output["verified"], true);

        let output = run(verify(Proof::new([8u8; 32])), &config, &path)
            .await
            .expect("command succeeds");
        assert_eq!(output["verified"], false);
    }

    #[tokio::test]
    async fn rejected_verify_reports_error_code() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("state.json");
        let config = test_config(&path);
        run(
            Commands::Init {
                admin: ADMIN,
                max_metadata_size: None,
                force: false,
            },
            &config,
            &path,
        )
        .await
        .expect("command succeeds");
        run(
            Commands::Register(submission(ALICE, 0, &"cc".repeat(32), 20)),
            &config,
            &path,
        )
        .await
        .expect("command succeeds");

        let verify = |principal, height| Commands::Verify {
            query: QueryArgs { principal, height },
            proof: Proof::new([7u8; 32]),
        };

        let err = run(verify(ADMIN, 1), &config, &path)
            .await
            .expect_err("admin holds no identity");
        assert_eq!(
            err.to_string(),
            format!(
                "ERR_NOT_REGISTERED (code 102): {}",
                RegistryError::NotRegistered
            )
        );

        let err = run(verify(ALICE, 20), &config, &path)
            .await
            .expect_err("record expired at block 20");
        assert!(err.to_string().starts_with("ERR_REGISTRATION_EXPIRED (code 106)"));
    }

    #[tokio::test]
    async fn digest_hashes_file_contents() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let document = dir.path().join("passport.txt");
        fs::write(&document, b"abc").expect("write file");
        let config = test_config(&dir.path().join("state.json"));

        let output = run(
            Commands::Digest { file: document },
            &config,
            &dir.path().join("state.json"),
        )
        .await
        .expect("command succeeds");
        assert_eq!(
            output["hash"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
