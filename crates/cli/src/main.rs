//! HyDocPusher command-line tool.
//!
//! Provides subcommands for generating and validating configuration,
//! transforming captured CMS publish messages into archive submissions
//! offline, and managing the channel classification rule table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hydocpusher_core::attachment::{AttachmentResolver, SourceReport};
use hydocpusher_core::classification::{ClassificationRule, RuleTable, RulesFile};
use hydocpusher_core::{AppConfig, ClassificationResolver, SourceMessage, TransformCoordinator};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// HyDocPusher command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "hydocpusher",
    version,
    about = "Transform CMS publish events into archive submissions"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./hydocpusher.toml")]
    config: PathBuf,

    /// Log filter (e.g. "debug", "hydocpusher_core=trace"). Defaults to the
    /// config's logging.level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file and a starter rule table.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./hydocpusher.toml")]
        output: PathBuf,
    },

    /// Validate the configuration and the classification rule table.
    Validate,

    /// Transform captured publish messages and print the submissions.
    Transform {
        /// JSON message files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print single-line JSON.
        #[arg(long)]
        compact: bool,

        /// Print the per-source attachment report for each message.
        #[arg(long)]
        report: bool,
    },

    /// Manage channel classification rules.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand, Debug)]
enum RulesAction {
    /// List all rules.
    List,
    /// Show the classification a channel resolves to.
    Lookup {
        /// Channel id.
        channel_id: String,
    },
    /// Add or replace a rule and save the rule file.
    Add {
        channel_id: String,
        /// Classification name (classfyname).
        name: String,
        /// Classification code (classfy).
        code: String,
    },
    /// Remove a rule and save the rule file.
    Remove { channel_id: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so submission JSON on stdout stays clean.
fn init_tracing(cli: &Cli) {
    let filter = cli.log_level.clone().unwrap_or_else(|| {
        AppConfig::load_from_file(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "warn".to_string())
    });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Transform {
            files,
            compact,
            report,
        } => {
            let config = load_config(&cli.config)?;
            let resolver = open_rules(&cli.config, &config)?;
            cmd_transform(&config, resolver, &files, compact, report)
        }
        Commands::Rules { action } => {
            let config = load_config(&cli.config)?;
            let resolver = open_rules(&cli.config, &config)?;
            cmd_rules(&resolver, action)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))
}

/// A relative rule file path is taken relative to the config file.
fn rules_path(config_path: &Path, config: &AppConfig) -> PathBuf {
    let rules = &config.classification.rules_file;
    if rules.is_absolute() {
        return rules.clone();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(rules),
        _ => rules.clone(),
    }
}

fn open_rules(config_path: &Path, config: &AppConfig) -> Result<Arc<ClassificationResolver>> {
    let path = rules_path(config_path, config);
    debug!(path = %path.display(), "opening classification rules");
    let resolver = ClassificationResolver::new(&path)
        .with_context(|| format!("failed to load classification rules {}", path.display()))?;
    Ok(Arc::new(resolver))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# HyDocPusher configuration

[archive]
app_id = "NEWS"
app_token = "TmV3cytJbnRlcmZhY2U="
# Overrides app_token when the variable is set.
app_token_env = "HYDOCPUSHER_APP_TOKEN"
company_name = "云南省能源投资集团有限公司"
archive_type = "17"

[site]
name = "集团门户"
domain = "www.cnyeig.com"

[classification]
# Relative paths are resolved against this file's directory.
rules_file = "config/classification-rules.toml"

[transform]
max_attachments = 10

[logging]
level = "info"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;
    println!("Default configuration written to {}", output.display());

    let config = AppConfig::default();
    let rules = rules_path(output, &config);
    if rules.exists() {
        println!("Keeping existing rule file {}", rules.display());
    } else {
        let starter = RuleTable {
            rules: BTreeMap::new(),
            default_rule: ClassificationRule {
                channel_id: "default".into(),
                classfyname: "其他".into(),
                classfy: "QT".into(),
            },
            modified: None,
        };
        RulesFile::save(&rules, &starter).context("failed to write rule file")?;
        println!("Starter rule file written to {}", rules.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Add channel rules: hydocpusher rules add <channel_id> <name> <code>");
    println!("  2. Optionally export HYDOCPUSHER_APP_TOKEN");
    println!(
        "  3. Validate with: hydocpusher validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    let resolver = open_rules(config_path, &config)?;
    if let Err(e) = resolver.validate() {
        println!("  [FAIL] Rule table error: {}", e);
        anyhow::bail!("classification rule validation failed");
    }
    println!("  [OK] Classification rules are valid");

    let stats = resolver.statistics();
    let default = resolver.default_rule();
    println!();
    println!("Configuration summary:");
    println!("  App id        : {}", config.archive.app_id);
    println!("  Company       : {}", config.archive.company_name);
    println!("  Archive type  : {}", config.archive.archive_type);
    println!(
        "  Token source  : {}",
        match &config.archive.app_token_env {
            Some(name) if std::env::var(name).is_ok_and(|v| !v.is_empty()) => format!("${name}"),
            _ => "config file".to_string(),
        }
    );
    println!("  Site          : {} ({})", config.site.name, config.site.domain);
    println!("  Max attachments: {}", config.transform.max_attachments);
    println!(
        "  Rules         : {} rules, {} codes, default {} ({})",
        stats.total_rules, stats.unique_codes, default.classfyname, default.classfy
    );
    println!();
    println!("Configuration is valid.");
    Ok(())
}

fn cmd_transform(
    config: &AppConfig,
    resolver: Arc<ClassificationResolver>,
    files: &[PathBuf],
    compact: bool,
    report: bool,
) -> Result<()> {
    let coordinator = TransformCoordinator::new(config, resolver);
    let attachments = AttachmentResolver::new(&config.site.domain);

    for file in files {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;

        match coordinator.transform_json(&raw) {
            Ok(submission) => {
                let json = if compact {
                    submission.to_json()
                } else {
                    submission.to_json_pretty()
                }
                .context("failed to encode submission")?;
                println!("{}", json);

                if report {
                    eprintln!("{}:", file.display());
                    for (category, count) in
                        AttachmentResolver::summary(&submission.archive_data.attachment)
                    {
                        eprintln!("  {:<6} {}", category.label(), count);
                    }
                    if let Ok(resolution) =
                        SourceMessage::from_json(&raw).map(|msg| attachments.resolve(&msg))
                    {
                        match resolution {
                            Ok(resolution) => {
                                eprintln!("{}", source_table(&resolution.report));
                                eprintln!("  duplicates dropped: {}", resolution.duplicates);
                            }
                            Err(e) => eprintln!("  attachment resolution: {}", e),
                        }
                    }
                }
            }
            Err(e) => {
                let disposition = if e.is_retryable() {
                    "retryable"
                } else {
                    "dead-letter"
                };
                eprintln!(
                    "  [FAIL] {}: {} error ({}): {:#}",
                    file.display(),
                    e.kind(),
                    disposition,
                    anyhow::Error::new(e)
                );
            }
        }
    }

    let stats = coordinator.stats();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Attempted", "Succeeded", "Validation", "Transformation", "Last run"]);
    table.add_row(vec![
        Cell::new(stats.attempted),
        Cell::new(stats.succeeded),
        Cell::new(stats.validation_failures),
        Cell::new(stats.transformation_failures),
        Cell::new(
            stats
                .last_run_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]);
    eprintln!("{table}");

    if stats.failed > 0 {
        anyhow::bail!("{} of {} messages failed", stats.failed, stats.attempted);
    }
    Ok(())
}

fn source_table(report: &[SourceReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Source", "Found", "Skipped", "Error"]);
    for entry in report {
        let (found, error) = match &entry.outcome {
            Ok(n) => (n.to_string(), String::new()),
            Err(e) => ("-".to_string(), e.to_string()),
        };
        table.add_row(vec![
            Cell::new(entry.kind),
            Cell::new(found),
            Cell::new(entry.skipped),
            Cell::new(error),
        ]);
    }
    table
}

fn cmd_rules(resolver: &ClassificationResolver, action: RulesAction) -> Result<()> {
    match action {
        RulesAction::List => {
            let rules = resolver.rules();
            let default = resolver.default_rule();

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Channel", "Name", "Code"]);
            for rule in &rules {
                table.add_row(vec![&rule.channel_id, &rule.classfyname, &rule.classfy]);
            }
            println!("{table}");
            println!(
                "{} rule(s); default: {} ({})",
                rules.len(),
                default.classfyname,
                default.classfy
            );
            Ok(())
        }

        RulesAction::Lookup { channel_id } => {
            let classification = resolver.resolve(&channel_id);
            let source = if resolver.channel_ids().contains(&channel_id.trim().to_string()) {
                "rule"
            } else {
                "default"
            };
            println!(
                "{} -> {} ({}) [{}]",
                channel_id, classification.name, classification.code, source
            );
            Ok(())
        }

        RulesAction::Add {
            channel_id,
            name,
            code,
        } => {
            if name.trim().is_empty() || code.trim().is_empty() {
                anyhow::bail!("name and code must not be empty");
            }
            resolver.add_rule(&channel_id, name.trim(), code.trim());
            resolver.save().context("failed to save rule file")?;
            println!("Saved rule {} -> {} ({})", channel_id.trim(), name.trim(), code.trim());
            Ok(())
        }

        RulesAction::Remove { channel_id } => {
            if !resolver.remove_rule(&channel_id) {
                anyhow::bail!("no rule for channel '{}'", channel_id);
            }
            resolver.save().context("failed to save rule file")?;
            println!("Removed rule for channel {}", channel_id.trim());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_path_relative_to_config() {
        let config = AppConfig::default();
        assert_eq!(
            rules_path(Path::new("/etc/hydocpusher/hydocpusher.toml"), &config),
            PathBuf::from("/etc/hydocpusher/config/classification-rules.toml")
        );
        assert_eq!(
            rules_path(Path::new("hydocpusher.toml"), &config),
            PathBuf::from("config/classification-rules.toml")
        );
    }

    #[test]
    fn test_default_config_parses_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydocpusher.toml");
        std::fs::write(&path, DEFAULT_CONFIG).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.archive.archive_type, "17");
        assert_eq!(config.transform.max_attachments, 10);
    }

    #[test]
    fn test_init_writes_config_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("hydocpusher.toml");
        cmd_init(&output).unwrap();
        assert!(cmd_init(&output).is_err());

        let config = load_config(&output).unwrap();
        let resolver = open_rules(&output, &config).unwrap();
        resolver.validate().unwrap();
        assert_eq!(resolver.resolve("2240").code, "QT");
    }

    #[test]
    fn test_rules_add_and_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("hydocpusher.toml");
        cmd_init(&output).unwrap();
        let config = load_config(&output).unwrap();

        let resolver = open_rules(&output, &config).unwrap();
        cmd_rules(
            &resolver,
            RulesAction::Add {
                channel_id: "2240".into(),
                name: "新闻头条".into(),
                code: "XWTT".into(),
            },
        )
        .unwrap();
        let reopened = open_rules(&output, &config).unwrap();
        assert_eq!(reopened.resolve("2240").code, "XWTT");

        cmd_rules(&reopened, RulesAction::Remove { channel_id: "2240".into() }).unwrap();
        assert!(cmd_rules(&reopened, RulesAction::Remove { channel_id: "2240".into() }).is_err());
        assert_eq!(open_rules(&output, &config).unwrap().resolve("2240").code, "QT");
    }
}
