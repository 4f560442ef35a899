//! MLOXMaker - command line front end.
//!
//! Every command loads the persisted rule set from the data directory, runs
//! against it, and saves it again if it changed.
//!
//! # Execution Flow
//!
//! 1. Load `settings.yaml` (plus `MLOXMAKER_*` overrides) from the data directory
//! 2. Initialize logging (stderr and/or daily rotated files)
//! 3. Load the rule set; every stored rule is re-validated
//! 4. Run the command
//! 5. Save if the rule set changed, then log a metrics summary

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use mloxmaker::diagnostics::{Diagnostic, ErrorLevel, RuleError};
use mloxmaker::models::{ConflictSeverity, ModRef, ModSource, RuleDraft, RuleId, RuleKind};
use mloxmaker::services::{
    ConflictResolver, DataDirCatalog, HintRequest, Hints, MloxWriter, Suggestion, YamlRuleStore, import_mlox,
    load_rule_set, resolve_mod, save_rule_set, to_interchange,
};
use mloxmaker::{APP_NAME, ConfigManager, RuleSet, Settings, VERSION};
use std::fs;

#[derive(Parser)]
#[command(name = "mloxmaker", version, about = "Author, validate and export mlox load-order rules")]
struct Cli {
    /// Directory holding settings.yaml and the rule set
    #[arg(long, global = true, default_value = "MLOXMaker Data")]
    config_dir: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate stored rules
    Validate,
    /// List known mods
    ListMods,
    /// Add a mod, or update its hash and source
    AddMod {
        name: String,
        #[arg(long)]
        hash: Option<String>,
        #[arg(long)]
        remote: bool,
    },
    /// Remove a mod that no rule references
    RemoveMod { name: String },
    /// Add a rule between two mods (one for single-mod conflicts)
    AddRule {
        /// order, conflict or requires
        kind: RuleKind,
        subject: String,
        target: Option<String>,
        #[arg(long)]
        severity: Option<ConflictSeverity>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        reference: Option<String>,
        /// Group the rule under this `@Section` in mlox exports
        #[arg(long)]
        section: Option<String>,
        /// Create unknown mods instead of rejecting the rule
        #[arg(long)]
        create_mods: bool,
    },
    /// Remove a rule by id
    RemoveRule { id: u32 },
    /// Print the load order implied by Requires rules
    Order,
    /// Suggest remediations for a Conflict rule
    Hints { id: u32 },
    /// Import rules from an mlox file
    Import { file: Utf8PathBuf },
    /// Export the rule set
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Mlox)]
        format: ExportFormat,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<Utf8PathBuf>,
    },
    /// Register every plugin found in the data directory
    Scan {
        /// Overrides data_dir from settings
        #[arg(long)]
        data_dir: Option<Utf8PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Mlox,
    Interchange,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let settings = config_manager.load_settings()?;
    let _log_guard =
        mloxmaker::logging::setup_logging(&settings.logging, &config_manager.log_dir(&settings))?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let store = YamlRuleStore::new(config_manager.ruleset_path(&settings));
    let mut rule_set = load_rule_set(&store)?;
    let before = rule_set.clone();

    let result = run(cli.command, &settings, &mut rule_set);

    if result.is_ok() && rule_set != before {
        save_rule_set(&store, &rule_set)?;
    }
    rule_set.metrics().log_summary();
    result
}

fn run(command: Command, settings: &Settings, rule_set: &mut RuleSet) -> Result<()> {
    match command {
        Command::Validate => validate(rule_set),
        Command::ListMods => {
            list_mods(rule_set);
            Ok(())
        }
        Command::AddMod { name, hash, remote } => {
            let source = if remote { ModSource::Remote } else { ModSource::Local };
            let id = rule_set
                .upsert_mod(&name, hash.as_deref(), source)
                .map_err(report_rejection)?;
            println!("{} {}", id, rule_set.mod_name(id));
            Ok(())
        }
        Command::RemoveMod { name } => {
            let Some(id) = rule_set.find_mod(&name).map(|m| m.id) else {
                bail!("Mod not found: {}", name);
            };
            rule_set.remove_mod(id).map_err(report_rejection)?;
            println!("Removed {}", name);
            Ok(())
        }
        Command::AddRule {
            kind,
            subject,
            target,
            severity,
            notes,
            reference,
            section,
            create_mods,
        } => {
            let mut draft = RuleDraft::new(kind, subject, target.map(ModRef::from));
            if let Some(severity) = severity {
                draft = draft.with_severity(severity);
            }
            if let Some(notes) = notes {
                draft = draft.with_notes(notes);
            }
            if let Some(reference) = reference {
                draft = draft.with_reference(reference);
            }
            if let Some(section) = section {
                draft = draft.with_section(section);
            }
            add_rule(rule_set, draft, create_mods)
        }
        Command::RemoveRule { id } => match rule_set.remove_rule(RuleId(id)) {
            Some(rule) => {
                println!("Removed {} ({})", rule.id, rule.kind);
                Ok(())
            }
            None => bail!("Rule not found: {}", RuleId(id)),
        },
        Command::Order => {
            let order = rule_set.topological_order()?;
            for (position, id) in order.iter().enumerate() {
                println!("{:>4}. {}", position + 1, rule_set.mod_name(*id));
            }
            Ok(())
        }
        Command::Hints { id } => {
            let hints = ConflictResolver::new().suggest(rule_set, HintRequest::AcceptedConflict(RuleId(id)))?;
            print_hints(rule_set, &hints);
            Ok(())
        }
        Command::Import { file } => {
            let text = fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file))?;
            let report = import_mlox(rule_set, &text);
            println!("{} rules imported.", report.accepted.len());
            for rejected in &report.rejected {
                print_diagnostic(&rejected.error.diagnostic(), Some(rejected.line));
            }
            Ok(())
        }
        Command::Export { format, output } => {
            let text = match format {
                ExportFormat::Mlox => MloxWriter::new()
                    .with_comments(settings.export_comments)
                    .write(rule_set),
                ExportFormat::Interchange => to_interchange(rule_set)?,
            };
            match output {
                Some(path) => {
                    fs::write(&path, text).with_context(|| format!("Failed to write {}", path))?;
                    println!("Exported {} rules to {}", rule_set.rule_count(), path);
                }
                None => print!("{}", text),
            }
            Ok(())
        }
        Command::Scan { data_dir } => {
            let Some(data_dir) = data_dir.or_else(|| settings.data_dir.clone()) else {
                bail!("No data directory given and none configured in settings");
            };
            scan(rule_set, data_dir)
        }
    }
}

fn validate(rule_set: &RuleSet) -> Result<()> {
    if rule_set.rule_count() == 0 {
        println!("No rules found.");
    } else {
        println!("{} rules loaded.", rule_set.rule_count());
        for rule in rule_set.rules() {
            let target = rule.target.map(|t| rule_set.mod_name(t)).unwrap_or("N/A");
            println!("{} {}: {} -> {}", rule.id, rule.kind, rule_set.mod_name(rule.subject), target);
        }
    }

    let diagnostics = rule_set.audit();
    for diagnostic in &diagnostics {
        print_diagnostic(diagnostic, None);
    }

    let critical = diagnostics
        .iter()
        .filter(|d| d.level == ErrorLevel::Critical)
        .count();
    if critical > 0 {
        bail!("{} critical issue(s) found", critical);
    }
    Ok(())
}

fn list_mods(rule_set: &RuleSet) {
    if rule_set.mod_count() == 0 {
        println!("No mods found.");
        return;
    }

    println!("{} mods installed.", rule_set.mod_count());
    for module in rule_set.mods() {
        match &module.hash {
            Some(hash) => println!("{} (Source: {}, hash {})", module.name, module.source, hash),
            None => println!("{} (Source: {})", module.name, module.source),
        }
    }
}

fn add_rule(rule_set: &mut RuleSet, draft: RuleDraft, create_mods: bool) -> Result<()> {
    if create_mods {
        for reference in std::iter::once(&draft.subject).chain(draft.target.as_ref()) {
            if let ModRef::Name(name) = reference {
                if rule_set.find_mod(name).is_none() && !reference.is_blank() {
                    rule_set
                        .upsert_mod(name, None, ModSource::Local)
                        .map_err(report_rejection)?;
                }
            }
        }
    }

    match rule_set.add_rule(draft) {
        Ok(id) => {
            println!("Added {}", id);
            let is_conflict = rule_set.get_rule(id).is_some_and(|r| r.kind == RuleKind::Conflict);
            if is_conflict {
                let hints = ConflictResolver::new().suggest(rule_set, HintRequest::AcceptedConflict(id))?;
                print_hints(rule_set, &hints);
            }
            Ok(())
        }
        Err(err) => {
            if matches!(err, RuleError::CircularDependency(_)) {
                let hints = ConflictResolver::new().suggest(rule_set, HintRequest::RejectedCycle(&err))?;
                print_diagnostic(&err.diagnostic(), None);
                print_hints(rule_set, &hints);
                return Err(err.into());
            }
            Err(report_rejection(err))
        }
    }
}

fn scan(rule_set: &mut RuleSet, data_dir: Utf8PathBuf) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let catalog = DataDirCatalog::new(&data_dir);

    runtime.block_on(async {
        let plugins = catalog.list_plugins().await?;
        let mut registered = 0;
        for plugin in &plugins {
            if resolve_mod(&catalog, rule_set, plugin).await?.is_some() {
                registered += 1;
            }
        }
        println!("{} plugins registered from {}", registered, data_dir);
        Ok::<(), anyhow::Error>(())
    })
}

fn report_rejection(err: RuleError) -> anyhow::Error {
    print_diagnostic(&err.diagnostic(), None);
    err.into()
}

fn print_diagnostic(diagnostic: &Diagnostic, line: Option<usize>) {
    let location = line.map(|l| format!("line {}: ", l)).unwrap_or_default();
    eprintln!("[{}] {}{}", diagnostic.level, location, diagnostic.message);
    if !diagnostic.offending_entities.is_empty() {
        eprintln!("    involves: {}", diagnostic.offending_entities.join(", "));
    }
}

fn print_hints(rule_set: &RuleSet, hints: &Hints) {
    if !hints.cycle_path.is_empty() {
        let names: Vec<&str> = hints.cycle_path.iter().map(|id| rule_set.mod_name(*id)).collect();
        println!("Cycle: {}", names.join(" -> "));
    }
    for suggestion in &hints.suggestions {
        let text = match suggestion {
            Suggestion::AddOrder { first, then } => {
                format!("add [Order] {} before {}", rule_set.mod_name(*first), rule_set.mod_name(*then))
            }
            Suggestion::ExcludeMod { module } => format!("stop using {}", rule_set.mod_name(*module)),
            Suggestion::RemoveRule { rule } => format!("remove {}", rule),
            Suggestion::ReplaceWithOrder { rule, first, then } => format!(
                "replace {} with [Order] {} before {}",
                rule,
                rule_set.mod_name(*first),
                rule_set.mod_name(*then)
            ),
        };
        println!("  hint: {}", text);
    }
}
