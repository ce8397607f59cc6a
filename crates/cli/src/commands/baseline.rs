//! Baseline corpus commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use visreg_common::{PageType, Viewport};
use visreg_engine::baseline::{EntryChange, EntryComparison, EntryInfo, ModuleOutcome, VersionRecord};

use super::{modules_filter, parse_page, parse_viewport, Context};
use crate::output::{
    format_bytes, print_info, print_json, print_list, print_success, print_warning, OutputFormat,
    TableDisplay,
};

#[derive(Subcommand)]
pub enum BaselineCommands {
    /// Capture fresh baselines into the current corpus
    Generate {
        /// Page types to capture (default: all)
        #[arg(long, value_delimiter = ',', value_parser = parse_page)]
        modules: Vec<PageType>,

        /// Restrict to one viewport
        #[arg(long, value_parser = parse_viewport)]
        viewport: Option<Viewport>,
    },

    /// Freeze the current corpus as a named version
    Backup {
        /// Version name (default: backup_<timestamp>)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Replace the current corpus with a saved version
    Restore {
        /// Version name
        name: String,
    },

    /// List saved versions, oldest first
    List,

    /// Compare two versions ("current" names the live corpus)
    Compare {
        left: String,
        right: String,
    },

    /// Delete all but the most recent versions
    Clean {
        /// Versions to keep
        #[arg(short, long, default_value_t = 5)]
        keep: usize,
    },

    /// Show the current corpus and its versions
    Info,
}

#[derive(Serialize)]
pub struct ModuleDisplay {
    pub page: String,
    pub created: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl From<&ModuleOutcome> for ModuleDisplay {
    fn from(outcome: &ModuleOutcome) -> Self {
        Self {
            page: outcome.page.to_string(),
            created: outcome.created.len(),
            failed: outcome.errors.len(),
            errors: outcome
                .errors
                .iter()
                .map(|(viewport, error)| format!("{}: {}", viewport, error))
                .collect(),
        }
    }
}

impl TableDisplay for ModuleDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Module", "Created", "Failed", "Errors"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.page.clone(),
            self.created.to_string(),
            self.failed.to_string(),
            self.errors.join("\n"),
        ]
    }
}

#[derive(Serialize)]
pub struct VersionDisplay {
    pub name: String,
    pub sequence: u64,
    pub baselines: usize,
    pub created_at: String,
}

impl From<VersionRecord> for VersionDisplay {
    fn from(version: VersionRecord) -> Self {
        Self {
            name: version.name,
            sequence: version.sequence,
            baselines: version.baseline_count,
            created_at: version.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for VersionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Seq", "Baselines", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.sequence.to_string(),
            self.baselines.to_string(),
            self.created_at.clone(),
        ]
    }
}

#[derive(Serialize)]
pub struct ChangeDisplay {
    pub baseline: String,
    pub change: String,
    pub similarity: Option<f64>,
}

impl From<&EntryComparison> for ChangeDisplay {
    fn from(entry: &EntryComparison) -> Self {
        let (change, similarity) = match &entry.change {
            EntryChange::Added => ("added".to_string(), None),
            EntryChange::Removed => ("removed".to_string(), None),
            EntryChange::Identical => ("identical".to_string(), Some(100.0)),
            EntryChange::Changed { scores } => ("changed".to_string(), Some(scores.composite)),
            EntryChange::Unreadable { error } => (format!("unreadable: {}", error), None),
        };
        Self {
            baseline: entry.key.to_string(),
            change,
            similarity,
        }
    }
}

impl TableDisplay for ChangeDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Baseline", "Change", "Similarity"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.baseline.clone(),
            self.change.clone(),
            self.similarity
                .map(|s| format!("{:.2}%", s))
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

#[derive(Serialize)]
pub struct EntryDisplay {
    pub baseline: String,
    pub file: String,
    pub size: u64,
    pub checksum: String,
    pub created_at: String,
}

impl From<&EntryInfo> for EntryDisplay {
    fn from(entry: &EntryInfo) -> Self {
        Self {
            baseline: entry.key.to_string(),
            file: entry.file.clone(),
            size: entry.size_bytes,
            checksum: entry.checksum.chars().take(12).collect(),
            created_at: entry
                .created_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl TableDisplay for EntryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Baseline", "File", "Size", "Checksum", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.baseline.clone(),
            self.file.clone(),
            format_bytes(self.size),
            self.checksum.clone(),
            self.created_at.clone(),
        ]
    }
}

/// Returns false when the command ran but did not fully succeed
pub async fn execute(cmd: BaselineCommands, ctx: &Context) -> Result<bool> {
    let store = ctx.baseline_store().await?;
    let format = ctx.format;

    match cmd {
        BaselineCommands::Generate { modules, viewport } => {
            let capturer = ctx.capturer();
            let report = store
                .generate(&capturer, modules_filter(&modules), viewport)
                .await?;

            if format == OutputFormat::Json {
                print_json(&report);
                return Ok(report.succeeded());
            }

            if let Some(backup) = &report.backup {
                print_info(&format!("Previous corpus saved as '{}'", backup));
            }
            let rows: Vec<ModuleDisplay> = report.modules.iter().map(ModuleDisplay::from).collect();
            print_list(&rows, format);

            if report.succeeded() {
                print_success(&format!("Generated {} baselines", report.created()));
            } else {
                print_warning(&format!(
                    "Generated {} baselines, {} failed",
                    report.created(),
                    report.failed()
                ));
            }
            Ok(report.succeeded())
        }

        BaselineCommands::Backup { name } => {
            let version = store.backup(name.as_deref()).await?;
            if format == OutputFormat::Json {
                print_json(&version);
            } else {
                print_success(&format!(
                    "Created version '{}' ({} baselines)",
                    version.name, version.baseline_count
                ));
            }
            Ok(true)
        }

        BaselineCommands::Restore { name } => {
            let version = store.restore(&name).await?;
            if format == OutputFormat::Json {
                print_json(&version);
            } else {
                print_success(&format!(
                    "Restored version '{}' ({} baselines)",
                    version.name, version.baseline_count
                ));
            }
            Ok(true)
        }

        BaselineCommands::List => {
            let versions: Vec<VersionDisplay> = store
                .list()
                .await?
                .into_iter()
                .map(VersionDisplay::from)
                .collect();
            print_list(&versions, format);
            Ok(true)
        }

        BaselineCommands::Compare { left, right } => {
            let comparison = store.compare(&left, &right).await?;
            if format == OutputFormat::Json {
                print_json(&comparison);
                return Ok(true);
            }

            let rows: Vec<ChangeDisplay> = comparison.entries.iter().map(ChangeDisplay::from).collect();
            print_list(&rows, format);
            print_info(&format!(
                "{} -> {}: {} added, {} removed, {} changed, {} identical",
                comparison.left,
                comparison.right,
                comparison.count(|c| *c == EntryChange::Added),
                comparison.count(|c| *c == EntryChange::Removed),
                comparison.count(|c| matches!(c, EntryChange::Changed { .. })),
                comparison.count(|c| *c == EntryChange::Identical),
            ));
            Ok(true)
        }

        BaselineCommands::Clean { keep } => {
            let removed = store.clean(keep).await?;
            if format == OutputFormat::Json {
                print_json(&removed);
            } else if removed.is_empty() {
                print_info(&format!("Nothing to clean, {} or fewer versions kept", keep));
            } else {
                print_success(&format!(
                    "Removed {} versions: {}",
                    removed.len(),
                    removed.join(", ")
                ));
            }
            Ok(true)
        }

        BaselineCommands::Info => {
            let info = store.info().await?;
            if format == OutputFormat::Json {
                print_json(&info);
                return Ok(true);
            }

            println!("Baseline directory: {}", info.baseline_dir.display());
            if let Some(metadata) = &info.metadata {
                println!("Server URL:         {}", metadata.server_url);
                if let Some(updated) = metadata.updated_at {
                    println!("Last updated:       {}", updated.format("%Y-%m-%d %H:%M:%S"));
                }
            }
            println!();
            let entries: Vec<EntryDisplay> = info.entries.iter().map(EntryDisplay::from).collect();
            print_list(&entries, format);
            println!();
            let versions: Vec<VersionDisplay> =
                info.versions.into_iter().map(VersionDisplay::from).collect();
            print_list(&versions, format);
            Ok(true)
        }
    }
}
