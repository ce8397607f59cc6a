//! Threshold policy commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use visreg_common::PageType;
use visreg_engine::{QueryWindow, Recommendation};

use super::{parse_page, Context};
use crate::output::{print_item, print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ThresholdCommands {
    /// Show the threshold for one page type, or all of them
    Get {
        #[arg(value_parser = parse_page)]
        page: Option<PageType>,
    },

    /// Set a page threshold and save it to the config file
    Set {
        #[arg(value_parser = parse_page)]
        page: PageType,

        /// Minimum composite score, in [0, 100]
        value: f64,
    },

    /// Suggest thresholds from recent history
    Recommend {
        #[arg(value_parser = parse_page)]
        page: Option<PageType>,

        /// How many days of history to use
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Serialize)]
pub struct ThresholdDisplay {
    pub page: PageType,
    pub threshold: f64,
}

impl TableDisplay for ThresholdDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Page", "Threshold"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.page.to_string(), format!("{:.2}%", self.threshold)]
    }
}

impl TableDisplay for Recommendation {
    fn headers() -> Vec<&'static str> {
        vec!["Page", "Current", "Recommended", "Percentile", "Samples", "Bounded"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.page.to_string(),
            format!("{:.2}%", self.current),
            format!("{:.2}%", self.recommended),
            format!("{:.2}%", self.percentile),
            self.sample_size.to_string(),
            if self.bounded { "yes" } else { "no" }.to_string(),
        ]
    }
}

fn pages(page: Option<PageType>) -> Vec<PageType> {
    page.map(|p| vec![p]).unwrap_or_else(|| PageType::ALL.to_vec())
}

pub async fn execute(cmd: ThresholdCommands, ctx: &Context) -> Result<bool> {
    let mut policy = ctx.thresholds()?;

    match cmd {
        ThresholdCommands::Get { page: Some(page) } => {
            let row = ThresholdDisplay {
                page,
                threshold: policy.get(page),
            };
            print_item(&row, ctx.format);
        }

        ThresholdCommands::Get { page: None } => {
            let rows: Vec<ThresholdDisplay> = PageType::ALL
                .into_iter()
                .map(|page| ThresholdDisplay {
                    page,
                    threshold: policy.get(page),
                })
                .collect();
            print_list(&rows, ctx.format);
        }

        ThresholdCommands::Set { page, value } => {
            let previous = policy.get(page);
            policy.update(page, value)?;

            let mut config = ctx.config.clone();
            config.thresholds = policy.to_config();
            config.save(&ctx.config_path)?;
            print_success(&format!(
                "Threshold for {} set to {:.2}% (was {:.2}%) in {}",
                page,
                value,
                previous,
                ctx.config_path.display()
            ));
        }

        ThresholdCommands::Recommend { page, days } => {
            let reports = ctx.report_store()?;
            let mut recommendations = Vec::new();
            for page in pages(page) {
                let scores = reports.scores_for_page(page, QueryWindow::last_days(days))?;
                recommendations.push(policy.recommend(page, &scores));
            }
            print_list(&recommendations, ctx.format);
            if ctx.format == OutputFormat::Table && recommendations.iter().all(|r| r.sample_size == 0) {
                print_warning(&format!("No passing results in the last {} days", days));
            }
        }
    }
    Ok(true)
}
