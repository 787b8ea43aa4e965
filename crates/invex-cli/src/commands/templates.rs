//! Templates command - list templates and test detection.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand};
use console::style;

use invex_core::{TemplateDetector, TemplateLibrary};

/// Arguments for the templates command.
#[derive(Args)]
pub struct TemplatesArgs {
    /// Template directory (overrides the config file)
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: TemplatesCommand,
}

#[derive(Subcommand)]
enum TemplatesCommand {
    /// List loaded templates
    List,

    /// Score a text file against every template
    Detect {
        /// OCR text of the invoice
        input: PathBuf,
    },
}

pub fn run(args: TemplatesArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let Some(dir) = args.templates.or(config.template.template_dir.clone()) else {
        anyhow::bail!("No template directory configured. Pass --templates DIR.");
    };

    let library = Arc::new(TemplateLibrary::load_dir(&dir)?);

    match args.command {
        TemplatesCommand::List => list_templates(&library),
        TemplatesCommand::Detect { input } => {
            let detector = TemplateDetector::with_config(library, &config.template);
            detect_template(&detector, &input)
        }
    }
}

fn list_templates(library: &TemplateLibrary) -> anyhow::Result<()> {
    if library.is_empty() {
        println!("{} No templates found.", style("ℹ").blue());
        return Ok(());
    }

    println!("{}", style("Templates:").bold());
    for template in library.iter() {
        println!(
            "  {} {} ({} detection patterns, {} fields{})",
            style(&template.id).cyan(),
            template.name,
            template.detection.len(),
            template.fields.len(),
            if template.item.is_some() { ", item pattern" } else { "" }
        );
    }

    Ok(())
}

fn detect_template(detector: &TemplateDetector, input: &Path) -> anyhow::Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    let text = fs::read_to_string(input)?;

    for (id, score) in detector.score_all(&text) {
        println!("  {:<24} {:.2}", id, score);
    }
    println!();

    match detector.detect(&text) {
        Some(found) => println!(
            "{} Matched {} ({:.2})",
            style("✓").green(),
            found.template_id,
            found.confidence
        ),
        None => println!("{} No template matched", style("✗").red()),
    }

    Ok(())
}
