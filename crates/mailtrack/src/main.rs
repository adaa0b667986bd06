//! `mailtrack` - ingest one email into an issue tracker.
//!
//! Reads a raw message from a file (or stdin with `-`), runs it against a
//! tracker snapshot loaded from JSON and prints the outcome as JSON.
//!
//! Usage:
//!   mailtrack message.eml --fixtures tracker.json --project ecookbook --unknown-user create

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use mailtrack_core::{
    Collaborators, Field, InMemoryTracker, IngestConfig, IngestOptions, MailHandler,
    UnknownUserPolicy,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Ingest an email into an issue tracker")]
struct Args {
    /// Raw message file, or `-` for stdin
    #[arg(value_name = "MESSAGE")]
    message: String,

    /// Ingestion configuration (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tracker snapshot to ingest against (JSON)
    #[arg(short, long, value_name = "FILE")]
    fixtures: PathBuf,

    /// Write the snapshot after ingestion to this file
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Force the destination project
    #[arg(long)]
    project: Option<String>,

    /// Force the tracker of new items
    #[arg(long)]
    tracker: Option<String>,

    /// Force any other attribute, e.g. `priority=Urgent`
    #[arg(long = "fixed", value_name = "FIELD=VALUE")]
    fixed: Vec<String>,

    /// Fields senders may set: `*` or a comma-separated list
    #[arg(long, value_name = "FIELDS", default_value = "")]
    allow_override: String,

    /// Unknown senders: ignore, accept or create
    #[arg(long, value_name = "POLICY", default_value = "ignore")]
    unknown_user: String,

    /// Skip permission checks
    #[arg(long)]
    no_permission_check: bool,
}

impl Args {
    fn options(&self) -> Result<IngestOptions> {
        let mut options = IngestOptions {
            allowed_overrides: self
                .allow_override
                .parse()
                .context("parsing --allow-override")?,
            unknown_user: UnknownUserPolicy::parse(&self.unknown_user)
                .ok_or_else(|| anyhow!("unknown --unknown-user policy: {}", self.unknown_user))?,
            no_permission_check: self.no_permission_check,
            ..IngestOptions::default()
        };

        for pair in &self.fixed {
            let (field, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected FIELD=VALUE, got {pair}"))?;
            let field: Field = field.parse().with_context(|| format!("parsing --fixed {pair}"))?;
            options.fixed_attributes.insert(field, value.trim().to_string());
        }
        if let Some(project) = &self.project {
            options.fixed_attributes.insert(Field::Project, project.clone());
        }
        if let Some(tracker) = &self.tracker {
            options.fixed_attributes.insert(Field::Tracker, tracker.clone());
        }
        Ok(options)
    }
}

fn read_message(source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut raw = Vec::new();
        std::io::stdin()
            .read_to_end(&mut raw)
            .context("reading message from stdin")?;
        Ok(raw)
    } else {
        std::fs::read(Path::new(source)).with_context(|| format!("reading message {source}"))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailtrack=info,mailtrack_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => IngestConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => IngestConfig::default(),
    };
    let tracker = InMemoryTracker::load(&args.fixtures)
        .with_context(|| format!("loading fixtures {}", args.fixtures.display()))?;
    let options = args.options()?;
    let raw = read_message(&args.message)?;

    let handler = MailHandler::new(config, Collaborators::single(&tracker))
        .context("building mail handler")?;
    info!(bytes = raw.len(), "Ingesting message");
    let outcome = handler.ingest(&raw, &options).context("ingesting message")?;

    let json = serde_json::to_string_pretty(&outcome).context("formatting outcome as JSON")?;
    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }

    if let Some(path) = &args.save {
        let snapshot = serde_json::to_string_pretty(&tracker.snapshot())
            .context("formatting snapshot as JSON")?;
        std::fs::write(path, snapshot)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mailtrack_core::OverridePolicy;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["mailtrack", "message.eml", "--fixtures", "tracker.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = args(&[]).options().unwrap();
        assert_eq!(options, IngestOptions::default());
    }

    #[test]
    fn test_forced_attributes() {
        let options = args(&[
            "--project",
            "ecookbook",
            "--tracker",
            "Bug",
            "--fixed",
            "priority=Urgent",
            "--allow-override",
            "*",
            "--unknown-user",
            "create",
            "--no-permission-check",
        ])
        .options()
        .unwrap();

        assert_eq!(
            options.fixed_attributes.get(&Field::Project).map(String::as_str),
            Some("ecookbook")
        );
        assert_eq!(
            options.fixed_attributes.get(&Field::Tracker).map(String::as_str),
            Some("Bug")
        );
        assert_eq!(
            options.fixed_attributes.get(&Field::Priority).map(String::as_str),
            Some("Urgent")
        );
        assert_eq!(options.allowed_overrides, OverridePolicy::All);
        assert_eq!(options.unknown_user, UnknownUserPolicy::Create);
        assert!(options.no_permission_check);
    }

    #[test]
    fn test_invalid_options() {
        assert!(args(&["--unknown-user", "maybe"]).options().is_err());
        assert!(args(&["--fixed", "priority"]).options().is_err());
        assert!(args(&["--fixed", "colour=red"]).options().is_err());
        assert!(args(&["--allow-override", "colour"]).options().is_err());
    }
}
