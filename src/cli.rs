//! Command-line interface definitions and handlers.
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::backend::JsonBackend;
use crate::catalog::{ExperienceFilter, SearchQuerySpec, SearchResponse};
use crate::config::Config;
use crate::engine::CatalogEngine;
use crate::error::{EngineError, Result};
use crate::refresh::{CancelToken, LoadProgress};
use crate::search::HashEmbedder;
use crate::storage::CacheStore;

/// classrank - course catalog cache and hybrid search engine
#[derive(Parser, Debug)]
#[command(name = "classrank")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable JSON output for machine consumption
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/classrank/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Catalog JSON file served by the file backend
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load or refresh a tenant's catalog snapshot
    Refresh(RefreshArgs),

    /// Search the cached catalog
    Search(SearchArgs),

    /// Show a tenant's cache status
    Status(StatusArgs),

    /// Drop a tenant's cached snapshot
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Tenant schema name (e.g. "uw")
    pub tenant: String,

    /// Schedule the refresh in the background instead of blocking
    #[arg(long)]
    pub background: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Tenant schema name
    pub tenant: String,

    /// Free-text query; authoritative when at least two characters long
    pub query: Option<String>,

    /// Semantic topic (repeatable)
    #[arg(long = "topic", value_name = "TOPIC")]
    pub topics: Vec<String>,

    /// Only easy courses (difficulty <= 3/5)
    #[arg(long)]
    pub easy: bool,

    /// Only light-workload courses (workload <= 3/5)
    #[arg(long)]
    pub light_workload: bool,

    /// Only fun courses (fun >= 3/5)
    #[arg(long)]
    pub fun: bool,

    /// Only high-GPA courses (GPA >= 3.0/4.0)
    #[arg(long)]
    pub high_gpa: bool,

    /// Tenant attribute filter as key=value (repeatable)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Sort strictly by GPA descending (clears experience filters)
    #[arg(long)]
    pub gpa_sort: bool,

    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Page size (0 uses the configured default)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub tenant: String,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    pub tenant: String,
}

impl SearchArgs {
    fn to_spec(&self) -> Result<SearchQuerySpec> {
        let mut spec = SearchQuerySpec {
            query: self.query.clone().unwrap_or_default(),
            topics: self.topics.clone(),
            gpa_sort: self.gpa_sort,
            page: self.page,
            limit: self.limit,
            ..Default::default()
        };

        if self.easy {
            spec.experience_filters.push(ExperienceFilter::Easy);
        }
        if self.light_workload {
            spec.experience_filters.push(ExperienceFilter::LightWorkload);
        }
        if self.fun {
            spec.experience_filters.push(ExperienceFilter::Fun);
        }
        if self.high_gpa {
            spec.experience_filters.push(ExperienceFilter::HighGpa);
        }

        for raw in &self.filters {
            let (key, value) = raw.split_once('=').ok_or_else(|| {
                EngineError::Config(format!("invalid filter {raw} (expected KEY=VALUE)"))
            })?;
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            spec.filters.insert(key.to_string(), value);
        }

        Ok(spec)
    }
}

struct App {
    engine: CatalogEngine<JsonBackend, HashEmbedder>,
    backend: Arc<JsonBackend>,
    json: bool,
    quiet: bool,
}

impl App {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(db) = &cli.db {
            config.cache.db_path = Some(db.clone());
        }
        if let Some(catalog) = &cli.catalog {
            config.backend.catalog_path = Some(catalog.clone());
        }

        let catalog_path = config.backend.catalog_path.clone().ok_or_else(|| {
            EngineError::Config("no catalog file configured (use --catalog or config)".to_string())
        })?;

        let store = Arc::new(CacheStore::open_or_ephemeral(
            config.cache.resolved_db_path(),
        )?);
        let backend = Arc::new(JsonBackend::new(catalog_path));
        let embedder = HashEmbedder::new(config.search.embedding_dims);
        let engine = CatalogEngine::new(store, Arc::clone(&backend), embedder, &config);

        Ok(Self {
            engine,
            backend,
            json: cli.json,
            quiet: cli.quiet,
        })
    }

    async fn ensure_loaded(&self, tenant: &str, background: bool) -> Result<usize> {
        let quiet = self.quiet || self.json;
        let progress = move |event: LoadProgress| {
            if quiet {
                return;
            }
            match event {
                LoadProgress::FetchStarted => eprintln!("{}", "fetching catalog...".dimmed()),
                LoadProgress::FetchCompleted { count } => {
                    eprintln!("{}", format!("fetched {count} courses").dimmed());
                }
                LoadProgress::IndexBuilt => eprintln!("{}", "index built".dimmed()),
            }
        };

        let records = self
            .engine
            .get_or_load(tenant, Some(&progress), &CancelToken::new(), background)
            .await?;

        if let Ok(filters) = self.backend.filter_specs(tenant).await {
            self.engine.set_tenant_filters(tenant, filters);
        }

        Ok(records.len())
    }
}

pub async fn run(cli: &Cli) -> Result<()> {
    let app = App::from_cli(cli)?;

    match &cli.command {
        Commands::Refresh(args) => {
            let had_cache = app.engine.has_cached_data(&args.tenant);
            let count = app.ensure_loaded(&args.tenant, args.background).await?;

            if args.background && had_cache {
                app.engine.refresh_in_background(&args.tenant);
            }

            if app.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "tenant": args.tenant,
                        "courses": count,
                        "background": args.background && had_cache,
                    })
                );
            } else if !app.quiet {
                if args.background && had_cache {
                    println!("{} refresh scheduled for {}", "ok:".green().bold(), args.tenant);
                } else {
                    println!(
                        "{} {} courses cached for {}",
                        "ok:".green().bold(),
                        count,
                        args.tenant
                    );
                }
            }
        }
        Commands::Search(args) => {
            app.ensure_loaded(&args.tenant, true).await?;
            let spec = args.to_spec()?;
            let response = app.engine.search(&args.tenant, &spec).await?;

            if app.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_results(&response);
            }

            if let Some(failure) = app.engine.take_background_error() {
                tracing::warn!(tenant = failure.tenant, error = %failure.error, "background refresh failed; cached data still served");
            }
        }
        Commands::Status(args) => {
            let status = app.engine.status(&args.tenant);
            if app.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                let cached = if status.cached {
                    "cached".green().to_string()
                } else {
                    "not cached".yellow().to_string()
                };
                println!("{}: {cached}", status.tenant.bold());
                println!("  phase: {}", status.phase);
                println!("  courses: {}", status.total_classes);
                if let Some(updated) = status.last_updated {
                    println!("  last updated: {}", updated.to_rfc3339());
                }
            }
        }
        Commands::Clear(args) => {
            app.engine.clear(&args.tenant)?;
            if app.json {
                println!("{}", serde_json::json!({"tenant": args.tenant, "cleared": true}));
            } else if !app.quiet {
                println!("{} cache cleared for {}", "ok:".green().bold(), args.tenant);
            }
        }
    }

    Ok(())
}

fn print_results(response: &SearchResponse) {
    if response.items.is_empty() {
        println!("{}", "no matching courses".yellow());
        return;
    }

    for (i, item) in response.items.iter().enumerate() {
        let rank = i + 1;
        let gpa = item
            .course
            .gpa
            .map_or_else(|| "-".to_string(), |g| format!("{g:.2}"));
        println!(
            "{:>3}. {} {} {}",
            rank,
            item.course.class_code.bold(),
            item.course.course_name,
            format!("(score {:.3}, gpa {gpa})", item.score).dimmed()
        );
    }
    println!(
        "{}",
        format!(
            "page {}/{} ({} total)",
            response.page, response.total_pages, response.total
        )
        .dimmed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_args_to_spec() {
        let args = SearchArgs {
            tenant: "uw".to_string(),
            query: Some("intro".to_string()),
            topics: vec!["machine learning".to_string()],
            easy: true,
            light_workload: false,
            fun: false,
            high_gpa: true,
            filters: vec!["level=Elementary".to_string(), "credits=3".to_string()],
            gpa_sort: false,
            page: 2,
            limit: 10,
        };
        let spec = args.to_spec().unwrap();
        assert_eq!(spec.query, "intro");
        assert_eq!(
            spec.experience_filters,
            vec![ExperienceFilter::Easy, ExperienceFilter::HighGpa]
        );
        assert_eq!(spec.filters["level"], serde_json::json!("Elementary"));
        assert_eq!(spec.filters["credits"], serde_json::json!(3));
        assert_eq!(spec.page, 2);
    }

    #[test]
    fn test_malformed_filter_rejected() {
        let args = SearchArgs {
            tenant: "uw".to_string(),
            query: None,
            topics: vec![],
            easy: false,
            light_workload: false,
            fun: false,
            high_gpa: false,
            filters: vec!["nonsense".to_string()],
            gpa_sort: false,
            page: 1,
            limit: 0,
        };
        assert!(args.to_spec().is_err());
    }

    #[test]
    fn test_cli_parses_search_command() {
        let cli = Cli::parse_from([
            "classrank", "search", "uw", "intro", "--topic", "ai", "--easy", "--page", "3",
        ]);
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.tenant, "uw");
                assert_eq!(args.query.as_deref(), Some("intro"));
                assert_eq!(args.topics, vec!["ai"]);
                assert!(args.easy);
                assert_eq!(args.page, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
