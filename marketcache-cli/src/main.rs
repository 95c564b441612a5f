use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use marketcache::{CacheManager, CacheResult, CacheSettings, LoggingConfig, haversine_km};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "marketcache-cli")]
#[command(about = "marketcache CLI - inspect and invalidate the marketplace cache", long_about = None)]
struct Args {
    /// YAML settings file (environment variables still apply on top)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Key-value store URL
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// Access token for the store
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Namespace prefix
    #[arg(short = 'p', long)]
    prefix: Option<String>,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

impl Args {
    fn settings(&self) -> Result<CacheSettings> {
        let mut settings = match &self.config {
            Some(path) => CacheSettings::from_file(path)?.apply_env()?,
            None => CacheSettings::from_env()?,
        };
        if let Some(url) = &self.url {
            settings.store.endpoint_url = url.clone();
        }
        if let Some(token) = &self.token {
            settings.store.access_token = Some(token.clone());
        }
        if let Some(prefix) = &self.prefix {
            settings.cache.key_prefix = prefix.clone();
        }
        // An operator tool is never a test environment
        settings.cache.enabled = true;
        Ok(settings)
    }
}

struct CacheCli {
    cache: CacheManager,
}

/// Render a cache result, turning `success=false` into an error
fn render<T>(res: CacheResult<T>, show: impl FnOnce(T) -> String) -> Result<String> {
    if !res.success {
        return Err(anyhow::anyhow!(
            "{}",
            res.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    Ok(match res.data {
        Some(data) => show(data),
        None => "(nil)".dimmed().to_string(),
    })
}

fn integer(n: usize) -> String {
    format!("(integer) {}", n)
}

fn flag(b: bool) -> String {
    integer(usize::from(b))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn number(args: &[String], index: usize, name: &str) -> Result<f64> {
    args.get(index)
        .with_context(|| format!("missing {}", name))?
        .parse::<f64>()
        .with_context(|| format!("{} must be a number", name))
}

impl CacheCli {
    fn new(cache: CacheManager) -> Self {
        Self { cache }
    }

    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "GET" => self.cmd_get(args).await?,
            "DEL" | "DELETE" => self.cmd_del(args).await?,
            "EXISTS" => self.cmd_exists(args).await?,
            "EXPIRE" => self.cmd_expire(args).await?,
            "CLEAR" | "FLUSHDB" => self.cmd_clear().await?,
            "STATS" | "INFO" => self.cmd_stats().await?,
            "DISTANCE" => self.cmd_distance(args)?,
            "LOCATION" => self.cmd_location(args).await?,
            "NEARBY" => self.cmd_nearby(args).await?,
            "INVALIDATE-AREA" => self.cmd_invalidate_area(args).await?,
            "INVALIDATE-COLLECTION" => self.cmd_invalidate_collection(args).await?,
            "INVALIDATE-MERCHANT" => self.cmd_invalidate_merchant(args).await?,
            "INVALIDATE-ADDRESS" => self.cmd_invalidate_address(args).await?,
            "CLEAR-GEO" => render(self.cache.geo().clear_all_geo_cache().await, integer)?,
            "HELP" => self.help_text()?,
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    async fn cmd_get(&self, args: &[String]) -> Result<String> {
        let key = args.first().context("Usage: GET key")?;
        render(self.cache.kv().get::<Value>(key).await, |v| pretty(&v))
    }

    async fn cmd_del(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DEL key [key ...]"));
        }

        let mut deleted = 0;
        for key in args {
            let res = self.cache.kv().del(key).await;
            if !res.success {
                return render(res, flag);
            }
            if res.data == Some(true) {
                deleted += 1;
            }
        }
        Ok(integer(deleted))
    }

    async fn cmd_exists(&self, args: &[String]) -> Result<String> {
        let key = args.first().context("Usage: EXISTS key")?;
        render(self.cache.kv().exists(key).await, flag)
    }

    async fn cmd_expire(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: EXPIRE key seconds"));
        }

        let ttl = args[1]
            .parse::<u64>()
            .context("TTL must be a valid number")?;

        render(self.cache.kv().expire(&args[0], ttl).await, flag)
    }

    async fn cmd_clear(&self) -> Result<String> {
        render(self.cache.reset().await, integer)
    }

    async fn cmd_stats(&self) -> Result<String> {
        render(self.cache.documents().get_collection_stats().await, |stats| {
            let mut output = vec![
                "# Cache".to_string(),
                format!("prefix: {}", self.cache.config().key_prefix),
                format!("default_ttl: {}s", self.cache.config().default_ttl_seconds),
                String::new(),
                "# Collections".to_string(),
            ];
            if stats.is_empty() {
                output.push("(empty)".dimmed().to_string());
            }
            for (collection, count) in stats {
                output.push(format!("{}: {}", collection, count));
            }
            output.join("\n")
        })
    }

    fn cmd_distance(&self, args: &[String]) -> Result<String> {
        if args.len() < 4 {
            return Err(anyhow::anyhow!("Usage: DISTANCE lat1 lon1 lat2 lon2"));
        }
        let d = haversine_km(
            number(args, 0, "lat1")?,
            number(args, 1, "lon1")?,
            number(args, 2, "lat2")?,
            number(args, 3, "lon2")?,
        );
        Ok(format!("{:.3} km", d))
    }

    async fn cmd_location(&self, args: &[String]) -> Result<String> {
        let id = args.first().context("Usage: LOCATION merchant_id")?;
        render(
            self.cache.geo().get_merchant_location::<Value>(id).await,
            |v| pretty(&v),
        )
    }

    async fn cmd_nearby(&self, args: &[String]) -> Result<String> {
        if args.len() < 4 {
            return Err(anyhow::anyhow!("Usage: NEARBY lat lon radius_km id [id ...]"));
        }
        let lat = number(args, 0, "lat")?;
        let lon = number(args, 1, "lon")?;
        let radius = number(args, 2, "radius_km")?;

        let res = self
            .cache
            .geo()
            .filter_merchants_by_distance::<Value, _>(lat, lon, radius, &args[3..])
            .await;
        render(res, |found| {
            if found.is_empty() {
                return "(empty list)".dimmed().to_string();
            }
            found
                .iter()
                .enumerate()
                .map(|(i, m)| format!("{}) \"{}\" {:.3} km", i + 1, m.id, m.distance))
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    async fn cmd_invalidate_area(&self, args: &[String]) -> Result<String> {
        if args.len() < 3 {
            return Err(anyhow::anyhow!("Usage: INVALIDATE-AREA lat lon radius_km"));
        }
        let res = self
            .cache
            .geo()
            .invalidate_area_cache(
                number(args, 0, "lat")?,
                number(args, 1, "lon")?,
                number(args, 2, "radius_km")?,
            )
            .await;
        render(res, integer)
    }

    async fn cmd_invalidate_collection(&self, args: &[String]) -> Result<String> {
        let collection = args.first().context("Usage: INVALIDATE-COLLECTION name")?;
        render(
            self.cache.documents().invalidate_collection(collection).await,
            integer,
        )
    }

    async fn cmd_invalidate_merchant(&self, args: &[String]) -> Result<String> {
        let id = args.first().context("Usage: INVALIDATE-MERCHANT merchant_id")?;
        render(self.cache.invalidate_merchant(id).await, integer)
    }

    async fn cmd_invalidate_address(&self, args: &[String]) -> Result<String> {
        let id = args.first().context("Usage: INVALIDATE-ADDRESS address_id")?;
        render(self.cache.invalidate_address(id).await, integer)
    }

    fn help_text(&self) -> Result<String> {
        Ok(format!(
            r#"{}

{}
  GET key                              Get the cached value of key
  DEL key [key ...]                    Delete one or more keys
  EXISTS key                           Check if key exists
  EXPIRE key seconds                   Reset the TTL of key
  CLEAR                                Delete every key in the namespace

{}
  DISTANCE lat1 lon1 lat2 lon2         Great-circle distance in km
  LOCATION merchant_id                 Show a cached merchant location
  NEARBY lat lon radius id [id ...]    Cached merchants within radius
  INVALIDATE-AREA lat lon radius       Drop geo queries centered in area
  CLEAR-GEO                            Drop all geo queries and locations

{}
  STATS                                Cached entries per collection
  INVALIDATE-COLLECTION name           Drop a collection's documents and queries
  INVALIDATE-MERCHANT id               Merchant changed
  INVALIDATE-ADDRESS id                Address changed

{}
  HELP                                 Show this help message
  QUIT                                 Exit the CLI
"#,
            "marketcache CLI - Available Commands".bold().cyan(),
            "Key Commands:".bold(),
            "Geo Commands:".bold(),
            "Document Commands:".bold(),
            "Session Commands:".bold(),
        ))
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = args.settings()?;
    init_tracing(&settings.logging);

    let endpoint = settings.store.endpoint_url.clone();
    let cli = CacheCli::new(CacheManager::new(settings)?);

    // Check if running in command mode or interactive mode
    if !args.command.is_empty() {
        // Command mode: execute single command and exit
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match cli.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        // Interactive mode
        run_interactive(cli, &endpoint).await
    }
}

async fn run_interactive(cli: CacheCli, endpoint: &str) -> Result<()> {
    info!(
        "{}",
        format!("marketcache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!(
        "Connected to {} (prefix '{}')",
        endpoint,
        cli.cache.config().key_prefix
    );
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{}> ", "marketcache".green());
        let readline = rl.readline(&prompt);

        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                if parts.is_empty() {
                    continue;
                }

                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.to_uppercase() == "QUIT" || cmd.to_uppercase() == "EXIT" {
                    info!("Goodbye!");
                    break;
                }

                match cli.execute_command(cmd, args).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
