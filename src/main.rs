mod api;
mod client;
mod config;
mod error;
mod expire;
mod goes;
mod media;
mod nodeexporter;
mod nodemetrics;
mod oauth;
mod store;
#[cfg(test)]
mod test_server;
mod toot;
mod types;

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::Api;
use crate::client::{Deadline, Http, Instance};
use crate::config::{load_config, Overrides, Settings};
use crate::expire::Expire;
use crate::media::{ContentType, MediaUpload};
use crate::nodemetrics::Observation;
use crate::oauth::OAuth;
use crate::store::Store;
use crate::toot::{Status, Visibility};

const GOES_WEST_APP: &str = "GOES-17";
const GOES_WEST_DESCRIPTION: &str = "Satellite image of the western hemisphere of Earth";

#[derive(Parser, Debug)]
#[command(name = "mastobot")]
#[command(about = "Bots for Mastodon (or compatible) instances")]
struct Cli {
    /// TOML config file [default: mastobot.toml, if present]
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database holding app credentials [default: mastobot.db]
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Mastodon (or compatible) instance to interact with
    #[arg(long, global = true, value_name = "HOST")]
    instance: Option<String>,

    /// Time budget for the whole command, e.g. `10s` [default: 10s]
    #[arg(long, global = true, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Log info level
    #[arg(short = 'v', long = "log-info", global = true)]
    log_info: bool,

    /// Log debug level
    #[arg(short = 'V', long = "log-debug", global = true)]
    log_debug: bool,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Do everything up to the first change on the instance, then print
    /// what would have been sent
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage and use a named application
    App {
        /// Name of the application
        #[arg(long)]
        name: String,
        #[command(subcommand)]
        action: AppAction,
    },
    /// Toot satellite images of Earth
    Goes {
        #[command(subcommand)]
        satellite: Satellite,
    },
    /// Toot current metrics about a host
    Nodemetrics {
        /// URL of the node_exporter metrics
        #[arg(long, value_name = "URL")]
        metrics_url: Option<String>,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand, Debug)]
enum AppAction {
    /// Register the application with the instance
    Register,
    /// Manage the user access token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Toot!
    Toot(TootArgs),
    /// Delete all toots older than a certain age
    Expire {
        /// e.g. `30days` [default: 30days]
        #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
        max_age: Option<Duration>,
        /// Space deletions out. Pacing sleeps count against `--timeout`,
        /// so raise it to cover the whole run
        #[arg(long, value_name = "N")]
        deletes_per_minute: Option<NonZeroU32>,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Sign in and store a fresh access token
    Renew {
        /// Account email
        #[arg(short = 'U', long)]
        email: String,
        /// Account password
        #[arg(short = 'P', long)]
        password: String,
    },
}

#[derive(Args, Debug)]
struct TootArgs {
    message: String,
    /// private, unlisted, public or direct
    #[arg(long, default_value = "private")]
    visibility: Visibility,
    /// Mark the toot as containing sensitive material
    #[arg(long)]
    sensitive: bool,
    /// Spoiler text
    #[arg(long, value_name = "TEXT")]
    spoiler: Option<String>,
    /// Id of the status to reply to
    #[arg(long, value_name = "ID")]
    reply_to: Option<String>,
    /// PNG or JPEG image to attach
    #[arg(long, value_name = "FILE")]
    media: Option<PathBuf>,
    /// Alt text of the attached image
    #[arg(long, requires = "media")]
    description: Option<String>,
    /// Focal point of the attached image, in [-1, 1]
    #[arg(long, value_name = "X,Y", requires = "media", value_parser = parse_focus)]
    focus: Option<(f64, f64)>,
}

#[derive(Subcommand, Debug)]
enum Satellite {
    /// Western hemisphere, from GOES-17
    West {
        #[arg(long, value_name = "URL")]
        image_url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Check that the database answers queries
    Check,
    /// Roll back one schema version
    Rollback,
}

fn parse_focus(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s.split_once(',').ok_or("expected X,Y")?;
    let coordinate = |v: &str| -> Result<f64, String> {
        let v: f64 = v.trim().parse().map_err(|e| format!("{v:?}: {e}"))?;
        if (-1.0..=1.0).contains(&v) {
            Ok(v)
        } else {
            Err(format!("{v} is outside [-1, 1]"))
        }
    };
    Ok((coordinate(x)?, coordinate(y)?))
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut o = Overrides {
            instance: self.instance.clone(),
            db: self.db.clone(),
            timeout: self.timeout,
            ..Default::default()
        };
        match &self.command {
            Command::App {
                action:
                    AppAction::Expire {
                        max_age,
                        deletes_per_minute,
                    },
                ..
            } => {
                o.max_age = *max_age;
                o.deletes_per_minute = *deletes_per_minute;
            }
            Command::Nodemetrics { metrics_url } => o.metrics_url = metrics_url.clone(),
            Command::Goes {
                satellite: Satellite::West { image_url },
            } => o.image_url = image_url.clone(),
            _ => {}
        }
        o
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.log_debug {
        "debug"
    } else if cli.log_info {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .flatten_event(true)
            .with_target(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let settings = Settings::merge(config, cli.overrides())?;
    let store = Store::open(&settings.db)
        .with_context(|| format!("cannot open database {}", settings.db.display()))?;
    // Started before anything touches the network.
    let deadline = Deadline::after(settings.timeout);

    let runner = Runner {
        store: &store,
        settings: &settings,
        deadline,
        dry_run: cli.dry_run,
    };
    match cli.command {
        Command::Db { action } => runner.db(action),
        Command::App { name, action } => runner.app(&name, action),
        Command::Goes {
            satellite: Satellite::West { .. },
        } => runner.goes_west(),
        Command::Nodemetrics { .. } => runner.nodemetrics(),
    }
}

/// What every command runs with.
struct Runner<'a> {
    store: &'a Store,
    settings: &'a Settings,
    deadline: Deadline,
    dry_run: bool,
}

impl Runner<'_> {
    fn instance(&self) -> Result<Instance> {
        Ok(Instance::new(self.settings.instance()?)?)
    }

    fn db(&self, action: DbAction) -> Result<()> {
        match action {
            DbAction::Check => {
                let sum = self.store.check()?;
                ensure!(sum == 3, "database check returned {sum}, expected 3");
                println!("OK");
            }
            DbAction::Rollback => match self.store.rollback()? {
                Some(version) => info!(version, "rolled back database schema"),
                None => bail!("database schema is already empty"),
            },
        }
        Ok(())
    }

    fn app(&self, name: &str, action: AppAction) -> Result<()> {
        let instance = self.instance()?;
        match action {
            AppAction::Register => {
                let registration = OAuth::new(self.store, &instance, self.deadline)
                    .register_app(name)
                    .with_context(|| format!("cannot register {name} on {}", instance.name()))?;
                info!(app = name, id = %registration.app_id, "registered");
            }
            AppAction::Token {
                action: TokenAction::Renew { email, password },
            } => {
                OAuth::new(self.store, &instance, self.deadline)
                    .get_access_token(name, &email, &password)
                    .with_context(|| format!("cannot get a token for {name}"))?;
            }
            AppAction::Toot(args) => self.toot(&instance, name, args)?,
            AppAction::Expire { .. } => {
                let http = Http::new(self.deadline)?;
                let api = Api::new(self.store, &http, &instance, name);
                let mut expire = Expire::new(self.settings.max_age).dry_run(self.dry_run);
                if let Some(per_minute) = self.settings.deletes_per_minute {
                    expire = expire.paced(per_minute);
                }
                expire.run(&api, |id| println!("{id}"))?;
            }
        }
        Ok(())
    }

    fn toot(&self, instance: &Instance, name: &str, args: TootArgs) -> Result<()> {
        let upload = match &args.media {
            Some(path) => {
                let content_type = ContentType::from_path(path)
                    .with_context(|| format!("{} is not a png or jpeg", path.display()))?;
                Some(MediaUpload {
                    content_type,
                    file: std::fs::read(path)
                        .with_context(|| format!("cannot read {}", path.display()))?,
                    thumbnail: Vec::new(),
                    description: args.description.clone().unwrap_or_default(),
                    focus: args.focus.unwrap_or_default(),
                })
            }
            None => None,
        };
        let mut status = Status {
            text: args.message,
            visibility: args.visibility,
            sensitive: args.sensitive,
            spoiler: args.spoiler.unwrap_or_default(),
            reply_to_id: args.reply_to,
            ..Default::default()
        };
        if self.dry_run {
            println!("{}", status.text);
            return Ok(());
        }

        let http = Http::new(self.deadline)?;
        let api = Api::new(self.store, &http, instance, name);
        api.verify_credentials()?;
        if let Some(upload) = upload {
            let media_id = upload.submit(&api).context("cannot upload media")?;
            println!("{media_id}");
            status.media_ids.push(media_id);
        }
        println!("{}", status.submit(&api)?);
        Ok(())
    }

    fn goes_west(&self) -> Result<()> {
        let instance = self.instance()?;
        let http = Http::new(self.deadline)?;
        let api = Api::new(self.store, &http, &instance, GOES_WEST_APP);
        if !self.dry_run {
            api.verify_credentials()?;
        }

        let image = goes::fetch(&http, &self.settings.image_url)?;
        if self.dry_run {
            info!(
                large = image.large.len(),
                thumbnail = image.thumbnail.len(),
                "resized, not uploading"
            );
            return Ok(());
        }
        let media_id = MediaUpload {
            content_type: ContentType::Jpeg,
            file: image.large,
            thumbnail: image.thumbnail,
            description: GOES_WEST_DESCRIPTION.to_string(),
            focus: (0.5, 0.5),
        }
        .submit(&api)?;
        println!("{media_id}");

        let status = Status {
            media_ids: vec![media_id],
            visibility: Visibility::Public,
            ..Default::default()
        };
        println!("{}", status.submit(&api)?);
        Ok(())
    }

    fn nodemetrics(&self) -> Result<()> {
        let instance = self.instance()?;
        let metrics_url = self
            .settings
            .metrics_url
            .as_deref()
            .context("no metrics url: pass --metrics-url or set nodemetrics.metrics_url")?;
        let http = Http::new(self.deadline)?;
        let metrics = nodeexporter::scrape(&http, metrics_url)?;
        let prev = Observation::load(self.store, instance.name())?;
        let status = Status {
            text: nodemetrics::render(&metrics, &prev),
            visibility: Visibility::Private,
            ..Default::default()
        };
        if self.dry_run {
            println!("{}", status.text);
            return Ok(());
        }

        let api = Api::new(self.store, &http, &instance, nodemetrics::APP_NAME);
        api.verify_credentials()?;
        println!("{}", status.submit(&api)?);
        Observation::of(&metrics).save(self.store, instance.name());
        Ok(())
    }
}
