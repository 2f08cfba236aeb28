use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use placebook_core::{
    load_placebook_config, require, Action, Database, DirectoryResult, Directory, GeoPoint,
    ImportReport, Listing, ListingMetrics, ListingPlace, ListingStatus, ListingSubmission,
    ListingUpdate, NearPlace, NewPlace, Place, PlacePatch, PlacebookConfig, Principal, Role,
    SearchRequest, SortMode, DEFAULT_CITY,
};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub type Result<T> = std::result::Result<T, AppError>;

pub const TOKEN_ENV: &str = "PLACEBOOKCTL_TOKEN";

const SCHEMA_TABLES: [&str; 5] = [
    "places",
    "place_index",
    "listings",
    "user_favorites",
    "user_history",
];

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] placebook_core::ConfigError),
    #[error("{kind} error: {source}", kind = .source.kind())]
    Directory {
        #[from]
        source: placebook_core::DirectoryError,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Placebook directory command-line interface", long_about = None)]
pub struct Cli {
    /// Path to placebook.toml
    #[arg(long, default_value = "configs/placebook.toml")]
    pub config: PathBuf,
    /// Alternative path to the directory database (overrides paths.database)
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Local authentication token (required when PLACEBOOKCTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Identity the command acts as
    #[arg(long = "as", default_value = "placebookctl")]
    pub principal: String,
    /// Role of the acting identity
    #[arg(long, value_enum, default_value_t = RoleArg::User)]
    pub role: RoleArg,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    User,
    Owner,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::User => Role::User,
            RoleArg::Owner => Role::Owner,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Creates or migrates the directory database
    Init,
    /// Shows a summary of the directory
    Status,
    /// Place records
    #[command(subcommand)]
    Place(PlaceCommands),
    /// Filtered and sorted place search
    Search(SearchArgs),
    /// Moderated listing submissions
    #[command(subcommand)]
    Listing(ListingCommands),
    /// Favorites of the acting identity
    #[command(subcommand)]
    Favorite(FavoriteCommands),
    /// Viewing history of the acting identity
    #[command(subcommand)]
    History(HistoryCommands),
    /// Runs integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum PlaceCommands {
    /// Publishes a place directly, without moderation
    Add(PlaceAddArgs),
    /// Shows one place
    Show(IdArgs),
    /// Patches a place
    Update(PlaceUpdateArgs),
    /// Deletes a place no listing refers to
    Delete(IdArgs),
    /// Lists places nearest to a point
    Near(NearArgs),
    /// Lists every place within a radius
    Within(WithinArgs),
    /// Lists known cities
    Cities,
    /// Imports a JSON array of places, upserting by coordinates
    Import(ImportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct PlaceAddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = DEFAULT_CITY)]
    pub city: String,
    /// Repeat for several categories
    #[arg(long = "category")]
    pub categories: Vec<String>,
    #[arg(long)]
    pub price_level: i64,
    #[arg(long)]
    pub rating: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub website: Option<String>,
}

impl PlaceAddArgs {
    fn to_new_place(&self) -> NewPlace {
        let mut place = NewPlace::new(
            self.name.clone(),
            self.city.clone(),
            self.price_level,
            GeoPoint::new(self.lng, self.lat),
        );
        if !self.categories.is_empty() {
            place = place.with_category(self.categories.clone());
        }
        if let Some(rating) = self.rating {
            place = place.with_rating(rating);
        }
        place.address = self.address.clone();
        place.phone = self.phone.clone();
        place.website = self.website.clone();
        place
    }
}

#[derive(Args, Debug, Clone)]
pub struct PlaceUpdateArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    #[arg(long = "category")]
    pub categories: Vec<String>,
    #[arg(long)]
    pub price_level: Option<i64>,
    #[arg(long)]
    pub rating: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub lng: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub website: Option<String>,
}

impl PlaceUpdateArgs {
    fn to_patch(&self) -> Result<PlacePatch> {
        let location = match (self.lng, self.lat) {
            (Some(lng), Some(lat)) => Some(GeoPoint::new(lng, lat)),
            (None, None) => None,
            _ => {
                return Err(AppError::InvalidArgument(
                    "--lng and --lat must be given together".to_string(),
                ))
            }
        };
        Ok(PlacePatch {
            name: self.name.clone(),
            city: self.city.clone(),
            category: (!self.categories.is_empty()).then(|| self.categories.clone()),
            price_level: self.price_level,
            ratings_average: self.rating,
            ratings_quantity: None,
            address: self.address.clone(),
            phone: self.phone.clone(),
            website: self.website.clone(),
            location,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct NearArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    /// Upper bound in meters
    #[arg(long)]
    pub max_distance: Option<f64>,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct WithinArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    /// Radius in meters (defaults to search.default_radius_meters)
    #[arg(long)]
    pub radius: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long)]
    pub city: Option<String>,
    #[arg(long)]
    pub price_level: Option<i64>,
    /// default, nearest or highRating
    #[arg(long, default_value = "default", value_parser = parse_sort)]
    pub sort: SortMode,
    #[arg(long, allow_negative_numbers = true)]
    pub lng: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum ListingCommands {
    /// Submits a listing for moderation
    Submit(ListingSubmitArgs),
    /// Shows one listing
    Show(IdArgs),
    /// Accepts a pending listing
    Approve(IdArgs),
    /// Rejects a pending listing with a note
    Reject(ListingRejectArgs),
    /// Takes an accepted listing back to rejected (admin only)
    Unpublish(ListingRejectArgs),
    /// Edits a listing (owners: pending or rejected only)
    Edit(ListingEditArgs),
    /// Deletes a listing (owners: pending or rejected only)
    Delete(IdArgs),
    /// Copies a rejected listing into a new pending one
    Resubmit(IdArgs),
    /// Listings owned by the acting identity
    Mine,
    /// Every listing, optionally by status
    List(ListingListArgs),
    /// Listing counts by status
    Metrics,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListingPlaceArgs {
    /// Existing place the listing refers to
    #[arg(long)]
    pub place_id: Option<String>,
    /// JSON file with the changes proposed for --place-id
    #[arg(long)]
    pub changes_file: Option<PathBuf>,
    /// JSON file describing a new place
    #[arg(long)]
    pub place_file: Option<PathBuf>,
}

impl ListingPlaceArgs {
    fn resolve(&self) -> Result<Option<ListingPlace>> {
        match (&self.place_id, &self.place_file) {
            (Some(place_id), None) => {
                let changes = match &self.changes_file {
                    Some(path) => read_json::<PlacePatch>(path)?,
                    None => PlacePatch::default(),
                };
                Ok(Some(ListingPlace::Existing {
                    place_id: place_id.clone(),
                    changes,
                }))
            }
            (None, Some(path)) => {
                if self.changes_file.is_some() {
                    return Err(AppError::InvalidArgument(
                        "--changes-file only applies to --place-id".to_string(),
                    ));
                }
                Ok(Some(ListingPlace::inline(read_json::<NewPlace>(path)?)))
            }
            (None, None) => Ok(None),
            (Some(_), Some(_)) => Err(AppError::InvalidArgument(
                "use either --place-id or --place-file, not both".to_string(),
            )),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListingSubmitArgs {
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    #[command(flatten)]
    pub place: ListingPlaceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ListingRejectArgs {
    pub id: String,
    #[arg(long)]
    pub note: String,
}

#[derive(Args, Debug, Clone)]
pub struct ListingEditArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[command(flatten)]
    pub place: ListingPlaceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ListingListArgs {
    #[arg(long, value_parser = parse_status)]
    pub status: Option<ListingStatus>,
}

#[derive(Subcommand, Debug)]
pub enum FavoriteCommands {
    Add(IdArgs),
    Remove(IdArgs),
    List,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    Append(IdArgs),
    List,
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Runs basic checks
    Check,
}

fn parse_sort(value: &str) -> std::result::Result<SortMode, String> {
    value.parse::<SortMode>().map_err(|err| err.to_string())
}

fn parse_status(value: &str) -> std::result::Result<ListingStatus, String> {
    value.parse::<ListingStatus>().map_err(|err| err.to_string())
}

/// Installs the `tracing` subscriber. `RUST_LOG` wins over the configured
/// filter; logs go to stderr so JSON output stays clean.
pub fn init_tracing(cli: &Cli) {
    let fallback = load_placebook_config(&cli.config)
        .map(|config| config.logging.filter)
        .unwrap_or_else(|_| "placebook_core=info,placebookctl=info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;
    debug!(principal = %context.principal.id, role = %context.principal.role, "context ready");

    match &cli.command {
        Commands::Init => render(&context.init()?, cli.format)?,
        Commands::Status => render(&context.gather_status()?, cli.format)?,
        Commands::Place(command) => match command {
            PlaceCommands::Add(args) => render(&context.place_add(args)?, cli.format)?,
            PlaceCommands::Show(args) => render(&context.place_show(&args.id)?, cli.format)?,
            PlaceCommands::Update(args) => render(&context.place_update(args)?, cli.format)?,
            PlaceCommands::Delete(args) => render(&context.place_delete(&args.id)?, cli.format)?,
            PlaceCommands::Near(args) => render(&context.place_near(args)?, cli.format)?,
            PlaceCommands::Within(args) => render(&context.place_within(args)?, cli.format)?,
            PlaceCommands::Cities => render(&context.cities()?, cli.format)?,
            PlaceCommands::Import(args) => render(&context.place_import(args)?, cli.format)?,
        },
        Commands::Search(args) => render(&context.search(args)?, cli.format)?,
        Commands::Listing(command) => match command {
            ListingCommands::Submit(args) => {
                render(&context.listing_submit(args)?, cli.format)?
            }
            ListingCommands::Show(args) => render(&context.listing_show(&args.id)?, cli.format)?,
            ListingCommands::Approve(args) => {
                render(&context.listing_approve(&args.id)?, cli.format)?
            }
            ListingCommands::Reject(args) => render(&context.listing_reject(args)?, cli.format)?,
            ListingCommands::Unpublish(args) => {
                render(&context.listing_unpublish(args)?, cli.format)?
            }
            ListingCommands::Edit(args) => render(&context.listing_edit(args)?, cli.format)?,
            ListingCommands::Delete(args) => {
                render(&context.listing_delete(&args.id)?, cli.format)?
            }
            ListingCommands::Resubmit(args) => {
                render(&context.listing_resubmit(&args.id)?, cli.format)?
            }
            ListingCommands::Mine => render(&context.my_listings()?, cli.format)?,
            ListingCommands::List(args) => render(&context.all_listings(args)?, cli.format)?,
            ListingCommands::Metrics => render(&context.listing_metrics()?, cli.format)?,
        },
        Commands::Favorite(command) => match command {
            FavoriteCommands::Add(args) => {
                render(&context.favorite_add(&args.id)?, cli.format)?
            }
            FavoriteCommands::Remove(args) => {
                render(&context.favorite_remove(&args.id)?, cli.format)?
            }
            FavoriteCommands::List => render(&context.favorites()?, cli.format)?,
        },
        Commands::History(command) => match command {
            HistoryCommands::Append(args) => {
                render(&context.history_append(&args.id)?, cli.format)?
            }
            HistoryCommands::List => render(&context.history()?, cli.format)?,
            HistoryCommands::Clear => render(&context.history_clear()?, cli.format)?,
        },
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    verify_token(std::env::var(TOKEN_ENV).ok().as_deref(), cli.token.as_deref())
}

fn verify_token(expected: Option<&str>, provided: Option<&str>) -> Result<()> {
    match (expected, provided) {
        (None, _) => Ok(()),
        (Some(expected), Some(provided)) if expected == provided => Ok(()),
        _ => Err(AppError::Authentication),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Clone)]
struct AppContext {
    config_path: PathBuf,
    config: PlacebookConfig,
    database_path: PathBuf,
    directory: Directory,
    principal: Principal,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_placebook_config(&config_path)?;
        let database_path = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        let db = Database::builder()
            .path(&database_path)
            .create_if_missing(true)
            .build()?;
        let directory = Directory::new(db, &config);
        let principal = Principal::new(cli.principal.clone(), cli.role.into());

        Ok(Self {
            config_path,
            config,
            database_path,
            directory,
            principal,
        })
    }

    fn directory(&self) -> Result<&Directory> {
        if !self.database_path.exists() {
            return Err(AppError::MissingResource(format!(
                "database missing at {}; run `placebookctl init`",
                self.database_path.display()
            )));
        }
        Ok(&self.directory)
    }

    fn init(&self) -> Result<ActionResult> {
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.directory.database().initialize()?;
        info!(path = %self.database_path.display(), "directory schema ready");
        Ok(ActionResult::ok(format!(
            "schema ready at {}",
            self.database_path.display()
        )))
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let directory = self.directory()?;
        let listings = if self.principal.is_admin() {
            Some(directory.listings.metrics(&self.principal)?)
        } else {
            None
        };
        Ok(StatusReport {
            config: self.config_path.display().to_string(),
            database: self.database_path.display().to_string(),
            places: directory.places.count()?,
            cities: directory.places.cities()?,
            listings,
            reset_rejected_on_owner_edit: self.config.moderation.reset_rejected_on_owner_edit,
        })
    }

    fn place_add(&self, args: &PlaceAddArgs) -> Result<Place> {
        Ok(self
            .directory()?
            .listings
            .publish_direct(&self.principal, args.to_new_place())?)
    }

    fn place_show(&self, id: &str) -> Result<Place> {
        Ok(self.directory()?.places.get(id)?)
    }

    fn place_update(&self, args: &PlaceUpdateArgs) -> Result<Place> {
        require(&self.principal, Action::AdminEdit, None)?;
        let patch = args.to_patch()?;
        Ok(self.directory()?.places.update(&args.id, &patch)?)
    }

    fn place_delete(&self, id: &str) -> Result<ActionResult> {
        require(&self.principal, Action::AdminDelete, None)?;
        self.directory()?.places.delete(id)?;
        Ok(ActionResult::ok(format!("place {id} deleted")))
    }

    fn place_near(&self, args: &NearArgs) -> Result<Vec<NearPlace>> {
        let near = self
            .directory()?
            .places
            .find_near(GeoPoint::new(args.lng, args.lat), args.max_distance)?
            .take(args.limit)
            .collect::<DirectoryResult<Vec<_>>>()?;
        Ok(near)
    }

    fn place_within(&self, args: &WithinArgs) -> Result<Vec<NearPlace>> {
        Ok(self
            .directory()?
            .places
            .places_within(GeoPoint::new(args.lng, args.lat), args.radius)?)
    }

    fn cities(&self) -> Result<Vec<String>> {
        Ok(self.directory()?.places.cities()?)
    }

    /// Entries that do not even deserialize count as skipped, like records
    /// that fail validation.
    fn place_import(&self, args: &ImportArgs) -> Result<ImportReport> {
        require(&self.principal, Action::AdminEdit, None)?;
        let raw: Vec<serde_json::Value> = read_json(&args.file)?;
        let mut malformed = 0;
        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<NewPlace>(value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    debug!(error = %err, "skipping malformed import entry");
                    malformed += 1;
                }
            }
        }
        let mut report = self.directory()?.places.import(records)?;
        report.skipped += malformed;
        Ok(report)
    }

    fn search(&self, args: &SearchArgs) -> Result<Vec<Place>> {
        let mut request = SearchRequest::new().sort_by(args.sort);
        if let Some(city) = &args.city {
            request = request.city(city.clone());
        }
        if let Some(level) = args.price_level {
            request = request.price_level(level);
        }
        match (args.lng, args.lat) {
            (Some(lng), Some(lat)) => request = request.origin(GeoPoint::new(lng, lat)),
            (None, None) => {}
            _ => {
                return Err(AppError::InvalidArgument(
                    "--lng and --lat must be given together".to_string(),
                ))
            }
        }
        let places = self
            .directory()?
            .search
            .search(&request)?
            .skip(args.offset)
            .take(args.limit)
            .collect::<DirectoryResult<Vec<_>>>()?;
        Ok(places)
    }

    fn listing_submit(&self, args: &ListingSubmitArgs) -> Result<Listing> {
        let place = args.place.resolve()?.ok_or_else(|| {
            AppError::InvalidArgument("either --place-id or --place-file is required".to_string())
        })?;
        let mut submission = ListingSubmission::new(args.title.clone(), place);
        if let Some(description) = &args.description {
            submission = submission.with_description(description.clone());
        }
        Ok(self
            .directory()?
            .listings
            .submit(&self.principal, submission)?)
    }

    fn listing_show(&self, id: &str) -> Result<Listing> {
        Ok(self.directory()?.listings.get(&self.principal, id)?)
    }

    fn listing_approve(&self, id: &str) -> Result<Listing> {
        Ok(self.directory()?.listings.approve(&self.principal, id)?)
    }

    fn listing_reject(&self, args: &ListingRejectArgs) -> Result<Listing> {
        Ok(self
            .directory()?
            .listings
            .reject(&self.principal, &args.id, &args.note)?)
    }

    fn listing_unpublish(&self, args: &ListingRejectArgs) -> Result<Listing> {
        Ok(self
            .directory()?
            .listings
            .unpublish(&self.principal, &args.id, &args.note)?)
    }

    /// Admins edit through the moderation path; everyone else edits as owner.
    fn listing_edit(&self, args: &ListingEditArgs) -> Result<Listing> {
        let update = ListingUpdate {
            title: args.title.clone(),
            description: args.description.clone(),
            place: args.place.resolve()?,
        };
        if update.is_empty() {
            return Err(AppError::InvalidArgument("nothing to change".to_string()));
        }
        let listings = &self.directory()?.listings;
        let listing = if self.principal.is_admin() {
            listings.admin_update(&self.principal, &args.id, update)?
        } else {
            listings.update_own(&self.principal, &args.id, update)?
        };
        Ok(listing)
    }

    fn listing_delete(&self, id: &str) -> Result<ActionResult> {
        let listings = &self.directory()?.listings;
        if self.principal.is_admin() {
            let detail = match listings.admin_delete(&self.principal, id)? {
                Some(place_id) => format!("listing {id} deleted with place {place_id}"),
                None => format!("listing {id} deleted"),
            };
            Ok(ActionResult::ok(detail))
        } else {
            listings.delete_own(&self.principal, id)?;
            Ok(ActionResult::ok(format!("listing {id} deleted")))
        }
    }

    fn listing_resubmit(&self, id: &str) -> Result<Listing> {
        Ok(self.directory()?.listings.resubmit(&self.principal, id)?)
    }

    fn my_listings(&self) -> Result<Vec<Listing>> {
        Ok(self.directory()?.listings.my_listings(&self.principal)?)
    }

    fn all_listings(&self, args: &ListingListArgs) -> Result<Vec<Listing>> {
        Ok(self
            .directory()?
            .listings
            .all_listings(&self.principal, args.status)?)
    }

    fn listing_metrics(&self) -> Result<ListingMetrics> {
        Ok(self.directory()?.listings.metrics(&self.principal)?)
    }

    fn favorite_add(&self, place_id: &str) -> Result<ActionResult> {
        self.directory()?
            .collections
            .add_favorite(&self.principal, place_id)?;
        Ok(ActionResult::ok(format!("{place_id} is a favorite")))
    }

    fn favorite_remove(&self, place_id: &str) -> Result<ActionResult> {
        self.directory()?
            .collections
            .remove_favorite(&self.principal, place_id)?;
        Ok(ActionResult::ok(format!("{place_id} is not a favorite")))
    }

    fn favorites(&self) -> Result<Vec<Place>> {
        Ok(self.directory()?.collections.favorites(&self.principal)?)
    }

    fn history_append(&self, place_id: &str) -> Result<ActionResult> {
        self.directory()?
            .collections
            .append_history(&self.principal, place_id)?;
        Ok(ActionResult::ok(format!("{place_id} added to history")))
    }

    fn history(&self) -> Result<Vec<Place>> {
        Ok(self.directory()?.collections.history(&self.principal)?)
    }

    fn history_clear(&self) -> Result<ActionResult> {
        let cleared = self
            .directory()?
            .collections
            .clear_history(&self.principal)?;
        Ok(ActionResult::ok(format!("{cleared} history entries cleared")))
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_path("placebook.toml", &self.config_path));
        results.push(self.check_directory("data_dir", Path::new(&self.config.paths.data_dir)));
        results.push(self.check_database("database", &self.database_path));
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} missing", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::warn(
                name,
                format!("{path} is not a directory", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(name, format!("{path} not found", path = path.display())),
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::error(
                name,
                format!("{path} not found; run `placebookctl init`", path = path.display()),
            );
        }
        // Read-write without create: a WAL database may need its shared-memory file.
        let conn = match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE) {
            Ok(conn) => conn,
            Err(err) => return HealthEntry::error(name, format!("failed to open: {err}")),
        };
        let integrity: rusqlite::Result<String> =
            conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
        match integrity {
            Ok(result) if result.eq_ignore_ascii_case("ok") => {}
            Ok(result) => return HealthEntry::warn(name, format!("integrity_check: {result}")),
            Err(err) => return HealthEntry::warn(name, format!("error: {err}")),
        }
        match missing_tables(&conn) {
            Ok(missing) if missing.is_empty() => HealthEntry::ok(name, "integrity ok, schema complete"),
            Ok(missing) => HealthEntry::error(name, format!("missing tables: {}", missing.join(", "))),
            Err(err) => HealthEntry::warn(name, format!("error: {err}")),
        }
    }
}

fn missing_tables(conn: &Connection) -> rusqlite::Result<Vec<&'static str>> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM sqlite_master WHERE name = ?1")?;
    let mut missing = Vec::new();
    for table in SCHEMA_TABLES {
        let count: i64 = stmt.query_row([table], |row| row.get(0))?;
        if count == 0 {
            missing.push(table);
        }
    }
    Ok(missing)
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub status: String,
    pub detail: String,
}

impl ActionResult {
    fn ok(detail: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for ActionResult {
    fn display(&self) -> String {
        self.detail.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub config: String,
    pub database: String,
    pub places: usize,
    pub cities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listings: Option<ListingMetrics>,
    pub reset_rejected_on_owner_edit: bool,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Config: {}", self.config),
            format!("Database: {}", self.database),
            format!("Places: {}", self.places),
        ];
        if !self.cities.is_empty() {
            lines.push(format!("Cities: {}", self.cities.join(", ")));
        }
        if let Some(listings) = &self.listings {
            lines.push("Listings:".to_string());
            lines.push(format!("  - pending: {}", listings.pending));
            lines.push(format!("  - accepted: {}", listings.accepted));
            lines.push(format!("  - rejected: {}", listings.rejected));
        }
        if self.reset_rejected_on_owner_edit {
            lines.push("Owner edits reopen rejected listings".to_string());
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Place {
    fn display(&self) -> String {
        format!(
            "{id}  {name} ({city}) price {price} rating {rating:.1} @ {lat:.5},{lng:.5}",
            id = self.id,
            name = self.name,
            city = self.city,
            price = self.price_level,
            rating = self.ratings_average,
            lat = self.location.lat,
            lng = self.location.lng,
        )
    }
}

impl DisplayFallback for Vec<Place> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "No places found".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<NearPlace> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "No places found".to_string();
        }
        self.iter()
            .map(|near| format!("{:>10.0} m  {}", near.distance_meters, near.place.display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<String> {
    fn display(&self) -> String {
        if self.is_empty() {
            "No cities".to_string()
        } else {
            self.join("\n")
        }
    }
}

impl DisplayFallback for ImportReport {
    fn display(&self) -> String {
        format!(
            "inserted {}, updated {}, skipped {}",
            self.inserted, self.updated, self.skipped
        )
    }
}

impl DisplayFallback for Listing {
    fn display(&self) -> String {
        let mut line = format!(
            "{id} [{status}] {title} (owner {owner})",
            id = self.id,
            status = self.status,
            title = self.title,
            owner = self.owner_id
        );
        if let Some(place_id) = &self.place_id {
            line.push_str(&format!(" place {place_id}"));
        }
        if let Some(note) = &self.admin_note {
            line.push_str(&format!(" note: {note}"));
        }
        line
    }
}

impl DisplayFallback for Vec<Listing> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "No listings found".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for ListingMetrics {
    fn display(&self) -> String {
        format!(
            "pending: {}\naccepted: {}\nrejected: {}\ntotal: {}",
            self.pending,
            self.accepted,
            self.rejected,
            self.total()
        )
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}
