//! `ydna`: walk paternal lines on Geni and propagate Y-DNA haplogroups.
//!
//! # Responsibility
//! - Parse arguments, load configuration and start logging.
//! - Wire the core engines to the SQLite cache and the throttled Geni client.
//! - Print run summaries and write CSV exports.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use ydna_core::export::csv::{
    import_assignments, read_assignment_rows, rows_for_profiles, rows_from_records,
    tree_file_name, write_rows_to_path,
};
use ydna_core::service::propagation::PropagationEntry;
use ydna_core::service::traversal::SkipReason;
use ydna_core::{
    build_paternal_tree, default_log_level, init_logging, locate_root, normalize_profile_id,
    open_db, AppConfig, Connection, Direction, FamilyListing, Gender, GeniClient, LocalStore,
    Profile, PropagationDirection, PropagationReport, PropagationRequest, PropagationService,
    RemoteError, RemoteGraph, RootStatus, SqliteStore, ThrottledGraph, TraversalReport,
    TraversalService, TreeBuildRequest,
};

#[derive(Parser)]
#[command(
    name = "ydna",
    version,
    about = "Propagate Y-DNA haplogroups along Geni paternal lines"
)]
struct Cli {
    /// Config file (defaults to ./ydna.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite cache path (overrides the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Answer from the local cache only; uncached families are reported as
    /// skipped branches
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize access to Geni and store the token
    Auth {
        /// Authorization code returned to the redirect URI
        #[arg(long)]
        code: Option<String>,
    },

    /// Show one profile, fetching it when not cached
    Profile {
        /// Profile id, number or URL
        profile_id: String,

        /// Print the cached profile and its assignments as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch and show the immediate family of a profile
    Family {
        /// Profile id, number or URL
        profile_id: String,
    },

    /// Walk paternal ancestors of a profile
    Ancestors(WalkArgs),

    /// Walk male-line descendants of a profile
    Descendants(WalkArgs),

    /// Find the oldest paternal ancestor of a profile
    Root {
        /// Profile id, number or URL
        profile_id: String,

        /// Maximum generations to climb
        #[arg(short, long)]
        generations: Option<u32>,

        /// Re-fetch family listings even when cached
        #[arg(long)]
        refresh: bool,
    },

    /// Assign a tested haplogroup to a profile and its paternal line
    Propagate {
        #[command(flatten)]
        run: RunArgs,

        /// Only propagate to ancestors
        #[arg(long, conflicts_with = "down_only")]
        up_only: bool,

        /// Only propagate to descendants
        #[arg(long)]
        down_only: bool,

        /// Write the profiles of this run to a CSV file
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Propagate from the root ancestor to every male-line descendant
    FullTree {
        #[command(flatten)]
        run: RunArgs,

        /// CSV output path (defaults to an auto-named file)
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Directory for the auto-named CSV
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Record a named paternal tree from the root ancestor down
    BuildTree {
        /// Any profile on the paternal line
        profile_id: String,

        /// Tree name (defaults to "Paternal tree of <root>")
        #[arg(short, long)]
        name: Option<String>,

        /// Haplogroup label to record with the tree
        #[arg(long)]
        haplogroup: Option<String>,

        /// Maximum generations up (overrides the config file)
        #[arg(long)]
        max_up: Option<u32>,

        /// Maximum generations down (overrides the config file)
        #[arg(long)]
        max_down: Option<u32>,

        /// Write the tree members to a CSV file
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Re-fetch family listings even when cached
        #[arg(long)]
        refresh: bool,
    },

    /// Import tested haplogroups from a CSV file
    Import {
        /// CSV with profile_id (or geni_profile_id), haplogroup and optional source columns
        csv_file: PathBuf,
    },

    /// Export stored assignments whose haplogroup starts with a label
    Export {
        /// Haplogroup label or prefix, e.g. R-M269
        haplogroup: String,

        /// Output CSV file
        output: PathBuf,
    },

    /// Show local cache statistics
    Stats,
}

#[derive(Args)]
struct WalkArgs {
    /// Profile id, number or URL
    profile_id: String,

    /// Maximum generations to walk
    #[arg(short, long)]
    generations: Option<u32>,

    /// Write visited profiles to a CSV file
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Re-fetch family listings even when cached
    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Seed profile id, number or URL
    profile_id: String,

    /// Y-DNA haplogroup, e.g. R-M269
    haplogroup: String,

    /// Origin of the haplogroup result
    #[arg(short, long, default_value = "FTDNA")]
    source: String,

    /// Maximum generations up (overrides the config file)
    #[arg(long)]
    max_up: Option<u32>,

    /// Maximum generations down (overrides the config file)
    #[arg(long)]
    max_down: Option<u32>,

    /// Re-fetch family listings even when cached
    #[arg(long)]
    refresh: bool,
}

/// Remote used when `--offline` is set; every fetch fails without retry.
struct CacheOnly;

impl RemoteGraph for CacheOnly {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        Err(RemoteError::InvalidResponse(format!(
            "offline mode: family of {profile_id} is not cached"
        )))
    }
}

type Remote = Box<dyn RemoteGraph>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    start_logging(&cli, &config);

    match &cli.command {
        Commands::Auth { code } => cmd_auth(&config, code.as_deref()),
        Commands::Profile { profile_id, json } => cmd_profile(&cli, &config, profile_id, *json),
        Commands::Family { profile_id } => cmd_family(&cli, &config, profile_id),
        Commands::Ancestors(args) => cmd_walk(&cli, &config, args, Direction::Up),
        Commands::Descendants(args) => cmd_walk(&cli, &config, args, Direction::Down),
        Commands::Root {
            profile_id,
            generations,
            refresh,
        } => cmd_root(&cli, &config, profile_id, *generations, *refresh),
        Commands::Propagate {
            run,
            up_only,
            down_only,
            export,
        } => {
            let direction = match (*up_only, *down_only) {
                (true, _) => PropagationDirection::Up,
                (_, true) => PropagationDirection::Down,
                _ => PropagationDirection::Both,
            };
            cmd_propagate(&cli, &config, run, direction, export.as_deref())
        }
        Commands::FullTree {
            run,
            export,
            output_dir,
        } => cmd_full_tree(&cli, &config, run, export.as_deref(), output_dir),
        Commands::BuildTree {
            profile_id,
            name,
            haplogroup,
            max_up,
            max_down,
            export,
            refresh,
        } => {
            let request = TreeBuildRequest {
                start_id: parse_profile(profile_id)?,
                name: name.clone(),
                haplogroup: haplogroup.clone(),
                max_generations_up: max_up.unwrap_or(config.propagation.max_generations_up),
                max_generations_down: max_down.unwrap_or(config.propagation.max_generations_down),
            };
            cmd_build_tree(&cli, &config, &request, export.as_deref(), *refresh)
        }
        Commands::Import { csv_file } => cmd_import(&config, csv_file),
        Commands::Export { haplogroup, output } => cmd_export(&config, haplogroup, output),
        Commands::Stats => cmd_stats(&config),
    }
}

fn start_logging(cli: &Cli, config: &AppConfig) {
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| default_log_level().to_string());
    if let Err(err) = init_logging(&level, &config.logging.dir, true) {
        eprintln!("warning: logging disabled: {err}");
    }
}

fn open_store_connection(config: &AppConfig) -> Result<Connection> {
    open_db(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path.display()))
}

fn connect_remote(cli: &Cli, config: &AppConfig) -> Result<Remote> {
    if cli.offline {
        return Ok(Box::new(CacheOnly));
    }
    let client = GeniClient::new(config.geni_client_config()?)
        .context("failed to set up the Geni client")?;
    if !client.has_token() {
        bail!("no Geni access token; run `ydna auth` first");
    }
    Ok(Box::new(ThrottledGraph::new(client, config.retry_policy())))
}

fn parse_profile(raw: &str) -> Result<String> {
    normalize_profile_id(raw).with_context(|| format!("invalid profile reference `{raw}`"))
}

fn cmd_auth(config: &AppConfig, code: Option<&str>) -> Result<()> {
    let mut client = GeniClient::new(config.geni_client_config()?)
        .context("failed to set up the Geni client")?;
    match code {
        None => {
            let url = client
                .authorization_url()
                .context("geni.client_id is required for authorization")?;
            println!("Open this URL, approve access, then run `ydna auth --code <code>`:");
            println!("  {url}");
        }
        Some(code) => {
            client
                .exchange_code(code)
                .context("failed to exchange the authorization code")?;
            println!("Token saved to {}", config.geni.token_file.display());
        }
    }
    Ok(())
}

fn cmd_walk(cli: &Cli, config: &AppConfig, args: &WalkArgs, direction: Direction) -> Result<()> {
    let profile_id = parse_profile(&args.profile_id)?;
    let limit = args.generations.unwrap_or(match direction {
        Direction::Up => config.propagation.max_generations_up,
        Direction::Down => config.propagation.max_generations_down,
    });
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let mut traversal =
        TraversalService::new(store, connect_remote(cli, config)?).with_refresh(args.refresh);

    let report = traversal.traverse(&profile_id, direction, limit)?;
    print_traversal(traversal.store(), &report)?;

    if let Some(path) = &args.export {
        let visits = report
            .visits
            .iter()
            .map(|visit| (visit.profile_id.clone(), Some(visit.generation)));
        let rows = rows_for_profiles(traversal.store(), visits, None)?;
        write_rows_to_path(path, &rows)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Exported {} profiles to {}", rows.len(), path.display());
    }
    Ok(())
}

fn cmd_root(
    cli: &Cli,
    config: &AppConfig,
    raw_profile_id: &str,
    generations: Option<u32>,
    refresh: bool,
) -> Result<()> {
    let profile_id = parse_profile(raw_profile_id)?;
    let limit = generations.unwrap_or(config.propagation.max_generations_up);
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let mut traversal =
        TraversalService::new(store, connect_remote(cli, config)?).with_refresh(refresh);

    let root = locate_root(&mut traversal, &profile_id, limit)?;
    let name = profile_label(traversal.store(), &root.root_id)?;
    println!(
        "Root ancestor: {} ({}), {} generations up",
        name, root.root_id, root.generations_up
    );
    print_root_status(&root.status);
    println!("  remote calls: {}", root.remote_calls);
    Ok(())
}

fn print_root_status(status: &RootStatus) {
    match status {
        RootStatus::Found => {}
        RootStatus::Interrupted(err) => {
            println!("  note: root family unavailable ({err}); an older ancestor may exist")
        }
        RootStatus::DepthExceeded => {
            println!("  note: generation limit reached; this is the deepest profile found")
        }
        RootStatus::CycleDetected { revisited } => println!(
            "  note: paternal chain loops back to {revisited}; this is the last profile before the loop"
        ),
    }
}

fn build_request(
    config: &AppConfig,
    run: &RunArgs,
    direction: PropagationDirection,
) -> Result<PropagationRequest> {
    let seed_id = parse_profile(&run.profile_id)?;
    Ok(
        PropagationRequest::new(seed_id, run.haplogroup.as_str(), run.source.as_str(), direction)
            .with_limits(
                run.max_up.unwrap_or(config.propagation.max_generations_up),
                run.max_down
                    .unwrap_or(config.propagation.max_generations_down),
            ),
    )
}

fn cmd_propagate(
    cli: &Cli,
    config: &AppConfig,
    run: &RunArgs,
    direction: PropagationDirection,
    export: Option<&Path>,
) -> Result<()> {
    let request = build_request(config, run, direction)?;
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let traversal =
        TraversalService::new(store, connect_remote(cli, config)?).with_refresh(run.refresh);
    let mut service = PropagationService::new(traversal, config.conflict_policy());

    let report = service.propagate(&request)?;
    print_propagation(&report);

    if let Some(path) = export {
        let count = export_run(
            service.traversal().store(),
            &report.entries,
            &report.haplogroup,
            path,
        )?;
        println!("Exported {count} profiles to {}", path.display());
    }
    Ok(())
}

fn cmd_full_tree(
    cli: &Cli,
    config: &AppConfig,
    run: &RunArgs,
    export: Option<&Path>,
    output_dir: &Path,
) -> Result<()> {
    let request = build_request(config, run, PropagationDirection::Both)?;
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let traversal =
        TraversalService::new(store, connect_remote(cli, config)?).with_refresh(run.refresh);
    let mut service = PropagationService::new(traversal, config.conflict_policy());

    let report = service.full_tree(&request)?;
    let root = &report.root;
    let root_name = profile_label(service.traversal().store(), &root.root_id)?;
    println!(
        "Root ancestor: {} ({}), {} generations above the seed",
        root_name, root.root_id, root.generations_up
    );
    print_root_status(&root.status);
    print_propagation(&report.propagation);

    let path = match export {
        Some(path) => path.to_path_buf(),
        None => {
            let store = service.traversal().store();
            let root_profile = store
                .get_profile(&root.root_id)?
                .unwrap_or_else(|| Profile::new(root.root_id.as_str(), "", Gender::Unknown));
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
            output_dir.join(tree_file_name(&request.haplogroup, &root_profile, &timestamp))
        }
    };
    let count = export_run(
        service.traversal().store(),
        &report.propagation.entries,
        &report.propagation.haplogroup,
        &path,
    )?;
    println!("Exported {count} profiles to {}", path.display());
    Ok(())
}

fn cmd_profile(cli: &Cli, config: &AppConfig, raw_profile_id: &str, json: bool) -> Result<()> {
    let profile_id = parse_profile(raw_profile_id)?;
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let mut traversal = TraversalService::new(store, connect_remote(cli, config)?);

    let profile = traversal
        .ensure_profile(&profile_id)
        .with_context(|| format!("profile {profile_id} not found"))?;
    let assignments = traversal.store().get_assignments(&profile.id)?;

    if json {
        let value = serde_json::json!({
            "profile": profile,
            "assignments": assignments,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Profile: {}", profile.label());
    println!("  ID:     {}", profile.id);
    println!("  Gender: {}", profile.gender.as_str());
    if let Some(birth) = &profile.birth_date {
        println!("  Birth:  {birth}");
    }
    if let Some(death) = &profile.death_date {
        println!("  Death:  {death}");
    }
    for assignment in &assignments {
        println!(
            "  Haplogroup: {} ({}, {})",
            assignment.haplogroup,
            assignment.source,
            assignment.provenance.as_str()
        );
    }
    Ok(())
}

fn cmd_family(cli: &Cli, config: &AppConfig, raw_profile_id: &str) -> Result<()> {
    let profile_id = parse_profile(raw_profile_id)?;
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let mut traversal = TraversalService::new(store, connect_remote(cli, config)?);

    let listing = traversal
        .family_listing(&profile_id)
        .with_context(|| format!("failed to fetch the family of {profile_id}"))?;
    println!("Family of: {} ({})", listing.focus.label(), listing.focus.id);

    let parents: Vec<&Profile> = listing.father.iter().chain(&listing.mother).collect();
    print_relatives("Parents", &parents);
    let partners: Vec<&Profile> = listing.spouses.iter().collect();
    print_relatives("Partners", &partners);
    let children: Vec<&Profile> = listing.children.iter().collect();
    print_relatives("Children", &children);
    Ok(())
}

fn print_relatives(heading: &str, relatives: &[&Profile]) {
    if relatives.is_empty() {
        return;
    }
    println!("{heading}:");
    for relative in relatives {
        let marker = match relative.gender {
            Gender::Male => "(M)",
            Gender::Female => "(F)",
            Gender::Unknown => "(?)",
        };
        println!("  {marker} {} - {}", relative.label(), relative.id);
    }
}

fn cmd_build_tree(
    cli: &Cli,
    config: &AppConfig,
    request: &TreeBuildRequest,
    export: Option<&Path>,
    refresh: bool,
) -> Result<()> {
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let mut traversal =
        TraversalService::new(store, connect_remote(cli, config)?).with_refresh(refresh);

    let report = build_paternal_tree(&mut traversal, request)?;
    let tree = &report.tree;
    println!("Tree built: {} [tree {}]", tree.name, tree.tree_id);
    println!(
        "  Root:        {} ({})",
        profile_label(traversal.store(), &tree.root_profile_id)?,
        tree.root_profile_id
    );
    print_root_status(&report.root.status);
    println!("  Ancestors:   {}", report.root.generations_up);
    println!("  Descendants: {}", report.descendant_count());
    if let Some(haplogroup) = &tree.haplogroup {
        println!("  Haplogroup:  {haplogroup}");
    }
    println!(
        "  remote calls: {}",
        report.root.remote_calls + report.descendants.remote_calls
    );

    if let Some(path) = export {
        let visits = report
            .descendants
            .visits
            .iter()
            .map(|visit| (visit.profile_id.clone(), Some(visit.generation)));
        let rows = rows_for_profiles(traversal.store(), visits, tree.haplogroup.as_deref())?;
        write_rows_to_path(path, &rows)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Exported {} profiles to {}", rows.len(), path.display());
    }
    Ok(())
}

fn cmd_import(config: &AppConfig, csv_file: &Path) -> Result<()> {
    let file = File::open(csv_file)
        .with_context(|| format!("failed to open {}", csv_file.display()))?;
    let batch = read_assignment_rows(file)
        .with_context(|| format!("failed to read {}", csv_file.display()))?;
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;

    let summary = import_assignments(&store, &batch)?;
    println!("Imported {} haplogroup assignments", summary.imported);
    if !summary.skipped_lines.is_empty() {
        let lines: Vec<String> = summary
            .skipped_lines
            .iter()
            .map(|line| line.to_string())
            .collect();
        println!("Skipped lines: {}", lines.join(", "));
    }
    Ok(())
}

fn cmd_export(config: &AppConfig, haplogroup: &str, output: &Path) -> Result<()> {
    if haplogroup.trim().is_empty() {
        bail!("haplogroup must not be empty");
    }
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let records = store.assignments_by_haplogroup(haplogroup)?;
    let rows = rows_from_records(&records);
    write_rows_to_path(output, &rows)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Exported {} assignments matching {} to {}",
        rows.len(),
        haplogroup.trim(),
        output.display()
    );
    Ok(())
}

fn cmd_stats(config: &AppConfig) -> Result<()> {
    let conn = open_store_connection(config)?;
    let store = SqliteStore::try_new(&conn)?;
    let stats = store.statistics()?;
    println!("Database statistics ({}):", config.database.path.display());
    println!("  Profiles:                 {}", stats.profiles);
    println!("  Male profiles:            {}", stats.male_profiles);
    println!("  Paternal links:           {}", stats.paternal_links);
    println!("  Unions:                   {}", stats.unions);
    println!("  Fetched families:         {}", stats.fetched_families);
    println!("  Assignments:              {}", stats.assignments);
    println!("  Tested assignments:       {}", stats.tested_assignments);
    println!("  Profiles with haplogroup: {}", stats.profiles_with_haplogroup);
    println!("  Distinct haplogroups:     {}", stats.distinct_haplogroups);
    println!("  Paternal trees:           {}", stats.paternal_trees);
    Ok(())
}

fn export_run<S: LocalStore>(
    store: &S,
    entries: &[PropagationEntry],
    haplogroup: &str,
    path: &Path,
) -> Result<usize> {
    let visits = entries
        .iter()
        .map(|entry| (entry.profile_id.clone(), Some(entry.generation)));
    let rows = rows_for_profiles(store, visits, Some(haplogroup))?;
    write_rows_to_path(path, &rows)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(
        "event=run_export module=cli status=ok rows={} path={}",
        rows.len(),
        path.display()
    );
    Ok(rows.len())
}

fn profile_label<S: LocalStore>(store: &S, profile_id: &str) -> Result<String> {
    Ok(store
        .get_profile(profile_id)?
        .map(|profile| profile.label())
        .unwrap_or_else(|| "Unknown".to_string()))
}

fn print_traversal<S: LocalStore>(store: &S, report: &TraversalReport) -> Result<()> {
    let heading = match report.direction {
        Direction::Up => "Paternal ancestors",
        Direction::Down => "Male-line descendants",
    };
    println!("{heading} of {}:", report.start_id);
    for visit in &report.visits {
        let indent = "  ".repeat(visit.generation as usize + 1);
        println!(
            "{indent}[{}] {} ({})",
            visit.generation,
            profile_label(store, &visit.profile_id)?,
            visit.profile_id
        );
    }
    println!(
        "{} profiles, {} remote calls",
        report.visits.len(),
        report.remote_calls
    );
    for skipped in &report.skipped {
        match &skipped.reason {
            SkipReason::Remote(err) => println!("  skipped {}: {err}", skipped.profile_id),
            SkipReason::Cycle { revisited } => {
                println!("  skipped {}: cycle back to {revisited}", skipped.profile_id)
            }
        }
    }
    for rejected in &report.rejected_links {
        warn!(
            "event=walk module=cli status=rejected_link father_id={} son_id={}",
            rejected.father_id, rejected.son_id
        );
    }
    if !report.depth_limited.is_empty() {
        println!(
            "  generation limit reached at {} profiles",
            report.depth_limited.len()
        );
    }
    Ok(())
}

fn print_propagation(report: &PropagationReport) {
    println!(
        "Propagated {} ({}) from {} [run {}]",
        report.haplogroup, report.source, report.seed_id, report.run_id
    );
    println!("  assigned:           {}", report.count("assigned"));
    println!("  already consistent: {}", report.count("already_consistent"));
    println!("  conflict recorded:  {}", report.count("conflict_recorded"));
    println!("  conflict skipped:   {}", report.count("conflict_skipped"));
    println!("  females excluded:   {}", report.excluded_female.len());
    println!("  skipped branches:   {}", report.skipped.len());
    println!("  rejected links:     {}", report.rejected_links.len());
    println!("  remote calls:       {}", report.remote_calls);
    for skipped in &report.skipped {
        println!("    skipped {}: {}", skipped.profile_id, skipped.reason);
    }
    if !report.depth_limited.is_empty() {
        println!(
            "  generation limit reached at {} profiles",
            report.depth_limited.len()
        );
    }
}
