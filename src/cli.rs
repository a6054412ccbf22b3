use std::path::PathBuf;

use anyhow::Context;
use structopt::{clap::AppSettings::*, StructOpt};

use crate::archive::ArchiveIndex;
use crate::cache::TarballCache;
use crate::collaborators::{OfflineOnly, VersionComparatorOffline};
use crate::config::CoreConfig;
use crate::control::parse_stanzas;
use crate::identity::{Identity, Name};
use crate::pool::ArtifactPool;
use crate::reports::{self, render_build_all_summary_text};
use crate::sync::UpstreamDeclaration;
use crate::target::{self, detect_shell_expansion};
use crate::version::{parse_dependency_field, Constraint};

#[derive(StructOpt, Debug)]
#[structopt(setting(ColorAuto), setting(ColoredHelp))]
pub struct TargetSelectOptions {
    /// Target expressions to resolve (see the target grammar in the README).
    pub targets: Vec<String>,
    /// Permit more than one match in an EXACT tier instead of erroring.
    #[structopt(long)]
    pub allow_ambiguous: bool,
}

#[derive(StructOpt, Debug)]
#[structopt(setting(ColorAuto), setting(ColoredHelp))]
pub enum Command {
    /// Resolve target expressions to canonical identities (C3).
    Resolve {
        #[structopt(flatten)]
        targets: TargetSelectOptions,
    },
    /// Build and print the dependency graph (C4).
    Graph {
        #[structopt(flatten)]
        targets: TargetSelectOptions,
        /// Emit a Graphviz `.dot` rendering instead of a wave listing.
        #[structopt(long)]
        dot_graph: bool,
    },
    /// Compute the build manifest for a series (C5, C6).
    Plan {
        /// Target series identifier.
        series: String,
        #[structopt(flatten)]
        targets: TargetSelectOptions,
        /// Series has reached final release.
        #[structopt(long)]
        post_final: bool,
    },
    /// Evaluate dependency satisfaction for a manifest (C7).
    Satisfy {
        #[structopt(flatten)]
        targets: TargetSelectOptions,
    },
    /// Run the version-sync engine (C8).
    Sync {
        #[structopt(flatten)]
        targets: TargetSelectOptions,
    },
    /// Run the single-package build pipeline for one package (C9).
    BuildOne {
        /// Source package name.
        package: String,
        /// Succeed only if the packaging repository already exists locally.
        #[structopt(long)]
        offline: bool,
    },
    /// Run the batch orchestrator across a whole manifest (C10).
    BuildAll {
        /// Target series identifier.
        series: String,
        #[structopt(flatten)]
        targets: TargetSelectOptions,
        /// Number of concurrent workers; 1 means sequential mode.
        #[structopt(short, long)]
        parallel: Option<usize>,
        /// Continue dispatching after a package fails.
        #[structopt(long)]
        keep_going: bool,
        /// Stop dispatching once this many failures have occurred (0 = unbounded).
        #[structopt(long, default_value = "0")]
        max_failures: u32,
    },
    /// Emit machine- and human-readable reports for the most recent run (C11).
    Report {
        /// Path to a persisted RunState JSON document.
        run_state_path: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(name = "packastack", about = "Batch build planner and executor for a co-versioned source package series")]
#[structopt(setting(ColorAuto), setting(ColoredHelp))]
pub struct Opt {
    /// The path to the workspace (registry entries, local packaging repos, archive index cache).
    #[structopt(short, long, parse(from_os_str), default_value = "./")]
    pub workspace: PathBuf,
    /// Path to an optional TOML configuration file (spec §6 configuration).
    #[structopt(long, parse(from_os_str))]
    pub config: Option<PathBuf>,
    /// Specify the log level(s).
    #[structopt(short, long, default_value = "warn")]
    pub log: String,

    #[structopt(subcommand)]
    pub cmd: Command,
}

/// A config path is workspace-relative unless it's already absolute.
fn resolve_relative(workspace: &std::path::Path, path: &std::path::Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { workspace.join(path) }
}

fn resolve_targets<'a>(
    universe: &'a [Identity],
    opts: &TargetSelectOptions,
) -> Result<Vec<&'a Identity>, anyhow::Error> {
    if let Some(warning) = detect_shell_expansion(&opts.targets) {
        log::warn!("{warning}");
    }

    let mut all_matches = Vec::new();
    for raw in &opts.targets {
        let expr = target::parse_target(raw).map_err(anyhow::Error::msg)?;
        let (_tier, hits) = target::resolve(universe, &expr, opts.allow_ambiguous)
            .with_context(|| format!("resolving target expression {raw:?}"))?;
        all_matches.extend(hits);
    }
    Ok(all_matches)
}

/// Assembles the target-resolution universe from `<workspace>/registry.toml`
/// and any packaging repositories already cached under
/// `<workspace>/repo-cache` (spec §4.3 "Universe").
fn load_universe(workspace: &std::path::Path) -> Result<Vec<Identity>, anyhow::Error> {
    let registry_entries = crate::registry::load_registry_file(&workspace.join("registry.toml"))
        .map_err(|e| anyhow::anyhow!(e))?;
    let local_entries = crate::registry::local_repo_identities(&workspace.join("repo-cache"));
    Ok(crate::registry::assemble_universe(registry_entries, local_entries, Vec::new()))
}

/// Read `<workspace>/repo-cache/<source_package>/debian/control` and return
/// the source stanza's combined `Build-Depends`/`Build-Depends-Indep` as
/// parsed constraints (spec §4.7 input), mirroring the same field extraction
/// `DependencyGraph::from_control` uses. Missing control files resolve to no
/// declared dependencies rather than an error, since a package new to the
/// workspace legitimately has none cached yet.
fn load_existing_dependencies(workspace: &std::path::Path, source_package: &Name) -> Vec<Constraint> {
    let control_path = workspace.join("repo-cache").join(source_package.as_str()).join("debian").join("control");
    let Ok(text) = std::fs::read_to_string(&control_path) else { return Vec::new() };
    let stanzas = parse_stanzas(&text);
    let Some(first) = stanzas.first() else { return Vec::new() };

    let mut deps_text = String::new();
    if let Some(bd) = first.get("Build-Depends") {
        deps_text.push_str(bd);
        deps_text.push(',');
    }
    if let Some(bdi) = first.get("Build-Depends-Indep") {
        deps_text.push_str(bdi);
    }
    parse_dependency_field(&deps_text)
}

/// Read `<workspace>/repo-cache/<source_package>/requirements.txt` (the
/// upstream project's own dependency manifest, spec §4.8 input) and parse it
/// into upstream declarations. Absent the file, there is nothing to sync.
fn load_upstream_declarations(workspace: &std::path::Path, source_package: &Name) -> Vec<UpstreamDeclaration> {
    let reqs_path = workspace.join("repo-cache").join(source_package.as_str()).join("requirements.txt");
    match std::fs::read_to_string(&reqs_path) {
        Ok(text) => crate::sync::parse_requirements_txt(&text),
        Err(_) => Vec::new(),
    }
}

/// Load the dev/prior-LTS/cloud-archive package-list indices (spec §4.7
/// input) from plain decompressed text files under
/// `<workspace>/archive-index/{dev,prev_lts,cloud_archive}.packages`, when
/// present. Any index the workspace hasn't populated resolves to `None`
/// rather than an error.
fn load_archive_indices(
    workspace: &std::path::Path,
    comparator: &dyn crate::version::VersionComparator,
) -> (Option<ArchiveIndex>, Option<ArchiveIndex>, Option<ArchiveIndex>) {
    let load_one = |file_name: &str| -> Option<ArchiveIndex> {
        let text = std::fs::read_to_string(workspace.join("archive-index").join(file_name)).ok()?;
        let mut index = ArchiveIndex::new();
        index.load_text(&text, comparator);
        Some(index)
    };
    (load_one("dev.packages"), load_one("prev_lts.packages"), load_one("cloud_archive.packages"))
}

pub fn run(args: Opt) -> Result<(), anyhow::Error> {
    let _logger_handle = crate::logging::init(&args.log).map_err(|e| anyhow::anyhow!(e))?;

    let config = match &args.config {
        Some(path) => CoreConfig::load_from_file(path).map_err(|e| anyhow::anyhow!(e))?,
        None => CoreConfig::default(),
    };

    let universe = load_universe(&args.workspace)?;

    match args.cmd {
        Command::Resolve { targets } => {
            let matches = resolve_targets(&universe, &targets)?;
            for identity in matches {
                println!("{}  ({:?}, {:?})", identity.source_package, identity.kind, identity.origin);
            }
            Ok(())
        },
        Command::Graph { targets, dot_graph } => {
            let matches = resolve_targets(&universe, &targets)?;
            let sources: std::collections::HashMap<Name, String> =
                matches.iter().map(|i| (i.source_package.clone(), String::new())).collect();
            let graph = crate::graph::DependencyGraph::from_control(&sources, &crate::graph::soft_dependency_exclusions());
            if dot_graph {
                println!("digraph packastack {{");
                for name in graph.names() {
                    println!("  \"{name}\";");
                }
                println!("}}");
            } else {
                let waves = graph.compute_waves_with_cycles();
                let mut entries: Vec<_> = waves.into_iter().collect();
                entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
                for (name, wave) in entries {
                    println!("wave {wave}: {name}");
                }
            }
            Ok(())
        },
        Command::Plan { series, targets, post_final } => {
            let matches = resolve_targets(&universe, &targets)?;
            let metadata = crate::types::InMemoryReleaseMetadata::default();
            let graph = crate::graph::DependencyGraph::new();

            let mut type_selections = std::collections::HashMap::new();
            let mut inputs = Vec::new();
            for identity in &matches {
                let selection = crate::types::select_build_type(
                    &identity.canonical_upstream,
                    &series,
                    post_final,
                    &metadata,
                    None,
                );
                type_selections.insert(identity.source_package.clone(), selection);
                inputs.push(crate::manifest::PackageInput {
                    source_package: identity.source_package.clone(),
                    deliverable: identity.deliverable_name.clone().unwrap_or_else(|| identity.source_package.clone()),
                    existing_revision: None,
                    existing_epoch: 0,
                    vcs_head_short_sha: None,
                    vcs_head_date_yyyymmdd: None,
                    snapshot_base: "0.0.0".to_string(),
                });
            }

            let cycle_stage =
                if post_final { crate::manifest::CycleStage::PostFinal } else { crate::manifest::CycleStage::PreFinal };
            let manifest =
                crate::manifest::build_manifest(&series, cycle_stage, &inputs, &type_selections, &graph, &metadata);
            println!("{}", reports::to_sorted_pretty_json(&manifest)?);
            Ok(())
        },
        Command::Satisfy { targets } => {
            let matches = resolve_targets(&universe, &targets)?;
            let comparator = VersionComparatorOffline::new();
            let (dev, prev_lts, cloud_archive) = load_archive_indices(&args.workspace, &comparator);

            let mut per_package: std::collections::BTreeMap<Name, Vec<crate::satisfaction::ConstraintResult>> =
                std::collections::BTreeMap::new();
            for identity in &matches {
                let existing = load_existing_dependencies(&args.workspace, &identity.source_package);
                let results: Vec<_> = existing
                    .iter()
                    .map(|c| {
                        crate::satisfaction::evaluate_constraint(
                            &comparator,
                            c,
                            dev.as_ref(),
                            prev_lts.as_ref(),
                            cloud_archive.as_ref(),
                        )
                    })
                    .collect();
                per_package.insert(identity.source_package.clone(), results);
            }

            let all_results: Vec<_> = per_package.values().flatten().cloned().collect();
            let summary = crate::satisfaction::summarize(&all_results);
            let dependency_summary = reports::plan_dependency_summary(&per_package);
            println!("{}", reports::to_sorted_pretty_json(&serde_json::json!({
                "summary": summary,
                "per_package": dependency_summary,
            }))?);
            Ok(())
        },
        Command::Sync { targets } => {
            let matches = resolve_targets(&universe, &targets)?;
            let comparator = VersionComparatorOffline::new();
            let (dev, prev_lts, _cloud_archive) = load_archive_indices(&args.workspace, &comparator);
            let mapper = IdentityNameMapper;

            let mut per_package: std::collections::BTreeMap<Name, crate::sync::SyncResult> =
                std::collections::BTreeMap::new();
            for identity in &matches {
                let existing = load_existing_dependencies(&args.workspace, &identity.source_package);
                let declarations = load_upstream_declarations(&args.workspace, &identity.source_package);
                let result = crate::sync::synchronize(
                    &declarations,
                    &existing,
                    &mapper,
                    None,
                    prev_lts.as_ref(),
                    dev.as_ref(),
                );
                per_package.insert(identity.source_package.clone(), result);
            }

            println!("{}", reports::to_sorted_pretty_json(&per_package)?);
            Ok(())
        },
        Command::BuildOne { package, offline } => {
            let pool_root = resolve_relative(&args.workspace, &config.pool_mount_path);
            let pool = ArtifactPool::new(pool_root)?;
            let comparator = VersionComparatorOffline::new();
            let mapper = IdentityNameMapper;
            let tarball_cache = TarballCache::new(
                args.workspace.join("tarball-cache"),
                std::time::Duration::from_secs(config.tarball_cache_max_age_days as u64 * 86_400),
            )?;
            let pipeline = crate::pipeline::BuildPipeline {
                comparator: &comparator,
                tarball_fetcher: &OfflineOnly,
                tarball_cache: &tarball_cache,
                name_mapper: &mapper,
                patch_applier: &OfflineOnly,
                source_builder: &OfflineOnly,
                in_chroot_builder: &OfflineOnly,
                indexer: &OfflineOnly,
                pool: &pool,
            };
            let package_name = Name::new(&package);
            let (dev_index, prev_lts_index, cloud_archive_index) = load_archive_indices(&args.workspace, &comparator);
            let inputs = crate::pipeline::PipelineInputs {
                source_package: package.clone(),
                deliverable: package.clone(),
                repo_cache_root: args.workspace.join("repo-cache"),
                run_dir: args.workspace.join("run-logs"),
                log_spec: args.log.clone(),
                offline,
                existing_dependencies: load_existing_dependencies(&args.workspace, &package_name),
                upstream_declarations: load_upstream_declarations(&args.workspace, &package_name),
                policy: crate::satisfaction::MinVersionPolicy::Warn,
                dev_index: dev_index.as_ref(),
                prev_lts_index: prev_lts_index.as_ref(),
                cloud_archive_index: cloud_archive_index.as_ref(),
                series: "unknown".to_string(),
                snapshot_base: "0.0.0".to_string(),
            };
            let outcome = pipeline.run(&inputs);
            println!("{}", reports::to_sorted_pretty_json(&outcome)?);
            if !outcome.is_success() {
                anyhow::bail!("build failed for {package}");
            }
            Ok(())
        },
        Command::BuildAll { series, targets, parallel, keep_going, max_failures } => {
            let matches = resolve_targets(&universe, &targets)?;
            let config = config.with_overrides(parallel, None);
            let build_order: Vec<Name> = matches.iter().map(|i| i.source_package.clone()).collect();
            let run_state_path = args.workspace.join("run-state.json");
            let mut run_state = crate::orchestrator::RunState::new(
                &targets.targets.join(","),
                "master",
                &series,
                "release",
                build_order,
                config.parallel_workers,
                crate::orchestrator::FailurePolicy { keep_going, max_failures },
            );
            let graph = crate::graph::DependencyGraph::new();
            let orchestrator = crate::orchestrator::Orchestrator::new(run_state_path);
            let worker = |_name: &Name| crate::orchestrator::PackageOutcome {
                success: false,
                failure_kind: Some(crate::error::FailureKind::ToolMissing),
                message: Some("no in-chroot builder configured".to_string()),
            };
            if config.parallel_workers <= 1 {
                orchestrator.run_sequential(&mut run_state, &graph, &worker);
            } else {
                orchestrator.run_wave_parallel(&mut run_state, &graph, &worker);
            }
            let summary = reports::summarize_run(&run_state, 10);
            print!("{}", render_build_all_summary_text(&summary));

            let worst = run_state.packages.values().fold(None, |acc, state| crate::error::worst_of(acc, state.failure_kind));
            if let Some(kind) = worst {
                return Err(anyhow::Error::from(crate::error::CoreError::new(
                    kind,
                    format!("batch run finished with failures (worst: {kind})"),
                )));
            }
            Ok(())
        },
        Command::Report { run_state_path } => {
            let run_state = crate::orchestrator::RunState::load(&run_state_path)?;
            let summary = reports::summarize_run(&run_state, 10);
            println!("{}", reports::to_sorted_pretty_json(&summary)?);
            print!("{}", render_build_all_summary_text(&summary));
            Ok(())
        },
    }
}

struct IdentityNameMapper;
impl crate::sync::NameMapper for IdentityNameMapper {
    fn native_name(&self, upstream_project: &str) -> Name {
        Name::new(upstream_project)
    }
}
