//! lbvh CLI - build, inspect and compare two-level scene BVHs.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lbvh_scene::bvh::{first_difference, BvhBuilder, CpuBuilder, RadixMirror};
use lbvh_scene::config::{BackendKind, BuildConfig};
use lbvh_scene::scene::{build_triangle_and_mesh_bvh, demo_scene, MeshDesc, SceneBvh, SceneContext, SceneFile};

/// Two-level LBVH builder for path tracing scenes.
#[derive(Parser, Debug)]
#[command(
    name = "lbvh",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("LBVH_BUILD_DATE"), ")"),
    about = "Build and inspect two-level linear BVHs",
    long_about = None
)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true, env = "LBVH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured backend
    #[arg(short, long, global = true)]
    backend: Option<BackendArg>,

    /// Use the rayon pool for the CPU backend
    #[arg(short, long, global = true)]
    parallel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a scene file and print statistics.
    Build {
        /// Scene JSON file.
        scene: PathBuf,

        /// Print the mesh BVH and every triangle BVH.
        #[arg(short, long)]
        dump: bool,
    },

    /// Build a procedural scene.
    Demo {
        /// Number of meshes.
        #[arg(short, long, default_value_t = 16)]
        meshes: usize,

        /// Print the mesh BVH.
        #[arg(short, long)]
        dump: bool,

        /// Also write the scene as JSON.
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Build with both backends and check the trees match.
    Compare {
        /// Scene JSON file (procedural scene when omitted).
        scene: Option<PathBuf>,

        /// Meshes in the procedural scene.
        #[arg(short, long, default_value_t = 16)]
        meshes: usize,
    },

    /// Show the effective configuration.
    Config {
        /// Write it to the config path.
        #[arg(long)]
        save: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Cpu,
    GpuMirror,
}

impl From<BackendArg> for BackendKind {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Cpu => BackendKind::Cpu,
            BackendArg::GpuMirror => BackendKind::GpuMirror,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = load_config(&cli)?;
    tracing::debug!(?config, "effective config");

    match cli.command {
        Commands::Build { ref scene, dump } => {
            let meshes = load_scene(scene)?;
            run_build(config, meshes, dump)
        }
        Commands::Demo { meshes, dump, ref save } => {
            let meshes = demo_scene(meshes);
            if let Some(path) = save {
                SceneFile::from_meshes(&meshes)
                    .save(path)
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::info!(path = %path.display(), "scene saved");
            }
            run_build(config, meshes, dump)
        }
        Commands::Compare { ref scene, meshes } => {
            let meshes = match scene {
                Some(path) => load_scene(path)?,
                None => demo_scene(meshes),
            };
            run_compare(&config, &meshes)
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = match cli.config.clone().or_else(BuildConfig::default_path) {
                    Some(p) => p,
                    None => bail!("no config directory on this platform"),
                };
                config.save(&path)?;
                println!("saved to {}", path.display());
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Some("error"),
        (false, 0) => None,
        (false, 1) => Some("debug"),
        (false, _) => Some("trace"),
    };
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn load_config(cli: &Cli) -> Result<BuildConfig> {
    let mut config = match &cli.config {
        Some(path) => BuildConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => BuildConfig::load_or_default()?,
    };
    if let Some(b) = cli.backend {
        config.backend = b.into();
    }
    if cli.parallel {
        config.parallel = true;
    }
    Ok(config)
}

fn load_scene(path: &Path) -> Result<Vec<MeshDesc>> {
    let file = SceneFile::load(path).with_context(|| format!("loading scene {}", path.display()))?;
    Ok(file.into_meshes())
}

fn run_build(config: BuildConfig, meshes: Vec<MeshDesc>, dump: bool) -> Result<()> {
    let mut ctx = SceneContext::new(config)?;
    for mesh in meshes {
        ctx.register_mesh(mesh)?;
    }
    let backend = ctx.backend().name();
    let start = std::time::Instant::now();
    let bvh = ctx.build()?;
    let elapsed = start.elapsed();
    print_stats(bvh);
    println!("  build time:          {elapsed:.2?} ({backend})");

    let report = bvh.validate()?;
    println!(
        "  validated:           {} triangle trees, mesh tree height {}",
        report.triangle_trees.len(),
        report.mesh_tree.height
    );

    if dump {
        let mut out = String::new();
        bvh.dump_mesh_bvh(&mut out)?;
        for (i, mesh) in bvh.meshes.iter().enumerate() {
            writeln!(out, "-- mesh {i} '{}'", mesh.name)?;
            bvh.dump_triangle_bvh(i, &mut out)?;
        }
        print!("{out}");
    }
    Ok(())
}

fn print_stats(bvh: &SceneBvh) {
    let u = bvh.uniform();
    println!("Scene BVH:");
    println!("  meshes:              {}", u.mesh_count);
    println!("  triangles:           {}", u.triangle_count);
    println!("  triangle BVH nodes:  {}", u.triangle_bvh_count);
    println!("  mesh BVH nodes:      {}", u.mesh_bvh_count);
    println!("  mesh BVH root:       {}", u.mesh_bvh_root_index);
    println!("  max triangle height: {}", bvh.stats.max_triangle_bvh_height);
    println!("  mesh BVH height:     {}", bvh.stats.mesh_bvh_height);
    if let Some(root) = bvh.mesh_bvh.get(bvh.mesh_bvh_root as usize) {
        println!("  scene bounds:        {}", root.aabb);
    }
}

fn run_compare(config: &BuildConfig, meshes: &[MeshDesc]) -> Result<()> {
    let cpu = build_triangle_and_mesh_bvh(meshes, &CpuBuilder { parallel: config.parallel }, &config.limits)?;
    let gpu = build_triangle_and_mesh_bvh(meshes, &RadixMirror::from_config(config), &config.limits)?;

    let eps = 1e-5;
    let mut mismatches = 0;
    if let Some(diff) = first_difference(&cpu.triangle_bvh, &gpu.triangle_bvh, eps) {
        println!("triangle BVH differs: {diff}");
        mismatches += 1;
    }
    if let Some(diff) = first_difference(&cpu.mesh_bvh, &gpu.mesh_bvh, eps) {
        println!("mesh BVH differs: {diff}");
        mismatches += 1;
    }
    if cpu.triangles != gpu.triangles {
        println!("triangle order differs");
        mismatches += 1;
    }
    if cpu.mesh_bvh_root != gpu.mesh_bvh_root {
        println!("mesh BVH root {} vs {}", cpu.mesh_bvh_root, gpu.mesh_bvh_root);
        mismatches += 1;
    }

    if mismatches > 0 {
        bail!("backends disagree ({mismatches} mismatches)");
    }
    println!(
        "cpu and gpu-mirror agree: {} triangle BVH nodes, {} mesh BVH nodes",
        cpu.triangle_bvh.len(),
        cpu.mesh_bvh.len()
    );
    Ok(())
}
