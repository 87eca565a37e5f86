//! dmml CLI tool
//!
//! Command-line inspector for serialized DMML scenes.
//!
//! ## Commands
//!
//! - `tree <scene>`: Print the hierarchy trees of a scene
//! - `refs <scene>`: List every reference and whether it resolves
//! - `import <target> <source>`: Import one scene into another, remapping colliding IDs
//! - `check <scene>`: Report dangling references and parent cycles
//!
//! Scene behavior (dangling reference policy, import pruning) is read from the TOML file given
//! with `--config`.

use clap::{Parser, Subcommand};
use dmml_core::{
    codec::SceneDocument,
    config::SceneConfig,
    node::{Hierarchical, Node},
    role::ReferenceRole,
    scene::{ChildrenIndex, ReferenceGraph, Scene},
    DmmlError,
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(name = "dmml")]
#[command(author, version, about = "A tool for inspecting DMML scene files", long_about = None)]
struct Cli {
    /// Scene configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hierarchy trees of a scene
    Tree {
        /// Path to the scene file
        path: PathBuf,

        /// Also print the node each hierarchy node is associated with
        #[arg(short, long)]
        associated: bool,
    },

    /// List the references of every node, or of one node
    Refs {
        /// Path to the scene file
        path: PathBuf,

        /// Only list the references of this node and the nodes it reaches
        #[arg(long)]
        node: Option<String>,
    },

    /// Import a scene into another one and print the merged scene
    Import {
        /// Scene receiving the nodes
        target: PathBuf,

        /// Scene whose nodes are imported
        source: PathBuf,

        /// Write the merged scene here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a scene for dangling references and parent cycles
    Check {
        /// Path to the scene file
        path: PathBuf,
    },
}

fn load_scene(config: &SceneConfig, path: &Path) -> Result<Scene, DmmlError> {
    tracing::debug!("Loading scene {path:?}");
    let src = std::fs::read_to_string(path)?;
    let mut scene = Scene::new(config.clone());
    scene.load(&src)?;
    Ok(scene)
}

fn print_subtree(scene: &Scene, id: &str, depth: usize, associated: bool) {
    let Some(node) = scene.node(id) else {
        return;
    };
    let mut line = format!("{}{} ({})", "  ".repeat(depth), node.name(), node.id());
    if associated {
        if let Some(target) = node.associated_node_id() {
            line.push_str(&format!(" -> {target}"));
        }
    }
    println!("{line}");
    for child in scene.children_ids(id) {
        print_subtree(scene, child.as_str(), depth + 1, associated);
    }
}

fn print_references(scene: &Scene, id: &str) {
    let Some(node) = scene.node(id) else {
        return;
    };
    println!("{} [{}]", node.id(), node.class_name());
    for (index, reference) in node.references().iter() {
        let Some(target) = reference.target() else {
            continue;
        };
        let state = if scene.contains(target.as_str()) {
            "resolved"
        } else {
            "unresolved"
        };
        println!("  {}[{index}] -> {target} ({state})", reference.role());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SceneConfig::from_path(path)?,
        None => SceneConfig::default(),
    };

    match cli.command {
        Commands::Tree { path, associated } => {
            let scene = load_scene(&config, &path)?;
            let roots: Vec<String> = scene
                .nodes()
                .filter(|n| n.kind().is_hierarchy() && scene.parent_node(n.id().as_str()).is_none())
                .map(|n| n.id().to_string())
                .collect();
            for root in roots {
                print_subtree(&scene, &root, 0, associated);
            }
            Ok(())
        }

        Commands::Refs { path, node } => {
            let scene = load_scene(&config, &path)?;
            let ids: Vec<String> = match node {
                Some(id) => {
                    if !scene.contains(&id) {
                        eprintln!("Error: node {id} is not in {path:?}");
                        std::process::exit(1);
                    }
                    scene
                        .referenced_nodes(&id)
                        .iter()
                        .map(ToString::to_string)
                        .collect()
                }
                None => scene.nodes().map(|n| n.id().to_string()).collect(),
            };
            for id in ids {
                print_references(&scene, &id);
            }
            Ok(())
        }

        Commands::Import {
            target,
            source,
            output,
        } => {
            let mut scene = load_scene(&config, &target)?;
            let src = std::fs::read_to_string(&source)?;
            let imported = scene.import(&src)?;
            tracing::info!("Imported {} nodes from {source:?}", imported.len());
            let merged = scene.serialize()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, merged)?;
                    println!("Merged scene written to {}", path.display());
                }
                None => print!("{merged}"),
            }
            Ok(())
        }

        Commands::Check { path } => {
            // Loading drops dangling references, so look for them in the document itself
            let document = SceneDocument::parse(&std::fs::read_to_string(&path)?)?;
            let nodes: Vec<Node> = document
                .nodes
                .iter()
                .filter_map(|record| record.to_node().transpose())
                .collect::<Result<_, _>>()?;
            let known: BTreeSet<&str> = nodes.iter().map(|n| n.id().as_str()).collect();
            let mut problems = 0;
            for node in nodes.iter() {
                for (index, reference) in node.references().iter() {
                    let Some(target) = reference.target() else {
                        continue;
                    };
                    if !known.contains(target.as_str()) {
                        println!(
                            "dangling: {} {}[{index}] -> {target}",
                            node.id(),
                            reference.role()
                        );
                        problems += 1;
                    }
                }
            }

            let scene = load_scene(&config, &path)?;
            let parents =
                ReferenceGraph::from_scene_filtered(&scene, |role| *role == ReferenceRole::Parent);
            if parents.has_cycle() {
                println!("cycle: the parent links of {path:?} form a cycle");
                problems += 1;
            }

            println!("\n=== Check Results ===");
            println!("Nodes: {}", scene.number_of_nodes());
            println!("Problems: {problems}");
            if problems > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
