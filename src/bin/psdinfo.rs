//! psdinfo - inspect and re-save PSD files
//!
//! Prints the layer tree of a document, or loads and writes it back out
//! (useful for checking that a file survives a round trip).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde_json::json;

use psdcodec::groups::{self, GroupRole};
use psdcodec::psd::{Document, ImageResource, ImageResourceId, Layer};
use psdcodec::{CodecConfig, PsdError};

#[derive(Parser, Debug)]
#[command(name = "psdinfo")]
#[command(author, version, about = "Inspect and re-save Photoshop documents", long_about = None)]
#[command(after_help = "\
EXAMPLES:
    psdinfo info art.psd                  Print the layer tree
    psdinfo info art.psd --json           Machine-readable summary
    psdinfo resave art.psd copy.psd       Load and write back
    psdinfo --config codec.json info a.psd

Set RUST_LOG=psdcodec=debug for per-section parse logs.")]
struct Args {
    /// JSON file with `load` and `save` option sets
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print header, resources and the layer tree
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a document and save it to a new path
    Resave {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    psdcodec::init_logging();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), PsdError> {
    let config = match &args.config {
        Some(path) => CodecConfig::from_json_file(path)?,
        None => CodecConfig::default(),
    };

    match args.command {
        Command::Info { file, json } => {
            let doc = Document::open(&file, &config.load)?;
            if json {
                print_json(&file, &doc)?;
            } else {
                print_tree(&file, &doc)?;
            }
        }
        Command::Resave { input, output } => {
            let start = Instant::now();
            let mut doc = Document::open(&input, &config.load)?;
            doc.save_to_path(&output, &config.save)?;
            println!(
                "{} -> {} ({} layers, {:.1}ms)",
                input.display(),
                output.display(),
                doc.layers().len(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    Ok(())
}

fn role_label(layer: &Layer) -> &'static str {
    match layer.group_role() {
        GroupRole::Normal => "layer",
        GroupRole::GroupStart { expanded: true } => "group",
        GroupRole::GroupStart { expanded: false } => "group (closed)",
        GroupRole::GroupEnd => "group end",
    }
}

fn resource_label(resource: &ImageResource) -> String {
    match ImageResourceId::from_u16(resource.id) {
        Some(known) => format!("0x{:04X} {}", resource.id, known.name()),
        None => format!("0x{:04X}", resource.id),
    }
}

fn print_tree(path: &Path, doc: &Document) -> Result<(), PsdError> {
    let header = &doc.header;
    println!("{}", path.display());
    println!(
        "  {}x{}, {} channels, {}-bit {:?}",
        header.width, header.height, header.channels, header.depth, header.color_mode
    );
    if let Some(resolution) = doc.resources.resolution() {
        println!("  {} dpi", resolution.dpi());
    }
    println!(
        "  {} image resources, {} global tagged blocks",
        doc.resources.len(),
        doc.global_infos.len()
    );
    for resource in doc.resources.iter() {
        println!("    {}", resource_label(resource));
    }
    println!("  composite: {:?}", doc.composite.compression);

    let depths = groups::depths(doc.layers())?;
    // Top of the stack first, the way layer panels show it
    for (layer, depth) in doc.layers().iter().zip(&depths).rev() {
        if layer.group_role() == GroupRole::GroupEnd {
            continue;
        }
        let indent = "  ".repeat(depth + 1);
        let mut notes = Vec::new();
        if !layer.flags.visible {
            notes.push("hidden".to_string());
        }
        if layer.opacity != 255 {
            notes.push(format!("opacity {}", layer.opacity));
        }
        if layer.mask.is_some() {
            notes.push("mask".to_string());
        }
        println!(
            "{}- {} [{}] {}x{} at ({}, {}) {:?}{}",
            indent,
            layer.name,
            role_label(layer),
            layer.rect.width,
            layer.rect.height,
            layer.rect.x,
            layer.rect.y,
            layer.blend_mode,
            if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            }
        );
    }
    Ok(())
}

fn print_json(path: &Path, doc: &Document) -> Result<(), PsdError> {
    let parents = groups::parent_map(doc.layers())?;
    let layers: Vec<_> = doc
        .layers()
        .iter()
        .zip(&parents)
        .map(|(layer, parent)| {
            json!({
                "name": layer.name,
                "role": role_label(layer),
                "parent": parent,
                "x": layer.rect.x,
                "y": layer.rect.y,
                "width": layer.rect.width,
                "height": layer.rect.height,
                "blend_mode": String::from_utf8_lossy(&layer.blend_mode.key()),
                "opacity": layer.opacity,
                "visible": layer.flags.visible,
                "channels": layer.channels.iter().map(|c| c.id).collect::<Vec<_>>(),
                "tagged_blocks": layer.infos.iter().map(|b| b.key_str()).collect::<Vec<_>>(),
            })
        })
        .collect();

    let summary = json!({
        "file": path.display().to_string(),
        "width": doc.header.width,
        "height": doc.header.height,
        "channels": doc.header.channels,
        "depth": doc.header.depth,
        "color_mode": format!("{:?}", doc.header.color_mode),
        "resources": doc.resources.iter().map(resource_label).collect::<Vec<_>>(),
        "layers": layers,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
