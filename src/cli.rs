// ============================================================================
// layerlab CLI — project store and layer editing from the command line
// ============================================================================
//
// Usage examples:
//   layerlab new "poster" --width 800 --height 600
//   layerlab brush 1a2b3c4d --color "#ff0000" --size 8 --points 10,10 200,40 220,300
//   layerlab select lasso 1a2b3c4d -o sel.b64 --points 40,40 200,40 200,200 40,200
//   layerlab bucket 1a2b3c4d --color "#00f" --at 120,80 --mask sel.b64 --layer 0
//   layerlab composite 1a2b3c4d -o flat.png
//
// Every command that changes a project loads it, applies the edit and saves
// it while holding that project's lock.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::canvas::{LayerStack, PixelBuffer};
use crate::color::parse_hex_color;
use crate::error::{LayerError, Result};
use crate::io::{export_layer_images, write_png};
use crate::ops::fill::bucket_fill;
use crate::ops::paint::{brush_stroke, eraser_stroke};
use crate::project::{ProjectStore, safe_filename};
use crate::selection::{Point, SelectionMask};
use crate::settings::Settings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Layered raster editor working on a directory of projects.
#[derive(Parser, Debug)]
#[command(name = "layerlab", version, about = "Layered raster image editor")]
pub struct CliArgs {
    /// Storage root holding one directory per project (overrides the settings file).
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Settings file (default: $XDG_CONFIG_HOME/layerlab/layerlab.cfg).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a project with a white background and one empty layer.
    New {
        #[arg(default_value = "new project")]
        name: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Create a project from an image file, or from a saved `.bin` snapshot.
    Import {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// List stored projects.
    List,
    /// Print the layer summary of a project as JSON.
    Info { pid: String },
    /// Rename a project.
    Rename { pid: String, name: String },
    /// Copy a project under a new id.
    Copy { pid: String, name: String },
    /// Flatten the visible layers into one PNG.
    Composite {
        pid: String,
        #[arg(short, long, value_name = "FILE.png")]
        output: Option<PathBuf>,
    },
    /// Edit the layer stack.
    Layer {
        pid: String,
        #[command(subcommand)]
        action: LayerAction,
    },
    /// Draw an opaque stroke on a layer.
    Brush {
        pid: String,
        #[arg(long)]
        color: String,
        #[arg(long, default_value_t = 5)]
        size: u32,
        #[command(flatten)]
        stroke: StrokeArgs,
    },
    /// Erase along a stroke on a layer.
    Erase {
        pid: String,
        #[arg(long, default_value_t = 5)]
        size: u32,
        #[command(flatten)]
        stroke: StrokeArgs,
    },
    /// Flood-fill a layer from a seed point.
    Bucket {
        pid: String,
        /// Layer to paint (default: the active layer).
        #[arg(long)]
        layer: Option<usize>,
        #[arg(long)]
        color: String,
        #[arg(long, value_name = "X,Y", value_parser = parse_point, allow_hyphen_values = true)]
        at: Point,
        /// Per-channel tolerance (default from settings).
        #[arg(long)]
        tolerance: Option<u8>,
        #[arg(long, value_name = "FILE")]
        mask: Option<PathBuf>,
    },
    /// Build a selection mask and print it as base64 PNG.
    Select {
        #[command(subcommand)]
        shape: SelectShape,
    },
    /// Write every layer as Layer<i>.png into a directory.
    ExportLayers {
        pid: String,
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum LayerAction {
    /// Append a new transparent layer and select it.
    Add,
    /// Duplicate the active layer.
    Duplicate,
    /// Delete a layer (the active one when no index is given).
    Delete { index: Option<usize> },
    Swap { a: usize, b: usize },
    Select { index: usize },
    /// Toggle a layer's visibility.
    Toggle { index: usize },
    Rename { index: usize, name: String },
}

#[derive(Args, Debug)]
pub struct StrokeArgs {
    /// Layer to paint (default: the active layer).
    #[arg(long)]
    pub layer: Option<usize>,
    /// Points as `x,y` pairs separated by spaces.
    #[arg(long, required = true, num_args = 1.., allow_hyphen_values = true)]
    pub points: Vec<String>,
    /// File holding a base64 selection that restricts the stroke.
    #[arg(long, value_name = "FILE")]
    pub mask: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SelectTarget {
    pub pid: String,
    /// Build against one layer instead of the composite.
    #[arg(long)]
    pub layer: Option<usize>,
    /// Write the base64 mask here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum SelectShape {
    Rect {
        #[command(flatten)]
        target: SelectTarget,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: Point,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: Point,
    },
    Polygon {
        #[command(flatten)]
        target: SelectTarget,
        #[arg(long, required = true, num_args = 1.., allow_hyphen_values = true)]
        points: Vec<String>,
    },
    Freeform {
        #[command(flatten)]
        target: SelectTarget,
        #[arg(long, required = true, num_args = 1.., allow_hyphen_values = true)]
        points: Vec<String>,
    },
    /// Edge-snapping lasso through seed points.
    Lasso {
        #[command(flatten)]
        target: SelectTarget,
        #[arg(long, required = true, num_args = 1.., allow_hyphen_values = true)]
        points: Vec<String>,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one command and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let mut settings = Settings::load(args.config.as_deref());
    if let Some(root) = &args.root {
        settings.storage_root = root.clone();
    }
    if args.verbose {
        settings.log_level = LevelFilter::Debug;
    }
    crate::logger::init(&settings);

    let store = ProjectStore::new(settings.storage_root.clone()).with_max_import_bytes(settings.max_import_bytes);
    match execute(args.command, &settings, &store) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command, settings: &Settings, store: &ProjectStore) -> Result<()> {
    match command {
        Command::New { name, width, height } => {
            let w = width.unwrap_or(settings.default_width);
            let h = height.unwrap_or(settings.default_height);
            let project = store.create(&name, w, h)?;
            println!("{}", project.id());
        }
        Command::Import { file, name } => {
            let is_snapshot = file
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("bin"));
            let project = if is_snapshot {
                store.import_snapshot(&file, name.as_deref())?
            } else {
                store.import_image(&file, name.as_deref())?
            };
            println!("{}", project.id());
        }
        Command::List => {
            for meta in store.list()? {
                println!("{}\t{}\t{} layers", meta.id, meta.name, meta.layers.len());
            }
        }
        Command::Info { pid } => {
            let project = store.open(&pid)?;
            println!("{}", project.summary().to_json()?);
        }
        Command::Rename { pid, name } => {
            store.rename(&pid, &name)?;
        }
        Command::Copy { pid, name } => {
            let copy = store.duplicate(&pid, &name)?;
            println!("{}", copy.id());
        }
        Command::Composite { pid, output } => {
            let project = store.open(&pid)?;
            let path = output
                .unwrap_or_else(|| PathBuf::from(format!("{}.png", safe_filename(project.name(), &pid))));
            write_png(&project.stack.composite(), &path)?;
            println!("{}", path.display());
        }
        Command::Layer { pid, action } => {
            let changed = store.with_project(&pid, |p| {
                let stack = &mut p.stack;
                Ok(match action {
                    LayerAction::Add => {
                        stack.create_layer();
                        true
                    }
                    LayerAction::Duplicate => stack.duplicate_active().is_some(),
                    LayerAction::Delete { index: Some(i) } => stack.delete_at(i),
                    LayerAction::Delete { index: None } => stack.delete_active(),
                    LayerAction::Swap { a, b } => stack.swap(a, b),
                    LayerAction::Select { index } => stack.select(index),
                    LayerAction::Toggle { index } => stack.toggle_visible_at(index),
                    LayerAction::Rename { index, name } => stack.rename_at(index, name),
                })
            })?;
            if !changed {
                log::warn!("layer command left project {} unchanged (index out of range?)", pid);
            }
        }
        Command::Brush { pid, color, size, stroke } => {
            let color = parse_hex_color(&color)?;
            let points = parse_points(&stroke.points)?;
            let mask = read_mask(stroke.mask.as_ref())?;
            store.with_project(&pid, |p| {
                paint_layer(&mut p.stack, stroke.layer, |buf| {
                    brush_stroke(buf, color, size, &points, mask.as_ref())
                })
            })?;
        }
        Command::Erase { pid, size, stroke } => {
            let points = parse_points(&stroke.points)?;
            let mask = read_mask(stroke.mask.as_ref())?;
            store.with_project(&pid, |p| {
                paint_layer(&mut p.stack, stroke.layer, |buf| eraser_stroke(buf, size, &points, mask.as_ref()))
            })?;
        }
        Command::Bucket { pid, layer, color, at, tolerance, mask } => {
            let color = parse_hex_color(&color)?;
            let tolerance = tolerance.unwrap_or(settings.bucket_tolerance);
            let mask = read_mask(mask.as_ref())?;
            let filled = store.with_project(&pid, |p| {
                paint_layer(&mut p.stack, layer, |buf| bucket_fill(buf, color, at, tolerance, mask.as_ref()))
            })?;
            println!("{}", filled);
        }
        Command::Select { shape } => select(shape, settings, store)?,
        Command::ExportLayers { pid, dir } => {
            let project = store.open(&pid)?;
            for path in export_layer_images(&project.stack, &dir)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn select(shape: SelectShape, settings: &Settings, store: &ProjectStore) -> Result<()> {
    let target = match &shape {
        SelectShape::Rect { target, .. }
        | SelectShape::Polygon { target, .. }
        | SelectShape::Freeform { target, .. }
        | SelectShape::Lasso { target, .. } => target,
    };

    let project = store.open(&target.pid)?;
    let raster = match target.layer {
        Some(i) => project
            .stack
            .at(i)
            .map(|layer| layer.buffer().clone())
            .ok_or(LayerError::NoLayer { index: i, len: project.stack.len() })?,
        None => project.stack.composite(),
    };

    let mask = match &shape {
        SelectShape::Rect { from, to, .. } => SelectionMask::rectangle(&raster, *from, *to),
        SelectShape::Polygon { points, .. } => SelectionMask::polygon(&raster, &parse_points(points)?),
        SelectShape::Freeform { points, .. } => SelectionMask::freeform(&raster, &parse_points(points)?),
        SelectShape::Lasso { points, .. } => {
            SelectionMask::magic_lasso(&raster, &parse_points(points)?, &settings.lasso)
        }
    };
    log::info!("selection covers {} pixels", mask.selected_count());

    let encoded = mask.encode()?;
    match &target.output {
        Some(path) => std::fs::write(path, encoded)?,
        None => println!("{}", encoded),
    }
    Ok(())
}

/// Paint `layer`, or the active layer when none is named.
fn paint_layer<T>(
    stack: &mut LayerStack,
    layer: Option<usize>,
    op: impl FnOnce(&mut PixelBuffer) -> Result<T>,
) -> Result<T> {
    match layer {
        Some(index) => stack.paint_at(index, op),
        None => stack.paint_active(op),
    }
}

fn read_mask(path: Option<&PathBuf>) -> Result<Option<SelectionMask>> {
    match path {
        Some(path) => Ok(Some(SelectionMask::decode(&std::fs::read_to_string(path)?)?)),
        None => Ok(None),
    }
}

// ============================================================================
// Argument parsing helpers
// ============================================================================

/// Parse `"x,y"`.
pub fn parse_point(s: &str) -> std::result::Result<Point, String> {
    let (x, y) = s
        .trim()
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let x = x.trim().parse::<i32>().map_err(|e| format!("bad x in '{}': {}", s, e))?;
    let y = y.trim().parse::<i32>().map_err(|e| format!("bad y in '{}': {}", s, e))?;
    Ok((x, y))
}

/// Parse every whitespace-separated `x,y` pair across `args`, so both
/// `--points 1,2 3,4` and `--points "1,2 3,4"` work.
pub fn parse_points(args: &[String]) -> Result<Vec<Point>> {
    args.iter()
        .flat_map(|a| a.split_whitespace())
        .map(|p| parse_point(p).map_err(LayerError::InvalidInput))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn points_parse_from_split_and_quoted_forms() {
        let split = vec!["1,2".to_string(), "3,-4".to_string()];
        let quoted = vec![" 1,2  3,-4 ".to_string()];
        assert_eq!(parse_points(&split).unwrap(), vec![(1, 2), (3, -4)]);
        assert_eq!(parse_points(&quoted).unwrap(), vec![(1, 2), (3, -4)]);
        assert!(parse_points(&["1;2".to_string()]).is_err());
        assert!(parse_point("x,2").is_err());
    }

    #[test]
    fn parses_a_brush_invocation() {
        let args = CliArgs::try_parse_from([
            "layerlab", "--root", "/tmp/s", "brush", "abcd1234", "--color", "#f00", "--size", "3", "--layer", "1",
            "--points", "0,0", "10,10",
        ])
        .unwrap();
        assert_eq!(args.root, Some(PathBuf::from("/tmp/s")));
        match args.command {
            Command::Brush { pid, size, stroke, .. } => {
                assert_eq!(pid, "abcd1234");
                assert_eq!(size, 3);
                assert_eq!(stroke.points.len(), 2);
                assert_eq!(stroke.layer, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_a_lasso_selection() {
        let args = CliArgs::try_parse_from([
            "layerlab", "select", "lasso", "abcd1234", "--layer", "1", "--points", "5,5", "30,5", "30,30",
        ])
        .unwrap();
        match args.command {
            Command::Select { shape: SelectShape::Lasso { target, points } } => {
                assert_eq!(target.layer, Some(1));
                assert_eq!(points.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn end_to_end_edit_through_the_store() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings { storage_root: tmp.path().to_path_buf(), ..Settings::default() };
        let store = ProjectStore::new(tmp.path());
        execute(
            Command::New { name: "demo".into(), width: Some(20), height: Some(20) },
            &settings,
            &store,
        )
        .unwrap();
        let pid = store.list().unwrap()[0].id.clone();

        execute(
            Command::Bucket {
                pid: pid.clone(),
                layer: None,
                color: "#00ff00".into(),
                at: (3, 3),
                tolerance: None,
                mask: None,
            },
            &settings,
            &store,
        )
        .unwrap();
        execute(Command::Layer { pid: pid.clone(), action: LayerAction::Add }, &settings, &store).unwrap();

        let project = store.open(&pid).unwrap();
        assert_eq!(project.stack.len(), 3);
        assert_eq!(project.stack.composite().get(10, 10), Some(image::Rgba([0, 255, 0, 255])));

        let err = execute(
            Command::Bucket {
                pid: pid.clone(),
                layer: None,
                color: "#00ff00".into(),
                at: (99, 3),
                tolerance: None,
                mask: None,
            },
            &settings,
            &store,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);

        // explicit layer: the background, below the now active empty layer
        execute(
            Command::Bucket {
                pid: pid.clone(),
                layer: Some(0),
                color: "#0000ff".into(),
                at: (0, 0),
                tolerance: None,
                mask: None,
            },
            &settings,
            &store,
        )
        .unwrap();
        let project = store.open(&pid).unwrap();
        assert_eq!(project.stack.at(0).unwrap().buffer().get(0, 0), Some(image::Rgba([0, 0, 255, 255])));
        assert_eq!(project.stack.at(1).unwrap().buffer().get(10, 10), Some(image::Rgba([0, 255, 0, 255])));
        assert_eq!(project.stack.active_index(), Some(2));

        let err = execute(
            Command::Erase {
                pid,
                size: 2,
                stroke: StrokeArgs { layer: Some(9), points: vec!["0,0".into(), "5,5".into()], mask: None },
            },
            &settings,
            &store,
        )
        .unwrap_err();
        assert!(matches!(err, LayerError::NoLayer { index: 9, len: 3 }));
    }
}
