use std::{env, path::PathBuf, process};

use anyhow::bail;

use autorig::asset::{export_rigged_model, import_mesh, load_token_stream};
use autorig::rig::{
    RigOptions, diagnostic_log_path_for_output, rig_sample, write_rig_diagnostic_log,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("Usage: autorig <tokens.json> <mesh.glb> <output.json>");
        process::exit(2);
    }

    let tokens_path = PathBuf::from(&args[1]);
    let mesh_path = PathBuf::from(&args[2]);
    let output_path = PathBuf::from(&args[3]);

    let stream = load_token_stream(&tokens_path)?;
    let (mesh, armature) = import_mesh(&mesh_path)?;
    let Some(armature) = armature else {
        bail!("input mesh {} carries no skin/armature", mesh_path.display());
    };

    let options = RigOptions::default();
    let (model, report) = rig_sample(
        &stream.symbols,
        &stream.vocabulary,
        &mesh,
        &armature,
        &options,
    )?;

    export_rigged_model(&output_path, &model)?;
    let diagnostic_path = diagnostic_log_path_for_output(&output_path);
    write_rig_diagnostic_log(&output_path, &diagnostic_path, &model, &report.diagnostics)?;

    println!("Bones: {}, Vertices: {}", report.bone_count, report.vertex_count);
    println!(
        "Matched bones: {} (unmatched: {})",
        report.matched_bone_count,
        report.diagnostics.unmatched_bones.len()
    );
    println!(
        "Imputed vertices: {}, Unweighted vertices: {}",
        report.imputed_vertex_count, report.unweighted_vertex_count
    );
    println!("Issues: {}", report.diagnostics.issues.len());
    println!("Diagnostics: {}", diagnostic_path.display());

    Ok(())
}
