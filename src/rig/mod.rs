mod correspondence;
mod diagnostic;
mod merge;
mod skeleton;
mod token;
mod types;
mod validation;
mod weights;

use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::RigError;

// Re-export the public surface of the module family.
pub use correspondence::{CorrespondenceMap, resolve};
pub use diagnostic::{DiagnosticsReport, diagnostic_log_path_for_output, write_rig_diagnostic_log};
pub use merge::{MergePhase, MergeSession, RiggedModel, merge};
pub use skeleton::{BuildOptions, build};
pub use token::{Axis, Field, TokenStreamData, VocabularyLayout, decode, encode};
pub use types::{
    Bone, BoneClass, GroupEntry, Mesh, Severity, Skeleton, SkeletonData, ValidationIssue,
    VertexGroup,
};
pub use validation::{WEIGHT_SUM_TOLERANCE, validate_skeleton, validate_weight_sums};
pub use weights::{
    DenseWeightMatrix, SparseWeightTable, WEIGHT_EPSILON, extract, imputation_issue, normalize,
};

// ─── Options and report ───────────────────────────────────────────────────────

/// Options shared by the per-sample pipeline entry points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RigOptions {
    /// Maximum bone influences kept per vertex.
    pub max_influences: usize,
    /// Adopt rootless bones under one inserted root instead of failing on
    /// multiple roots.
    pub synthetic_root: bool,
    /// Segment length for bones decoded without an explicit tail.
    pub tail_offset: f32,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            max_influences: 4,
            synthetic_root: false,
            tail_offset: 0.1,
        }
    }
}

/// Summary of one rigging run, returned beside the emitted model.
#[derive(Debug, Clone, Serialize)]
pub struct RigReport {
    pub bone_count: usize,
    pub vertex_count: usize,
    pub matched_bone_count: usize,
    pub imputed_vertex_count: usize,
    pub unweighted_vertex_count: usize,
    pub diagnostics: DiagnosticsReport,
}

// ─── Per-sample pipeline ──────────────────────────────────────────────────────

/// Run the full chain for one sample: decode the token sequence, build the
/// predicted skeleton, extract raw weights from the capture pairing, resolve
/// the bone correspondence, normalize, and merge onto the target mesh.
///
/// The capture armature and the target mesh must share vertex ordering with
/// the weight capture; the merge enforces this. Fatal errors abort only this
/// sample.
pub fn rig_sample(
    symbols: &[u32],
    vocab: &VocabularyLayout,
    mesh: &Mesh,
    capture_armature: &Skeleton,
    options: &RigOptions,
) -> Result<(RiggedModel, RigReport), RigError> {
    let fields = decode(symbols, vocab)?;
    let predicted = build(
        &fields,
        &BuildOptions {
            synthetic_root: options.synthetic_root,
            tail_offset: options.tail_offset,
        },
    )?;
    info!(
        "decoded skeleton: {} bones from {} symbols",
        predicted.len(),
        symbols.len()
    );

    let mut extra_issues = validate_skeleton(&predicted);

    let (table, extraction_issues) = extract(mesh, capture_armature);
    extra_issues.extend(extraction_issues);

    let map = resolve(capture_armature, &predicted);
    let matched_bone_count = map.match_count();

    let mut session = MergeSession::new(&predicted, mesh);
    session.resolve_correspondence(map)?;
    session.normalize_weights(&table, options.max_influences, &table.slot_heads(capture_armature))?;
    if let Some(dense) = session.dense_weights() {
        extra_issues.extend(validate_weight_sums(dense));
    }
    session.bind()?;
    let (model, mut diagnostics) = session.emit()?;

    diagnostics.extend_issues(extra_issues);

    let report = RigReport {
        bone_count: model.skeleton.len(),
        vertex_count: model.positions.len(),
        matched_bone_count,
        imputed_vertex_count: diagnostics.imputed_vertices.len(),
        unweighted_vertex_count: diagnostics.unweighted_vertices.len(),
        diagnostics,
    };

    Ok((model, report))
}

// ─── Batch runner ─────────────────────────────────────────────────────────────

/// Run several independent inference repeats over the same capture pairing.
///
/// Each sample's chain shares no mutable state with the others, so a failed
/// sample lands in its own result slot and the rest proceed. The `cancel`
/// flag is polled between samples; once raised, remaining samples are not
/// started and the result list stays short.
pub fn rig_batch(
    sequences: &[Vec<u32>],
    vocab: &VocabularyLayout,
    mesh: &Mesh,
    capture_armature: &Skeleton,
    options: &RigOptions,
    cancel: &AtomicBool,
) -> Vec<Result<(RiggedModel, RigReport), RigError>> {
    let mut results = Vec::with_capacity(sequences.len());
    for (sample_index, symbols) in sequences.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            info!(
                "cancelled after {} of {} samples",
                sample_index,
                sequences.len()
            );
            break;
        }

        let result = rig_sample(symbols, vocab, mesh, capture_armature, options);
        if let Err(error) = &result {
            warn!("sample {sample_index} failed: {error}");
        }
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;

    fn chain_skeleton(names: &[&str]) -> Skeleton {
        Skeleton {
            bones: names
                .iter()
                .enumerate()
                .map(|(index, name)| Bone {
                    head: Point3::new(0.1, index as f32 * 0.25, 0.0),
                    tail: Point3::new(0.1, index as f32 * 0.25 + 0.1, 0.0),
                    parent: index.checked_sub(1),
                    name: name.to_string(),
                    class: BoneClass::infer_from_name(name),
                })
                .collect(),
        }
    }

    fn capture_mesh(armature: &Skeleton, vertex_count: usize) -> Mesh {
        // Each vertex fully claimed by the bone whose head it sits nearest.
        let positions: Vec<Point3<f32>> = (0..vertex_count)
            .map(|i| Point3::new(0.1, i as f32 * 0.1, 0.0))
            .collect();
        let groups = armature
            .bones
            .iter()
            .enumerate()
            .map(|(bone_index, bone)| VertexGroup {
                name: bone.name.clone(),
                entries: positions
                    .iter()
                    .enumerate()
                    .filter(|(_, position)| {
                        let nearest = armature
                            .bones
                            .iter()
                            .enumerate()
                            .min_by(|(_, a), (_, b)| {
                                let da = (*position - a.head).norm_squared();
                                let db = (*position - b.head).norm_squared();
                                da.partial_cmp(&db).unwrap()
                            })
                            .map(|(index, _)| index)
                            .unwrap();
                        nearest == bone_index
                    })
                    .map(|(vertex, _)| GroupEntry {
                        vertex,
                        weight: 1.0,
                    })
                    .collect(),
            })
            .collect();
        Mesh { positions, groups }
    }

    #[test]
    fn given_known_skeleton_when_encoding_and_decoding_then_structure_round_trips() {
        let vocab = VocabularyLayout::default();
        let original = chain_skeleton(&["root", "spine", "head"]);

        let symbols = encode(&original, &vocab).expect("skeleton fits the vocabulary");
        let fields = decode(&symbols, &vocab).expect("encoded sequence decodes");
        let rebuilt = build(&fields, &BuildOptions::default()).expect("decoded fields build");

        assert_eq!(rebuilt.len(), original.len());
        for (a, b) in original.bones.iter().zip(&rebuilt.bones) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.parent, b.parent);
            assert_eq!(a.class, b.class);
            // Positions survive within quantization tolerance.
            let half_bin = (vocab.coord_max - vocab.coord_min) / vocab.coord_bins as f32;
            assert!((a.head - b.head).norm() < half_bin * 2.0);
            assert!((a.tail - b.tail).norm() < half_bin * 2.0);
        }
    }

    #[test]
    fn given_capture_pairing_when_rigging_sample_then_model_and_report_agree() {
        let vocab = VocabularyLayout::default();
        let capture = chain_skeleton(&["root", "spine", "head"]);
        let mesh = capture_mesh(&capture, 12);

        // The predicted skeleton shares all three names, in another order.
        let predicted = chain_skeleton(&["spine", "head", "root"]);
        let symbols = encode(&predicted, &vocab).unwrap();

        let (model, report) =
            rig_sample(&symbols, &vocab, &mesh, &capture, &RigOptions::default()).unwrap();

        assert_eq!(report.bone_count, 3);
        assert_eq!(report.vertex_count, 12);
        assert_eq!(report.matched_bone_count, 3);
        assert_eq!(report.unweighted_vertex_count, 0);
        assert_eq!(model.groups.len(), model.skeleton.len());

        // Every vertex keeps exactly its full single influence.
        let weighted: usize = model.groups.iter().map(|g| g.entries.len()).sum();
        assert_eq!(weighted, 12);
    }

    #[test]
    fn given_cancel_flag_when_batching_then_remaining_samples_are_skipped() {
        let vocab = VocabularyLayout::default();
        let capture = chain_skeleton(&["root", "spine"]);
        let mesh = capture_mesh(&capture, 4);
        let symbols = encode(&capture, &vocab).unwrap();

        let cancel = AtomicBool::new(true);
        let results = rig_batch(
            &[symbols.clone(), symbols],
            &vocab,
            &mesh,
            &capture,
            &RigOptions::default(),
            &cancel,
        );
        assert!(results.is_empty());
    }

    #[test]
    fn given_one_bad_sample_when_batching_then_others_still_succeed() {
        let vocab = VocabularyLayout::default();
        let capture = chain_skeleton(&["root", "spine"]);
        let mesh = capture_mesh(&capture, 4);
        let good = encode(&capture, &vocab).unwrap();
        let bad = vec![vocab.vocab_size() + 1];

        let cancel = AtomicBool::new(false);
        let results = rig_batch(
            &[good, bad],
            &vocab,
            &mesh,
            &capture,
            &RigOptions::default(),
            &cancel,
        );

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(RigError::MalformedSequence { .. })
        ));
    }
}
