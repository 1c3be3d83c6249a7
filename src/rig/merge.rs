use log::debug;
use nalgebra::Point3;

use crate::error::RigError;

use super::correspondence::CorrespondenceMap;
use super::diagnostic::DiagnosticsReport;
use super::types::{GroupEntry, Mesh, Severity, Skeleton, ValidationIssue, VertexGroup};
use super::weights::{DenseWeightMatrix, SparseWeightTable, WEIGHT_EPSILON, imputation_issue, normalize};

// ─── Merge phases ─────────────────────────────────────────────────────────────

/// Phases of a merge call. Transitions only ever advance one step;
/// requesting a step out of order is a [`RigError::PhaseViolation`] and
/// failure is reachable from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Initialized,
    CorrespondenceResolved,
    WeightsNormalized,
    Bound,
    Emitted,
}

impl MergePhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::CorrespondenceResolved => "correspondence-resolved",
            Self::WeightsNormalized => "weights-normalized",
            Self::Bound => "bound",
            Self::Emitted => "emitted",
        }
    }
}

// ─── Rigged model ─────────────────────────────────────────────────────────────

/// The final bound structure handed to the export collaborator: target
/// geometry unchanged, the source skeleton verbatim, and one vertex group
/// per bone (index-aligned with the skeleton) whose names resolve 1:1
/// against the skeleton's bone names.
#[derive(Debug, Clone)]
pub struct RiggedModel {
    pub positions: Vec<Point3<f32>>,
    pub skeleton: Skeleton,
    pub groups: Vec<VertexGroup>,
    /// Vertices none of whose influences survived the merge, ascending.
    pub unweighted: Vec<usize>,
}

// ─── Merge session ────────────────────────────────────────────────────────────

/// A single merge call over immutable inputs.
///
/// The source skeleton contributes bone topology verbatim; the target mesh
/// contributes only geometry. Inputs are never mutated; emitting produces a
/// new bound structure.
pub struct MergeSession<'a> {
    source: &'a Skeleton,
    target: &'a Mesh,
    phase: MergePhase,
    correspondence: Option<CorrespondenceMap>,
    dense: Option<DenseWeightMatrix>,
    groups: Option<Vec<VertexGroup>>,
    unweighted: Vec<usize>,
    diagnostics: DiagnosticsReport,
}

impl<'a> MergeSession<'a> {
    pub fn new(source: &'a Skeleton, target: &'a Mesh) -> Self {
        Self {
            source,
            target,
            phase: MergePhase::Initialized,
            correspondence: None,
            dense: None,
            groups: None,
            unweighted: Vec::new(),
            diagnostics: DiagnosticsReport::default(),
        }
    }

    pub fn phase(&self) -> MergePhase {
        self.phase
    }

    /// The normalized matrix, once the session has one.
    pub fn dense_weights(&self) -> Option<&DenseWeightMatrix> {
        self.dense.as_ref()
    }

    fn advance(&mut self, from: MergePhase, to: MergePhase) -> Result<(), RigError> {
        if self.phase != from {
            return Err(RigError::PhaseViolation {
                current: self.phase.name(),
                requested: to.name(),
            });
        }
        debug!("merge phase {} -> {}", from.name(), to.name());
        self.phase = to;
        Ok(())
    }

    /// Install the bone-name correspondence between the weight pipeline's
    /// armature and the source skeleton. Zero matches is fatal here; a
    /// partial match proceeds with a warning carrying the unmatched names.
    pub fn resolve_correspondence(&mut self, map: CorrespondenceMap) -> Result<(), RigError> {
        self.advance(MergePhase::Initialized, MergePhase::CorrespondenceResolved)?;
        if map.is_empty() {
            return Err(RigError::NoCorrespondence);
        }
        if let Some(issue) = map.partial_issue() {
            self.diagnostics.push_issue(issue);
        }
        self.diagnostics.unmatched_bones = map.unmatched.clone();
        self.correspondence = Some(map);
        Ok(())
    }

    /// Normalize a raw influence table against the target geometry and the
    /// weight armature's bone heads.
    pub fn normalize_weights(
        &mut self,
        table: &SparseWeightTable,
        max_influences: usize,
        bone_heads: &[Point3<f32>],
    ) -> Result<(), RigError> {
        self.advance(
            MergePhase::CorrespondenceResolved,
            MergePhase::WeightsNormalized,
        )?;
        let dense = normalize(table, max_influences, &self.target.positions, bone_heads)?;
        if let Some(issue) = imputation_issue(&dense) {
            self.diagnostics.push_issue(issue);
        }
        self.diagnostics.imputed_vertices = dense.imputed.clone();
        self.dense = Some(dense);
        Ok(())
    }

    /// Accept an already-normalized dense matrix instead of running the
    /// normalizer, for callers that persisted the intermediate form.
    pub fn accept_weights(&mut self, dense: DenseWeightMatrix) -> Result<(), RigError> {
        self.advance(
            MergePhase::CorrespondenceResolved,
            MergePhase::WeightsNormalized,
        )?;
        self.diagnostics.imputed_vertices = dense.imputed.clone();
        if let Some(issue) = imputation_issue(&dense) {
            self.diagnostics.push_issue(issue);
        }
        self.dense = Some(dense);
        Ok(())
    }

    /// Re-bind the normalized matrix onto the target mesh's vertex range,
    /// translating bone names through the correspondence.
    ///
    /// The matrix must have been built against a mesh with the same vertex
    /// ordering as the target; a count mismatch is fatal, never silently
    /// truncated or padded.
    pub fn bind(&mut self) -> Result<(), RigError> {
        self.advance(MergePhase::WeightsNormalized, MergePhase::Bound)?;

        let dense = self.dense.as_ref().expect("set in normalize_weights");
        let correspondence = self
            .correspondence
            .as_ref()
            .expect("set in resolve_correspondence");

        if dense.vertex_count != self.target.vertex_count() {
            return Err(RigError::TopologyMismatch {
                weight_vertices: dense.vertex_count,
                mesh_vertices: self.target.vertex_count(),
            });
        }

        // Slot → target bone index, resolved once.
        let slot_targets: Vec<Option<usize>> = dense
            .bone_names
            .iter()
            .map(|name| correspondence.matched.get(name.as_str()).copied())
            .collect();

        let mut groups: Vec<VertexGroup> = self
            .source
            .bones
            .iter()
            .map(|bone| VertexGroup {
                name: bone.name.clone(),
                entries: Vec::new(),
            })
            .collect();

        let mut unweighted = Vec::new();
        for vertex in 0..dense.vertex_count {
            let mut bound = false;
            for (slot, &weight) in dense.row(vertex).iter().enumerate() {
                if weight <= WEIGHT_EPSILON {
                    continue;
                }
                let Some(target_bone) = slot_targets[slot] else {
                    continue;
                };
                groups[target_bone].entries.push(GroupEntry { vertex, weight });
                bound = true;
            }
            if !bound {
                unweighted.push(vertex);
            }
        }

        if !unweighted.is_empty() {
            self.diagnostics.push_issue(ValidationIssue {
                severity: Severity::Warning,
                code: "UNWEIGHTED_VERTEX".to_string(),
                message: format!(
                    "{} of {} vertices kept no influence after the merge",
                    unweighted.len(),
                    dense.vertex_count
                ),
            });
        }

        self.diagnostics.unweighted_vertices = unweighted.clone();
        self.unweighted = unweighted;
        self.groups = Some(groups);
        Ok(())
    }

    /// Emit the final bound structure together with the accumulated
    /// diagnostics. Consumes the session; `Emitted` is terminal.
    pub fn emit(mut self) -> Result<(RiggedModel, DiagnosticsReport), RigError> {
        self.advance(MergePhase::Bound, MergePhase::Emitted)?;
        let model = RiggedModel {
            positions: self.target.positions.clone(),
            skeleton: self.source.clone(),
            groups: self.groups.take().expect("set in bind"),
            unweighted: std::mem::take(&mut self.unweighted),
        };
        Ok((model, self.diagnostics))
    }
}

// ─── Convenience driver ───────────────────────────────────────────────────────

/// Drive a full merge over pre-resolved inputs: correspondence install,
/// normalized-matrix acceptance, bind, emit.
pub fn merge(
    source_skeleton: &Skeleton,
    target_mesh: &Mesh,
    dense: DenseWeightMatrix,
    correspondence: CorrespondenceMap,
) -> Result<(RiggedModel, DiagnosticsReport), RigError> {
    let mut session = MergeSession::new(source_skeleton, target_mesh);
    session.resolve_correspondence(correspondence)?;
    session.accept_weights(dense)?;
    session.bind()?;
    session.emit()
}

#[cfg(test)]
mod tests {
    use super::super::correspondence::resolve;
    use super::super::types::{Bone, BoneClass};
    use super::super::weights::normalize;
    use super::*;

    fn chain_skeleton(names: &[&str]) -> Skeleton {
        Skeleton {
            bones: names
                .iter()
                .enumerate()
                .map(|(index, name)| Bone {
                    head: Point3::new(0.0, index as f32 * 0.25, 0.0),
                    tail: Point3::new(0.0, index as f32 * 0.25 + 0.1, 0.0),
                    parent: index.checked_sub(1),
                    name: name.to_string(),
                    class: BoneClass::Other,
                })
                .collect(),
        }
    }

    fn flat_mesh(vertex_count: usize) -> Mesh {
        Mesh {
            positions: (0..vertex_count)
                .map(|i| Point3::new(i as f32 * 0.01, 0.0, 0.0))
                .collect(),
            groups: Vec::new(),
        }
    }

    fn uniform_table(names: &[&str], vertex_count: usize) -> SparseWeightTable {
        SparseWeightTable {
            bone_names: names.iter().map(|n| n.to_string()).collect(),
            rows: (0..vertex_count)
                .map(|_| (0..names.len()).map(|slot| (slot, 1.0)).collect())
                .collect(),
        }
    }

    fn normalized(
        names: &[&str],
        vertex_count: usize,
        mesh: &Mesh,
    ) -> DenseWeightMatrix {
        let table = uniform_table(names, vertex_count);
        let heads = vec![Point3::origin(); names.len()];
        normalize(&table, 4, &mesh.positions, &heads).unwrap()
    }

    #[test]
    fn given_matching_topology_when_merging_then_model_is_emitted() {
        let source = chain_skeleton(&["root", "spine", "head"]);
        let weight_armature = chain_skeleton(&["spine", "root", "head"]);
        let mesh = flat_mesh(7702);
        let dense = normalized(&["spine", "root", "head"], 7702, &mesh);
        let map = resolve(&weight_armature, &source);

        let (model, diagnostics) = merge(&source, &mesh, dense, map).unwrap();
        assert_eq!(model.positions.len(), 7702);
        assert_eq!(model.groups.len(), model.skeleton.len());
        assert!(model.unweighted.is_empty());
        assert!(diagnostics.unmatched_bones.is_empty());
        for (bone, group) in model.skeleton.bones.iter().zip(&model.groups) {
            assert_eq!(bone.name, group.name);
        }
    }

    #[test]
    fn given_one_vertex_short_target_when_merging_then_topology_mismatch() {
        let source = chain_skeleton(&["root", "spine"]);
        let capture_mesh = flat_mesh(7702);
        let target_mesh = flat_mesh(7701);
        let dense = normalized(&["root", "spine"], 7702, &capture_mesh);
        let map = resolve(&source, &source);

        match merge(&source, &target_mesh, dense, map) {
            Err(RigError::TopologyMismatch {
                weight_vertices: 7702,
                mesh_vertices: 7701,
            }) => {}
            other => panic!("expected TopologyMismatch, got {other:?}"),
        }
    }

    #[test]
    fn given_partially_shared_names_when_merging_then_warning_lists_missing() {
        // 53 bones in the weight armature, 40 shared with the source.
        let weight_names: Vec<String> = (0..53).map(|i| format!("bone_{i}")).collect();
        let source_names: Vec<String> = (0..40).map(|i| format!("bone_{i}")).collect();
        let weight_refs: Vec<&str> = weight_names.iter().map(String::as_str).collect();
        let source_refs: Vec<&str> = source_names.iter().map(String::as_str).collect();

        let source = chain_skeleton(&source_refs);
        let weight_armature = chain_skeleton(&weight_refs);
        let mesh = flat_mesh(16);
        let dense = normalized(&weight_refs, 16, &mesh);
        let map = resolve(&weight_armature, &source);

        let (model, diagnostics) = merge(&source, &mesh, dense, map).unwrap();
        assert_eq!(diagnostics.unmatched_bones.len(), 13);
        assert!(
            diagnostics
                .issues
                .iter()
                .any(|issue| issue.code == "PARTIAL_CORRESPONDENCE")
        );
        assert_eq!(model.groups.len(), 40);
    }

    #[test]
    fn given_no_shared_names_when_merging_then_no_correspondence_error() {
        let source = chain_skeleton(&["a", "b"]);
        let weight_armature = chain_skeleton(&["c", "d"]);
        let mesh = flat_mesh(4);
        let dense = normalized(&["c", "d"], 4, &mesh);
        let map = resolve(&weight_armature, &source);

        match merge(&source, &mesh, dense, map) {
            Err(RigError::NoCorrespondence) => {}
            other => panic!("expected NoCorrespondence, got {other:?}"),
        }
    }

    #[test]
    fn given_skipped_phase_when_binding_then_phase_violation() {
        let source = chain_skeleton(&["root"]);
        let mesh = flat_mesh(4);
        let mut session = MergeSession::new(&source, &mesh);

        match session.bind() {
            Err(RigError::PhaseViolation {
                current: "initialized",
                requested: "bound",
            }) => {}
            other => panic!("expected PhaseViolation, got {other:?}"),
        }
    }

    #[test]
    fn given_vertex_with_only_unmatched_influences_then_it_is_reported_unweighted() {
        let source = chain_skeleton(&["root"]);
        let weight_armature = chain_skeleton(&["root", "stray"]);
        let mesh = flat_mesh(2);
        // Vertex 0 on "root", vertex 1 entirely on the unmatched "stray".
        let table = SparseWeightTable {
            bone_names: vec!["root".to_string(), "stray".to_string()],
            rows: vec![vec![(0, 1.0)], vec![(1, 1.0)]],
        };
        let heads = vec![Point3::origin(); 2];
        let dense = normalize(&table, 4, &mesh.positions, &heads).unwrap();
        let map = resolve(&weight_armature, &source);

        let (model, diagnostics) = merge(&source, &mesh, dense, map).unwrap();
        assert_eq!(model.unweighted, vec![1]);
        assert!(
            diagnostics
                .issues
                .iter()
                .any(|issue| issue.code == "UNWEIGHTED_VERTEX")
        );
    }
}
