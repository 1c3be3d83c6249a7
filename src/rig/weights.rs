use std::collections::HashMap;

use log::warn;
use nalgebra::Point3;

use crate::error::RigError;

use super::types::{Mesh, Severity, Skeleton, ValidationIssue, VertexGroup};

/// Influences below this threshold are treated as absent everywhere in the
/// weight pipeline.
pub const WEIGHT_EPSILON: f32 = 1e-7;

// ─── Sparse weight table ──────────────────────────────────────────────────────

/// Raw per-vertex influences captured against one mesh/armature pairing:
/// a slot-indexed bone-name list plus one `(slot, raw_weight)` row per
/// vertex. Rows are unsorted and unnormalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseWeightTable {
    pub bone_names: Vec<String>,
    pub rows: Vec<Vec<(usize, f32)>>,
}

impl SparseWeightTable {
    pub fn vertex_count(&self) -> usize {
        self.rows.len()
    }

    /// Head positions for each slot, looked up by bone name in the given
    /// armature. Slots whose bone vanished from the armature fall back to
    /// the origin; they can only occur when the table and armature were
    /// produced by different callers.
    pub fn slot_heads(&self, armature: &Skeleton) -> Vec<Point3<f32>> {
        let index = armature.name_index();
        self.bone_names
            .iter()
            .map(|name| {
                index
                    .get(name.as_str())
                    .map(|&bone| armature.bones[bone].head)
                    .unwrap_or_else(Point3::origin)
            })
            .collect()
    }
}

// ─── Extractor ────────────────────────────────────────────────────────────────

/// Build the sparse influence table for a mesh/armature pairing.
///
/// Cost is linear in the number of (vertex, bone) memberships actually
/// present: membership comes from the mesh's group→vertex-list layout, never
/// from a per-bone scan over all vertices. Vertices claimed by no group get
/// an empty row. Issues (duplicate group names, entries pointing past the
/// vertex range) are returned as data beside the table.
pub fn extract(mesh: &Mesh, armature: &Skeleton) -> (SparseWeightTable, Vec<ValidationIssue>) {
    let mut issues = Vec::new();

    let mut groups_by_name: HashMap<&str, &VertexGroup> = HashMap::new();
    for group in &mesh.groups {
        if groups_by_name.insert(group.name.as_str(), group).is_some() {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: "DUPLICATE_GROUP_NAME".to_string(),
                message: format!(
                    "mesh carries more than one vertex group named '{}'; the last one wins",
                    group.name
                ),
            });
        }
    }

    let mut table = SparseWeightTable {
        bone_names: Vec::new(),
        rows: vec![Vec::new(); mesh.vertex_count()],
    };

    // Traversal order of the armature decides slot order; when two bones
    // share a name (imported armatures only) the first claims the group.
    let mut claimed: HashMap<&str, usize> = HashMap::new();
    for bone in &armature.bones {
        let Some(group) = groups_by_name.get(bone.name.as_str()) else {
            continue;
        };
        if claimed.contains_key(bone.name.as_str()) {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: "DUPLICATE_BONE_NAME".to_string(),
                message: format!(
                    "armature bone '{}' appears more than once; first in traversal order wins",
                    bone.name
                ),
            });
            continue;
        }

        let slot = table.bone_names.len();
        claimed.insert(bone.name.as_str(), slot);
        table.bone_names.push(bone.name.clone());

        let mut dropped = 0usize;
        for entry in &group.entries {
            match table.rows.get_mut(entry.vertex) {
                Some(row) => row.push((slot, entry.weight)),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: "GROUP_ENTRY_OUT_OF_RANGE".to_string(),
                message: format!(
                    "group '{}' references {} vertices past the mesh's {}-vertex range",
                    bone.name,
                    dropped,
                    mesh.vertex_count()
                ),
            });
        }
    }

    (table, issues)
}

// ─── Dense weight matrix ──────────────────────────────────────────────────────

/// Normalized `[vertices × bones]` influence matrix. Every row sums to 1
/// within floating-point tolerance; vertices whose weights had to be
/// imputed are listed separately for downstream diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseWeightMatrix {
    pub bone_names: Vec<String>,
    pub vertex_count: usize,
    values: Vec<f32>,
    /// Vertex indices whose weight was imputed, ascending.
    pub imputed: Vec<usize>,
}

impl DenseWeightMatrix {
    pub fn get(&self, vertex: usize, slot: usize) -> f32 {
        self.values[vertex * self.bone_names.len() + slot]
    }

    pub fn row(&self, vertex: usize) -> &[f32] {
        let width = self.bone_names.len();
        &self.values[vertex * width..(vertex + 1) * width]
    }

    /// Convert back to sparse form (nonzero entries only), e.g. to feed the
    /// matrix through [`normalize`] again.
    pub fn to_sparse(&self) -> SparseWeightTable {
        SparseWeightTable {
            bone_names: self.bone_names.clone(),
            rows: (0..self.vertex_count)
                .map(|vertex| {
                    self.row(vertex)
                        .iter()
                        .enumerate()
                        .filter(|&(_, &weight)| weight > 0.0)
                        .map(|(slot, &weight)| (slot, weight))
                        .collect()
                })
                .collect(),
        }
    }
}

// ─── Normalizer ───────────────────────────────────────────────────────────────

/// Normalize a sparse influence table into a dense matrix.
///
/// Per vertex: sort influences by descending weight, keep the strongest
/// `max_influences`, and divide by their sum. A vertex whose kept sum is
/// not meaningfully positive is never divided (that path used to mint NaN
/// rows) and instead receives full weight on the nearest bone by
/// head-to-vertex distance, recorded in the imputed list.
///
/// `vertex_positions` must parallel the table's rows and `bone_heads` its
/// slots; normalizing an already-normalized table is a no-op.
pub fn normalize(
    table: &SparseWeightTable,
    max_influences: usize,
    vertex_positions: &[Point3<f32>],
    bone_heads: &[Point3<f32>],
) -> Result<DenseWeightMatrix, RigError> {
    if vertex_positions.len() != table.rows.len() {
        return Err(RigError::TopologyMismatch {
            weight_vertices: table.rows.len(),
            mesh_vertices: vertex_positions.len(),
        });
    }
    if table.bone_names.is_empty() {
        return Err(RigError::NoCorrespondence);
    }
    debug_assert_eq!(table.bone_names.len(), bone_heads.len());

    let width = table.bone_names.len();
    let mut matrix = DenseWeightMatrix {
        bone_names: table.bone_names.clone(),
        vertex_count: table.rows.len(),
        values: vec![0.0; table.rows.len() * width],
        imputed: Vec::new(),
    };

    for (vertex, row) in table.rows.iter().enumerate() {
        let mut kept: Vec<(usize, f32)> = row
            .iter()
            .copied()
            .filter(|&(_, weight)| weight > WEIGHT_EPSILON)
            .collect();
        kept.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        kept.truncate(max_influences);

        let sum: f32 = kept.iter().map(|&(_, weight)| weight).sum();
        if sum > WEIGHT_EPSILON {
            for (slot, weight) in kept {
                matrix.values[vertex * width + slot] = weight / sum;
            }
        } else {
            let nearest = nearest_slot(vertex_positions[vertex], bone_heads);
            matrix.values[vertex * width + nearest] = 1.0;
            matrix.imputed.push(vertex);
        }
    }

    if !matrix.imputed.is_empty() {
        warn!(
            "imputed weights for {} of {} vertices",
            matrix.imputed.len(),
            matrix.vertex_count
        );
    }

    Ok(matrix)
}

fn nearest_slot(position: Point3<f32>, bone_heads: &[Point3<f32>]) -> usize {
    let mut best = 0usize;
    let mut best_distance = f32::INFINITY;
    for (slot, head) in bone_heads.iter().enumerate() {
        let distance = (position - *head).norm_squared();
        if distance < best_distance {
            best_distance = distance;
            best = slot;
        }
    }
    best
}

/// Issue summarizing imputation, for the diagnostics report.
pub fn imputation_issue(matrix: &DenseWeightMatrix) -> Option<ValidationIssue> {
    if matrix.imputed.is_empty() {
        return None;
    }
    Some(ValidationIssue {
        severity: Severity::Warning,
        code: "IMPUTED_WEIGHT".to_string(),
        message: format!(
            "{} of {} vertices had no usable influence; each was bound to its nearest bone",
            matrix.imputed.len(),
            matrix.vertex_count
        ),
    })
}
