use std::collections::HashSet;

use super::types::{Severity, Skeleton, ValidationIssue};
use super::weights::DenseWeightMatrix;

/// Tolerance for the sum-to-one invariant over normalized weight rows.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-5;

// ─── Skeleton invariants ──────────────────────────────────────────────────────

/// Re-check the structural invariants of a built skeleton.
///
/// The tree builder enforces these during construction; this pass exists for
/// skeletons arriving through the wire format or the asset boundary, and
/// returns issues rather than failing so callers can decide what is fatal.
pub fn validate_skeleton(skeleton: &Skeleton) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if skeleton.is_empty() {
        issues.push(ValidationIssue {
            severity: Severity::Error,
            code: "EMPTY_SKELETON".to_string(),
            message: "skeleton contains no bones".to_string(),
        });
        return issues;
    }

    for (index, bone) in skeleton.bones.iter().enumerate() {
        if let Some(parent) = bone.parent {
            if parent >= index {
                issues.push(ValidationIssue {
                    severity: Severity::Error,
                    code: "PARENT_ORDER_VIOLATION".to_string(),
                    message: format!(
                        "bone {index} ('{}') has parent {parent}, which does not precede it",
                        bone.name
                    ),
                });
            }
        }

        if (bone.tail - bone.head).norm() < 1e-6 {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: "DEGENERATE_BONE".to_string(),
                message: format!("bone {index} ('{}') has zero length", bone.name),
            });
        }
    }

    let roots = skeleton.root_count();
    if roots != 1 {
        issues.push(ValidationIssue {
            severity: Severity::Error,
            code: "ROOT_COUNT".to_string(),
            message: format!("skeleton has {roots} root bones; expected exactly one"),
        });
    }

    let mut seen = HashSet::new();
    for bone in &skeleton.bones {
        if !seen.insert(bone.name.as_str()) {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                code: "DUPLICATE_BONE_NAME".to_string(),
                message: format!(
                    "bone name '{}' appears more than once; name-based correspondence would merge them",
                    bone.name
                ),
            });
        }
    }

    issues
}

// ─── Weight invariants ────────────────────────────────────────────────────────

/// Verify that every row of a normalized matrix sums to 1 within tolerance,
/// imputed vertices included (imputation assigns exactly 1.0).
pub fn validate_weight_sums(matrix: &DenseWeightMatrix) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for vertex in 0..matrix.vertex_count {
        let sum: f32 = matrix.row(vertex).iter().sum();
        if (sum - 1.0).abs() >= WEIGHT_SUM_TOLERANCE {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                code: "WEIGHT_SUM".to_string(),
                message: format!("vertex {vertex} weights sum to {sum}, expected 1.0"),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::super::types::{Bone, BoneClass};
    use super::super::weights::{SparseWeightTable, normalize};
    use super::*;

    fn bone(name: &str, parent: Option<usize>, y: f32) -> Bone {
        Bone {
            head: Point3::new(0.0, y, 0.0),
            tail: Point3::new(0.0, y + 0.1, 0.0),
            parent,
            name: name.to_string(),
            class: BoneClass::Other,
        }
    }

    #[test]
    fn given_well_formed_skeleton_when_validating_then_no_issues() {
        let skeleton = Skeleton {
            bones: vec![bone("root", None, 0.0), bone("spine", Some(0), 0.3)],
        };
        assert!(validate_skeleton(&skeleton).is_empty());
    }

    #[test]
    fn given_violated_invariants_when_validating_then_each_is_reported() {
        let skeleton = Skeleton {
            bones: vec![
                bone("root", None, 0.0),
                bone("root", None, 0.5),
                Bone {
                    parent: Some(5),
                    ..bone("stray", None, 1.0)
                },
            ],
        };

        let issues = validate_skeleton(&skeleton);
        let codes: Vec<&str> = issues.iter().map(|issue| issue.code.as_str()).collect();
        assert!(codes.contains(&"PARENT_ORDER_VIOLATION"));
        assert!(codes.contains(&"ROOT_COUNT"));
        assert!(codes.contains(&"DUPLICATE_BONE_NAME"));
    }

    #[test]
    fn given_normalized_matrix_when_validating_sums_then_imputed_rows_pass() {
        let table = SparseWeightTable {
            bone_names: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![(0, 0.2), (1, 0.6)], vec![]],
        };
        let positions = [Point3::origin(), Point3::new(0.0, 1.0, 0.0)];
        let heads = [Point3::origin(), Point3::new(0.0, 1.0, 0.0)];

        let matrix = normalize(&table, 4, &positions, &heads).unwrap();
        assert!(validate_weight_sums(&matrix).is_empty());
    }
}
