use std::collections::HashMap;

use super::types::{Severity, Skeleton, ValidationIssue};

// ─── Correspondence map ───────────────────────────────────────────────────────

/// Name-based bone matching between two independently enumerated skeletons.
///
/// Bone indices are not stable across sub-pipelines, so exact name equality
/// is the only identifier used; the map is partial by construction and the
/// unmatched names are first-class data, not a log line.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceMap {
    /// Source bone name → bone index in the target skeleton.
    pub matched: HashMap<String, usize>,
    /// Source bone names absent from the target, in traversal order.
    pub unmatched: Vec<String>,
}

impl CorrespondenceMap {
    pub fn match_count(&self) -> usize {
        self.matched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }

    /// Warning issue describing a partial match, or `None` when every source
    /// bone found a target.
    pub fn partial_issue(&self) -> Option<ValidationIssue> {
        if self.unmatched.is_empty() {
            return None;
        }
        Some(ValidationIssue {
            severity: Severity::Warning,
            code: "PARTIAL_CORRESPONDENCE".to_string(),
            message: format!(
                "{} of {} source bones have no target match: {}",
                self.unmatched.len(),
                self.matched.len() + self.unmatched.len(),
                self.unmatched.join(", ")
            ),
        })
    }
}

// ─── Resolver ─────────────────────────────────────────────────────────────────

/// Match every bone of `source` against `target` by exact name equality.
///
/// Pure; builds the target name index once so resolution is linear in the
/// two bone counts. When the target carries duplicate names (possible for
/// armatures imported from outside this crate) the first occurrence wins.
pub fn resolve(source: &Skeleton, target: &Skeleton) -> CorrespondenceMap {
    let target_index = target.name_index();

    let mut map = CorrespondenceMap::default();
    for bone in &source.bones {
        match target_index.get(bone.name.as_str()) {
            Some(&target_bone) => {
                map.matched.insert(bone.name.clone(), target_bone);
            }
            None => map.unmatched.push(bone.name.clone()),
        }
    }
    map
}
