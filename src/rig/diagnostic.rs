use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use super::merge::RiggedModel;
use super::types::{Severity, ValidationIssue};

// ─── Diagnostics report ───────────────────────────────────────────────────────

/// Non-fatal conditions accumulated across a rigging run, returned beside
/// the successful result so a caller can decide whether e.g. the
/// imputed-weight ratio is acceptable before exporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsReport {
    pub issues: Vec<ValidationIssue>,
    /// Weight-pipeline bone names that found no match in the final skeleton.
    pub unmatched_bones: Vec<String>,
    /// Vertices whose weights were imputed by the nearest-bone fallback.
    pub imputed_vertices: Vec<usize>,
    /// Vertices that kept no influence at all after the merge.
    pub unweighted_vertices: Vec<usize>,
}

impl DiagnosticsReport {
    pub fn push_issue(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend_issues(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }

    /// Fraction of vertices whose weight had to be imputed.
    pub fn imputed_ratio(&self, vertex_count: usize) -> f32 {
        if vertex_count == 0 {
            return 0.0;
        }
        self.imputed_vertices.len() as f32 / vertex_count as f32
    }
}

// ─── Diagnostic log file ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct BoneDiagnostic {
    index: usize,
    name: String,
    parent_index: Option<usize>,
    parent_name: Option<String>,
    head: [f32; 3],
    tail: [f32; 3],
    weighted_vertex_count: usize,
}

#[derive(Debug, Clone, Serialize)]
struct RigDiagnosticLog {
    output_path: String,
    bone_count: usize,
    vertex_count: usize,
    imputed_vertex_count: usize,
    unweighted_vertex_count: usize,
    unmatched_bones: Vec<String>,
    bones: Vec<BoneDiagnostic>,
    issues: Vec<ValidationIssue>,
}

/// Sibling path for the diagnostic dump of an exported model.
pub fn diagnostic_log_path_for_output(output_path: &Path) -> PathBuf {
    output_path.with_extension("diagnostic.json")
}

/// Write a per-bone diagnostic summary of an emitted model next to its
/// output file.
pub fn write_rig_diagnostic_log(
    output_path: &Path,
    diagnostic_path: &Path,
    model: &RiggedModel,
    report: &DiagnosticsReport,
) -> Result<()> {
    let bones = model
        .skeleton
        .bones
        .iter()
        .enumerate()
        .map(|(index, bone)| BoneDiagnostic {
            index,
            name: bone.name.clone(),
            parent_index: bone.parent,
            parent_name: bone
                .parent
                .map(|parent| model.skeleton.bones[parent].name.clone()),
            head: [bone.head.x, bone.head.y, bone.head.z],
            tail: [bone.tail.x, bone.tail.y, bone.tail.z],
            weighted_vertex_count: model
                .groups
                .get(index)
                .map(|group| group.entries.len())
                .unwrap_or(0),
        })
        .collect();

    let log = RigDiagnosticLog {
        output_path: output_path.display().to_string(),
        bone_count: model.skeleton.len(),
        vertex_count: model.positions.len(),
        imputed_vertex_count: report.imputed_vertices.len(),
        unweighted_vertex_count: report.unweighted_vertices.len(),
        unmatched_bones: report.unmatched_bones.clone(),
        bones,
        issues: report.issues.clone(),
    };

    let json_bytes =
        serde_json::to_vec_pretty(&log).context("failed to serialize rig diagnostic JSON")?;
    fs::write(diagnostic_path, json_bytes).with_context(|| {
        format!(
            "failed to write rig diagnostic log: {}",
            diagnostic_path.display()
        )
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_issues_when_checking_errors_then_only_error_severity_counts() {
        let mut report = DiagnosticsReport::default();
        report.push_issue(ValidationIssue {
            severity: Severity::Warning,
            code: "PARTIAL_CORRESPONDENCE".to_string(),
            message: "warning".to_string(),
        });
        assert!(!report.has_errors());

        report.push_issue(ValidationIssue {
            severity: Severity::Error,
            code: "INVALID_SKELETON".to_string(),
            message: "error".to_string(),
        });
        assert!(report.has_errors());
    }

    #[test]
    fn given_imputed_vertices_when_computing_ratio_then_division_is_guarded() {
        let mut report = DiagnosticsReport::default();
        report.imputed_vertices = vec![0, 5, 9];
        assert!((report.imputed_ratio(30) - 0.1).abs() < 1e-6);
        assert_eq!(report.imputed_ratio(0), 0.0);
    }

    #[test]
    fn given_output_path_when_deriving_diagnostic_path_then_extension_is_replaced() {
        let path = diagnostic_log_path_for_output(Path::new("/tmp/model.json"));
        assert_eq!(path, Path::new("/tmp/model.diagnostic.json"));
    }
}
