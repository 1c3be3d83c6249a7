use std::collections::HashSet;

use log::debug;
use nalgebra::Point3;

use crate::error::RigError;

use super::token::{Axis, Field};
use super::types::{Bone, BoneClass, Skeleton, synthesize_tail};

// ─── Build options ────────────────────────────────────────────────────────────

/// Options for assembling decoded fields into a skeleton.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Adopt all rootless bones under one inserted root instead of failing
    /// when more than one bone decodes without a parent.
    pub synthetic_root: bool,
    /// Segment length used when a bone carries no explicit tail.
    pub tail_offset: f32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            synthetic_root: false,
            tail_offset: 0.1,
        }
    }
}

// ─── Builder state ────────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingBone {
    coords: Vec<f32>,
    name: String,
    parent: Option<Option<usize>>,
    class_tag: Option<u8>,
    touched: bool,
}

impl PendingBone {
    fn note(&mut self) {
        self.touched = true;
    }
}

// ─── Tree builder ─────────────────────────────────────────────────────────────

/// Assemble decoded fields into a well-formed skeleton.
///
/// Bones are finalized in arrival order on each `EndOfBone`; a parent
/// reference must point at an already-finalized bone, which enforces the
/// parents-precede-children invariant structurally. Head is the first
/// coordinate triple; an optional second triple is the explicit tail,
/// otherwise the tail is synthesized along the parent direction. Nameless
/// bones get a `bone_<index>` placeholder and duplicate names are suffixed
/// with a counter, since downstream correspondence matches by name and would
/// otherwise silently merge distinct bones.
pub fn build(fields: &[Field], options: &BuildOptions) -> Result<Skeleton, RigError> {
    let mut bones: Vec<Bone> = Vec::new();
    let mut used_names: HashSet<String> = HashSet::new();
    let mut pending = PendingBone::default();

    for (position, field) in fields.iter().enumerate() {
        match field {
            Field::Coordinate { axis, value } => {
                pending.note();
                // The decoder already enforced the x,y,z cycle; re-check the
                // invariant here so hand-built field lists fail loudly too.
                let expected = pending.coords.len() % 3;
                if axis.index() != expected {
                    return Err(RigError::MalformedSequence {
                        position,
                        reason: format!(
                            "coordinate axis {axis:?} arrived at component offset {expected}"
                        ),
                    });
                }
                if pending.coords.len() >= 6 {
                    return Err(RigError::MalformedSequence {
                        position,
                        reason: format!(
                            "bone {} carries more than two coordinate triples",
                            bones.len()
                        ),
                    });
                }
                pending.coords.push(*value);
            }
            Field::ParentRef(parent) => {
                pending.note();
                if pending.parent.is_some() {
                    return Err(RigError::MalformedSequence {
                        position,
                        reason: format!("bone {} declares two parent references", bones.len()),
                    });
                }
                pending.parent = Some(*parent);
            }
            Field::NameChar(ch) => {
                pending.note();
                pending.name.push(*ch);
            }
            Field::ClassTag(id) => {
                pending.note();
                pending.class_tag = Some(*id);
            }
            Field::EndOfBone => {
                let bone = finalize_bone(pending, &bones, &mut used_names, options, position)?;
                bones.push(bone);
                pending = PendingBone::default();
            }
            Field::EndOfSequence => break,
        }
    }

    if pending.touched {
        return Err(RigError::MalformedSequence {
            position: fields.len(),
            reason: format!(
                "sequence ended with bone {} still open (no end-of-bone marker)",
                bones.len()
            ),
        });
    }

    if bones.is_empty() {
        return Err(RigError::MalformedSequence {
            position: fields.len(),
            reason: "sequence contained no bones".to_string(),
        });
    }

    let mut skeleton = Skeleton { bones };

    let roots = skeleton.root_count();
    if options.synthetic_root {
        skeleton = adopt_under_synthetic_root(skeleton, &mut used_names, options.tail_offset);
    } else if roots != 1 {
        return Err(RigError::MultipleRoots { count: roots });
    }

    debug!(
        "built skeleton: {} bones, {} root(s)",
        skeleton.len(),
        skeleton.root_count()
    );
    Ok(skeleton)
}

fn finalize_bone(
    pending: PendingBone,
    bones: &[Bone],
    used_names: &mut HashSet<String>,
    options: &BuildOptions,
    position: usize,
) -> Result<Bone, RigError> {
    let bone_index = bones.len();

    let (head, explicit_tail) = match pending.coords.len() {
        3 => (
            Point3::new(pending.coords[0], pending.coords[1], pending.coords[2]),
            None,
        ),
        6 => (
            Point3::new(pending.coords[0], pending.coords[1], pending.coords[2]),
            Some(Point3::new(
                pending.coords[3],
                pending.coords[4],
                pending.coords[5],
            )),
        ),
        count => {
            return Err(RigError::MalformedSequence {
                position,
                reason: format!(
                    "bone {bone_index} has {count} coordinate components; expected 3 or 6"
                ),
            });
        }
    };

    let parent = match pending.parent.unwrap_or(None) {
        None => None,
        Some(parent_index) => {
            if parent_index >= bone_index {
                return Err(RigError::InvalidParent {
                    bone: bone_index,
                    parent: parent_index,
                });
            }
            Some(parent_index)
        }
    };

    let tail = explicit_tail.unwrap_or_else(|| {
        synthesize_tail(head, parent.map(|p| bones[p].head), options.tail_offset)
    });

    let base_name = if pending.name.is_empty() {
        format!("bone_{bone_index}")
    } else {
        pending.name
    };
    let name = disambiguate_name(base_name, used_names);

    // An explicit class tag wins over the name heuristic; an unknown tag id
    // falls back to the heuristic rather than aborting the sample.
    let class = pending
        .class_tag
        .and_then(BoneClass::from_id)
        .unwrap_or_else(|| BoneClass::infer_from_name(&name));

    Ok(Bone {
        head,
        tail,
        parent,
        name,
        class,
    })
}

/// Suffix a duplicate name with a counter, re-checking each candidate so a
/// literal `spine_1` already present in the input cannot collide with a
/// generated suffix.
fn disambiguate_name(base: String, used_names: &mut HashSet<String>) -> String {
    if used_names.insert(base.clone()) {
        return base;
    }
    let mut counter = 1usize;
    loop {
        let candidate = format!("{base}_{counter}");
        if used_names.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Insert one root at index 0 and reparent every originally-rootless bone
/// under it, shifting all existing indices by one.
fn adopt_under_synthetic_root(
    skeleton: Skeleton,
    used_names: &mut HashSet<String>,
    tail_offset: f32,
) -> Skeleton {
    let name = disambiguate_name("armature_root".to_string(), used_names);
    let mut bones = Vec::with_capacity(skeleton.len() + 1);
    bones.push(Bone {
        head: Point3::origin(),
        tail: synthesize_tail(Point3::origin(), None, tail_offset),
        parent: None,
        name,
        class: BoneClass::Root,
    });
    for bone in skeleton.bones {
        bones.push(Bone {
            parent: Some(bone.parent.map(|p| p + 1).unwrap_or(0)),
            ..bone
        });
    }
    Skeleton { bones }
}

// Re-exported for the builder's callers; fields reference this when
// constructing sequences by hand.
pub(super) fn coordinate_triple(point: Point3<f32>) -> [Field; 3] {
    [
        Field::Coordinate {
            axis: Axis::X,
            value: point.x,
        },
        Field::Coordinate {
            axis: Axis::Y,
            value: point.y,
        },
        Field::Coordinate {
            axis: Axis::Z,
            value: point.z,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone_fields(head: Point3<f32>, parent: Option<usize>, name: &str) -> Vec<Field> {
        let mut fields = coordinate_triple(head).to_vec();
        fields.push(Field::ParentRef(parent));
        fields.extend(name.chars().map(Field::NameChar));
        fields.push(Field::EndOfBone);
        fields
    }

    fn three_bone_fields() -> Vec<Field> {
        let mut fields = bone_fields(Point3::origin(), None, "root");
        fields.extend(bone_fields(Point3::new(0.0, 0.3, 0.0), Some(0), "spine"));
        fields.extend(bone_fields(Point3::new(0.0, 0.6, 0.0), Some(1), "head"));
        fields.push(Field::EndOfSequence);
        fields
    }

    #[test]
    fn given_valid_fields_when_building_then_parents_precede_children() {
        let skeleton = build(&three_bone_fields(), &BuildOptions::default()).unwrap();

        assert_eq!(skeleton.len(), 3);
        assert_eq!(skeleton.root_count(), 1);
        for (index, bone) in skeleton.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                assert!(parent < index);
            }
        }
        assert_eq!(skeleton.bones[1].name, "spine");
        assert_eq!(skeleton.bones[1].class, BoneClass::Spine);
    }

    #[test]
    fn given_forward_parent_reference_when_building_then_invalid_parent_is_reported() {
        let mut fields = bone_fields(Point3::origin(), Some(0), "a");
        fields.push(Field::EndOfSequence);

        match build(&fields, &BuildOptions::default()) {
            Err(RigError::InvalidParent { bone: 0, parent: 0 }) => {}
            other => panic!("expected InvalidParent, got {other:?}"),
        }
    }

    #[test]
    fn given_duplicate_names_when_building_then_counter_suffix_disambiguates() {
        let mut fields = bone_fields(Point3::origin(), None, "spine");
        fields.extend(bone_fields(Point3::new(0.0, 0.3, 0.0), Some(0), "spine"));
        fields.extend(bone_fields(Point3::new(0.0, 0.6, 0.0), Some(1), "spine"));
        fields.push(Field::EndOfSequence);

        let skeleton = build(&fields, &BuildOptions::default()).unwrap();
        let names: Vec<&str> = skeleton.bones.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["spine", "spine_1", "spine_2"]);
    }

    #[test]
    fn given_nameless_bone_when_building_then_placeholder_is_generated() {
        let mut fields = coordinate_triple(Point3::origin()).to_vec();
        fields.push(Field::ParentRef(None));
        fields.push(Field::EndOfBone);
        fields.push(Field::EndOfSequence);

        let skeleton = build(&fields, &BuildOptions::default()).unwrap();
        assert_eq!(skeleton.bones[0].name, "bone_0");
    }

    #[test]
    fn given_no_explicit_tail_when_building_then_tail_follows_parent_direction() {
        let skeleton = build(&three_bone_fields(), &BuildOptions::default()).unwrap();

        let spine = &skeleton.bones[1];
        let expected = Point3::new(0.0, 0.4, 0.0);
        assert!((spine.tail - expected).norm() < 1e-6);

        // Root has no parent direction; it points up.
        let root = &skeleton.bones[0];
        assert!((root.tail - Point3::new(0.0, 0.1, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn given_explicit_tail_triple_when_building_then_tail_is_kept() {
        let mut fields = coordinate_triple(Point3::origin()).to_vec();
        fields.extend(coordinate_triple(Point3::new(0.5, 0.5, 0.0)));
        fields.push(Field::ParentRef(None));
        fields.push(Field::EndOfBone);
        fields.push(Field::EndOfSequence);

        let skeleton = build(&fields, &BuildOptions::default()).unwrap();
        assert!((skeleton.bones[0].tail - Point3::new(0.5, 0.5, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn given_two_roots_without_synthetic_root_then_build_fails() {
        let mut fields = bone_fields(Point3::origin(), None, "a");
        fields.extend(bone_fields(Point3::new(1.0, 0.0, 0.0), None, "b"));
        fields.push(Field::EndOfSequence);

        match build(&fields, &BuildOptions::default()) {
            Err(RigError::MultipleRoots { count: 2 }) => {}
            other => panic!("expected MultipleRoots, got {other:?}"),
        }
    }

    #[test]
    fn given_two_roots_with_synthetic_root_then_all_are_adopted() {
        let mut fields = bone_fields(Point3::origin(), None, "a");
        fields.extend(bone_fields(Point3::new(1.0, 0.0, 0.0), None, "b"));
        fields.push(Field::EndOfSequence);

        let options = BuildOptions {
            synthetic_root: true,
            ..BuildOptions::default()
        };
        let skeleton = build(&fields, &options).unwrap();

        assert_eq!(skeleton.len(), 3);
        assert_eq!(skeleton.root_count(), 1);
        assert_eq!(skeleton.bones[0].name, "armature_root");
        assert_eq!(skeleton.bones[1].parent, Some(0));
        assert_eq!(skeleton.bones[2].parent, Some(0));
    }

    #[test]
    fn given_truncated_trailing_bone_when_building_then_sequence_is_rejected() {
        let mut fields = bone_fields(Point3::origin(), None, "root");
        fields.extend(coordinate_triple(Point3::new(0.0, 0.3, 0.0)));
        // No EndOfBone for the second bone.

        match build(&fields, &BuildOptions::default()) {
            Err(RigError::MalformedSequence { .. }) => {}
            other => panic!("expected MalformedSequence, got {other:?}"),
        }
    }

    #[test]
    fn given_explicit_class_tag_when_name_disagrees_then_tag_wins() {
        let mut fields = coordinate_triple(Point3::origin()).to_vec();
        fields.push(Field::ParentRef(None));
        fields.extend("spine".chars().map(Field::NameChar));
        fields.push(Field::ClassTag(BoneClass::Hand.id()));
        fields.push(Field::EndOfBone);
        fields.push(Field::EndOfSequence);

        let skeleton = build(&fields, &BuildOptions::default()).unwrap();
        assert_eq!(skeleton.bones[0].class, BoneClass::Hand);
    }

    #[test]
    fn given_wrong_coordinate_component_order_when_building_then_rejected() {
        let fields = vec![
            Field::Coordinate {
                axis: Axis::Y,
                value: 0.0,
            },
            Field::EndOfBone,
        ];

        match build(&fields, &BuildOptions::default()) {
            Err(RigError::MalformedSequence { position: 0, .. }) => {}
            other => panic!("expected MalformedSequence, got {other:?}"),
        }
    }
}
