use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::RigError;

// ─── Semantic bone classes ────────────────────────────────────────────────────

/// Semantic class attached to each bone. Used only as metadata by consumers;
/// the core never branches on it except when inferring a class from a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoneClass {
    Root,
    Spine,
    Head,
    Arm,
    Hand,
    Leg,
    Foot,
    Tail,
    Other,
}

/// Name-fragment hints used to infer a class when the decoded sequence did
/// not carry an explicit class tag. Scanned in order; the first matching
/// fragment wins, so the more specific entries (`hips` before `hip`) come
/// first.
const CLASS_NAME_HINTS: [(&str, BoneClass); 29] = [
    ("pelvis", BoneClass::Root),
    ("hips", BoneClass::Root),
    ("root", BoneClass::Root),
    ("spine", BoneClass::Spine),
    ("chest", BoneClass::Spine),
    ("torso", BoneClass::Spine),
    ("neck", BoneClass::Head),
    ("head", BoneClass::Head),
    ("wrist", BoneClass::Hand),
    ("hand", BoneClass::Hand),
    ("thumb", BoneClass::Hand),
    ("index", BoneClass::Hand),
    ("middle", BoneClass::Hand),
    ("ring", BoneClass::Hand),
    ("pinky", BoneClass::Hand),
    ("little", BoneClass::Hand),
    ("finger", BoneClass::Hand),
    ("collar", BoneClass::Arm),
    ("shoulder", BoneClass::Arm),
    ("elbow", BoneClass::Arm),
    ("arm", BoneClass::Arm),
    ("ankle", BoneClass::Foot),
    ("foot", BoneClass::Foot),
    ("toe", BoneClass::Foot),
    ("thigh", BoneClass::Leg),
    ("knee", BoneClass::Leg),
    ("leg", BoneClass::Leg),
    ("hip", BoneClass::Leg),
    ("tail", BoneClass::Tail),
];

impl BoneClass {
    /// Number of class ids reserved in the token vocabulary.
    pub const COUNT: u8 = 9;

    pub fn id(self) -> u8 {
        match self {
            Self::Root => 0,
            Self::Spine => 1,
            Self::Head => 2,
            Self::Arm => 3,
            Self::Hand => 4,
            Self::Leg => 5,
            Self::Foot => 6,
            Self::Tail => 7,
            Self::Other => 8,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Root),
            1 => Some(Self::Spine),
            2 => Some(Self::Head),
            3 => Some(Self::Arm),
            4 => Some(Self::Hand),
            5 => Some(Self::Leg),
            6 => Some(Self::Foot),
            7 => Some(Self::Tail),
            8 => Some(Self::Other),
            _ => None,
        }
    }

    /// Infer a class from a bone name via the hint table.
    pub fn infer_from_name(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        CLASS_NAME_HINTS
            .iter()
            .find(|(fragment, _)| lowered.contains(fragment))
            .map(|(_, class)| *class)
            .unwrap_or(Self::Other)
    }
}

// ─── Skeleton ─────────────────────────────────────────────────────────────────

/// A single bone: head joint, tail position (which may be synthesized and is
/// not itself a joint), parent link, stable name and semantic class.
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub head: Point3<f32>,
    pub tail: Point3<f32>,
    /// Index of the parent bone; `None` for the root. Always less than this
    /// bone's own index.
    pub parent: Option<usize>,
    /// Unique within the owning skeleton; the only identifier that is stable
    /// across independently run sub-pipelines.
    pub name: String,
    pub class: BoneClass,
}

/// An ordered bone list in which parents always precede children, so a
/// single forward traversal visits every parent before its descendants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn root_count(&self) -> usize {
        self.bones.iter().filter(|bone| bone.parent.is_none()).count()
    }

    /// Bone-name → index lookup. First occurrence wins when the skeleton was
    /// produced outside this crate and carries duplicate names.
    pub fn name_index(&self) -> std::collections::HashMap<&str, usize> {
        let mut index = std::collections::HashMap::new();
        for (bone_index, bone) in self.bones.iter().enumerate() {
            index.entry(bone.name.as_str()).or_insert(bone_index);
        }
        index
    }

    pub fn heads(&self) -> Vec<Point3<f32>> {
        self.bones.iter().map(|bone| bone.head).collect()
    }
}

// ─── Mesh ─────────────────────────────────────────────────────────────────────

/// One vertex's membership in a named vertex group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub vertex: usize,
    pub weight: f32,
}

/// A named vertex group: the group→vertex-list layout that keeps weight
/// extraction linear in the number of memberships actually present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexGroup {
    pub name: String,
    pub entries: Vec<GroupEntry>,
}

/// Mesh geometry plus its named vertex groups. Topology beyond the vertex
/// list is irrelevant to the core and is not carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Point3<f32>>,
    pub groups: Vec<VertexGroup>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

// ─── Validation issues ────────────────────────────────────────────────────────

/// Severity level used by validation issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single non-fatal issue produced during rigging, accumulated into the
/// diagnostics report returned beside successful results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

// ─── Persisted skeleton format ────────────────────────────────────────────────

/// Wire form of a skeleton as exchanged at component boundaries: flat
/// position arrays, parent indices with a `-1` root sentinel, names, optional
/// tails and per-bone class ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonData {
    pub joints: Vec<[f32; 3]>,
    pub parents: Vec<i32>,
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tails: Option<Vec<[f32; 3]>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<u8>,
}

impl SkeletonData {
    pub fn from_skeleton(skeleton: &Skeleton) -> Self {
        Self {
            joints: skeleton
                .bones
                .iter()
                .map(|bone| [bone.head.x, bone.head.y, bone.head.z])
                .collect(),
            parents: skeleton
                .bones
                .iter()
                .map(|bone| bone.parent.map(|p| p as i32).unwrap_or(-1))
                .collect(),
            names: skeleton.bones.iter().map(|bone| bone.name.clone()).collect(),
            tails: Some(
                skeleton
                    .bones
                    .iter()
                    .map(|bone| [bone.tail.x, bone.tail.y, bone.tail.z])
                    .collect(),
            ),
            classes: skeleton.bones.iter().map(|bone| bone.class.id()).collect(),
        }
    }

    /// Convert into a [`Skeleton`], enforcing the parent-ordering invariant.
    /// Missing tails are synthesized a fixed offset along the parent
    /// direction so every bone renders a non-zero-length segment.
    pub fn into_skeleton(self, tail_offset: f32) -> Result<Skeleton, RigError> {
        let count = self.joints.len();
        if self.parents.len() != count || self.names.len() != count {
            return Err(RigError::MalformedSequence {
                position: 0,
                reason: format!(
                    "skeleton data arrays disagree on bone count: {} joints, {} parents, {} names",
                    count,
                    self.parents.len(),
                    self.names.len()
                ),
            });
        }

        let mut bones: Vec<Bone> = Vec::with_capacity(count);
        for (bone_index, position) in self.joints.iter().enumerate() {
            let head = Point3::new(position[0], position[1], position[2]);

            let parent = match self.parents[bone_index] {
                sentinel if sentinel < 0 => None,
                parent_index => {
                    let parent_index = parent_index as usize;
                    if parent_index >= bone_index {
                        return Err(RigError::InvalidParent {
                            bone: bone_index,
                            parent: parent_index,
                        });
                    }
                    Some(parent_index)
                }
            };

            let tail = match self.tails.as_ref().and_then(|tails| tails.get(bone_index)) {
                Some(tail) => Point3::new(tail[0], tail[1], tail[2]),
                None => synthesize_tail(head, parent.map(|p: usize| bones[p].head), tail_offset),
            };

            let class = self
                .classes
                .get(bone_index)
                .and_then(|id| BoneClass::from_id(*id))
                .unwrap_or_else(|| BoneClass::infer_from_name(&self.names[bone_index]));

            bones.push(Bone {
                head,
                tail,
                parent,
                name: self.names[bone_index].clone(),
                class,
            });
        }

        Ok(Skeleton { bones })
    }
}

/// Tail fallback shared by the tree builder and the wire-format conversion:
/// offset along the parent→head direction, or straight up when that
/// direction is degenerate.
pub(super) fn synthesize_tail(
    head: Point3<f32>,
    parent_head: Option<Point3<f32>>,
    tail_offset: f32,
) -> Point3<f32> {
    let direction = parent_head
        .map(|parent| head - parent)
        .filter(|d| d.norm() > 1e-6)
        .map(|d| d.normalize())
        .unwrap_or_else(|| nalgebra::Vector3::y());
    head + direction * tail_offset
}
