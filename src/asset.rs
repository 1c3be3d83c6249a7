//! Boundary to the external content tooling: glTF import of a mesh/armature
//! pairing and JSON export of rigged models and intermediate skeletons. The
//! core never reaches into ambient tool state; everything crosses this
//! boundary as explicit values.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result, bail};
use log::{debug, info};
use nalgebra::{Matrix4, Point3};
use serde::{Deserialize, Serialize};

use crate::rig::{
    Bone, BoneClass, GroupEntry, Mesh, RiggedModel, Skeleton, SkeletonData, TokenStreamData,
    VertexGroup,
};

// ─── Token stream files ───────────────────────────────────────────────────────

/// Load a serialized token stream (declared vocabulary + raw symbols).
pub fn load_token_stream(path: &Path) -> Result<TokenStreamData> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read token stream: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse token stream JSON: {}", path.display()))
}

// ─── Skeleton files ───────────────────────────────────────────────────────────

/// Load a skeleton from its persisted wire form.
pub fn load_skeleton(path: &Path, tail_offset: f32) -> Result<Skeleton> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read skeleton: {}", path.display()))?;
    let data: SkeletonData = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse skeleton JSON: {}", path.display()))?;
    data.into_skeleton(tail_offset)
        .with_context(|| format!("invalid skeleton data: {}", path.display()))
}

/// Persist a skeleton in its wire form.
pub fn save_skeleton(path: &Path, skeleton: &Skeleton) -> Result<()> {
    let data = SkeletonData::from_skeleton(skeleton);
    let bytes = serde_json::to_vec_pretty(&data).context("failed to serialize skeleton")?;
    fs::write(path, bytes)
        .with_context(|| format!("failed to write skeleton: {}", path.display()))?;
    Ok(())
}

// ─── glTF import ──────────────────────────────────────────────────────────────

/// Import a mesh and, when the file carries a skin, its armature.
///
/// Geometry is concatenated across all mesh nodes in document order so that
/// vertex indices are stable for the whole file. Vertex groups come from the
/// first skin's JOINTS_0/WEIGHTS_0 attributes, named after the skin's joint
/// nodes; the armature is the first skin's joint set reordered depth-first
/// so parents precede children.
pub fn import_mesh(path: &Path) -> Result<(Mesh, Option<Skeleton>)> {
    let (document, buffers, _images) = gltf::import(path)
        .with_context(|| format!("failed to read glTF/GLB: {}", path.display()))?;

    let primary_skin = document.skins().next();
    let primary_skin_index = primary_skin.as_ref().map(|skin| skin.index());

    let (armature, node_to_bone) = match &primary_skin {
        Some(skin) => {
            let (armature, node_to_bone) = armature_from_skin(&document, skin)?;
            (Some(armature), node_to_bone)
        }
        None => (None, HashMap::new()),
    };

    // Joint slot → bone name, for translating JOINTS_0 lanes into groups.
    let slot_names: Vec<Option<String>> = match (&primary_skin, &armature) {
        (Some(skin), Some(armature)) => skin
            .joints()
            .map(|joint| {
                node_to_bone
                    .get(&joint.index())
                    .map(|&bone| armature.bones[bone].name.clone())
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut positions: Vec<Point3<f32>> = Vec::new();
    let mut group_entries: HashMap<String, Vec<GroupEntry>> = HashMap::new();

    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let node_uses_primary_skin = node
            .skin()
            .map(|skin| Some(skin.index()) == primary_skin_index)
            .unwrap_or(false);

        for primitive in mesh.primitives() {
            let reader =
                primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &*data.0));
            let Some(position_iter) = reader.read_positions() else {
                continue;
            };
            let base = positions.len();
            positions.extend(position_iter.map(|p| Point3::new(p[0], p[1], p[2])));
            let vertex_count = positions.len() - base;

            if !node_uses_primary_skin {
                continue;
            }
            let (Some(joints), Some(weights)) = (reader.read_joints(0), reader.read_weights(0))
            else {
                continue;
            };

            for (vertex_offset, (lanes, lane_weights)) in
                joints.into_u16().zip(weights.into_f32()).enumerate()
            {
                if vertex_offset >= vertex_count {
                    break;
                }
                for lane in 0..4 {
                    let weight = lane_weights[lane];
                    if weight <= 0.0 {
                        continue;
                    }
                    let Some(Some(name)) = slot_names.get(lanes[lane] as usize) else {
                        continue;
                    };
                    group_entries
                        .entry(name.clone())
                        .or_default()
                        .push(GroupEntry {
                            vertex: base + vertex_offset,
                            weight,
                        });
                }
            }
        }
    }

    if positions.is_empty() {
        bail!("no mesh geometry found in {}", path.display());
    }

    // Emit groups in armature traversal order for determinism.
    let groups = match &armature {
        Some(armature) => armature
            .bones
            .iter()
            .filter_map(|bone| {
                group_entries.remove(&bone.name).map(|entries| VertexGroup {
                    name: bone.name.clone(),
                    entries,
                })
            })
            .collect(),
        None => Vec::new(),
    };

    info!(
        "imported {}: {} vertices, {} groups, {} armature bones",
        path.display(),
        positions.len(),
        groups.len(),
        armature.as_ref().map(Skeleton::len).unwrap_or(0)
    );

    Ok((Mesh { positions, groups }, armature))
}

/// Build a parent-ordered skeleton from a glTF skin's joint set. Also
/// returns the joint-node-index → bone-index map for attribute translation.
fn armature_from_skin(
    document: &gltf::Document,
    skin: &gltf::Skin,
) -> Result<(Skeleton, HashMap<usize, usize>)> {
    let joint_nodes: Vec<usize> = skin.joints().map(|joint| joint.index()).collect();
    if joint_nodes.is_empty() {
        bail!("skin {} has no joints", skin.index());
    }
    let joint_set: HashSet<usize> = joint_nodes.iter().copied().collect();

    let parent_map = collect_parent_index_map(document);
    let world_matrices = compute_node_world_matrices(document);

    // Nearest ancestor that is itself a joint of this skin.
    let joint_parent = |node: usize| -> Option<usize> {
        let mut current = parent_map.get(&node).copied();
        while let Some(ancestor) = current {
            if joint_set.contains(&ancestor) {
                return Some(ancestor);
            }
            current = parent_map.get(&ancestor).copied();
        }
        None
    };

    // Depth-first order over the joint forest so parents precede children.
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for &node in &joint_nodes {
        match joint_parent(node) {
            Some(parent) => children.entry(parent).or_default().push(node),
            None => roots.push(node),
        }
    }
    let mut order = Vec::with_capacity(joint_nodes.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        order.push(node);
        if let Some(child_nodes) = children.get(&node) {
            for &child in child_nodes.iter().rev() {
                stack.push(child);
            }
        }
    }
    if order.len() != joint_nodes.len() {
        bail!(
            "skin {} joint hierarchy is not a forest ({} of {} joints reachable)",
            skin.index(),
            order.len(),
            joint_nodes.len()
        );
    }

    let node_to_bone: HashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(bone_index, &node)| (node, bone_index))
        .collect();

    let world_translation = |node: usize| -> Point3<f32> {
        let matrix = world_matrices
            .get(&node)
            .copied()
            .unwrap_or_else(Matrix4::identity);
        Point3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)])
    };

    let mut used_names = HashSet::new();
    let mut bones = Vec::with_capacity(order.len());
    for &node in &order {
        let head = world_translation(node);

        // Tail: first child joint's head, or a short segment straight up.
        let tail = children
            .get(&node)
            .and_then(|child_nodes| child_nodes.first())
            .map(|&child| world_translation(child))
            .filter(|tail| (*tail - head).norm() > 1e-6)
            .unwrap_or_else(|| head + nalgebra::Vector3::y() * 0.1);

        let base_name = document
            .nodes()
            .nth(node)
            .and_then(|n| n.name().map(ToOwned::to_owned))
            .unwrap_or_else(|| format!("joint_{node}"));
        let mut name = base_name.clone();
        let mut counter = 1usize;
        while !used_names.insert(name.clone()) {
            name = format!("{base_name}_{counter}");
            counter += 1;
        }

        bones.push(Bone {
            head,
            tail,
            parent: joint_parent(node).map(|parent| node_to_bone[&parent]),
            class: BoneClass::infer_from_name(&name),
            name,
        });
    }

    debug!(
        "armature from skin {}: {} bones, {} root(s)",
        skin.index(),
        bones.len(),
        roots.len()
    );
    Ok((Skeleton { bones }, node_to_bone))
}

/// Build a child→parent node-index map for the whole document.
fn collect_parent_index_map(document: &gltf::Document) -> HashMap<usize, usize> {
    let mut parent_map = HashMap::new();
    for parent in document.nodes() {
        for child in parent.children() {
            parent_map.insert(child.index(), parent.index());
        }
    }
    parent_map
}

/// World transform per node index, composed scene by scene.
fn compute_node_world_matrices(document: &gltf::Document) -> HashMap<usize, Matrix4<f32>> {
    fn visit(
        node: gltf::Node,
        parent_world: Matrix4<f32>,
        out: &mut HashMap<usize, Matrix4<f32>>,
    ) {
        let local = node.transform().matrix();
        let local = Matrix4::from_fn(|row, column| local[column][row]);
        let world = parent_world * local;
        out.insert(node.index(), world);
        for child in node.children() {
            visit(child, world, out);
        }
    }

    let mut out = HashMap::new();
    for scene in document.scenes() {
        for node in scene.nodes() {
            visit(node, Matrix4::identity(), &mut out);
        }
    }
    out
}

// ─── Rigged model export ──────────────────────────────────────────────────────

/// Wire form of an emitted model, handed to the (out-of-scope) export step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiggedModelData {
    pub positions: Vec<[f32; 3]>,
    pub skeleton: SkeletonData,
    pub groups: Vec<VertexGroup>,
    pub unweighted: Vec<usize>,
}

impl RiggedModelData {
    pub fn from_model(model: &RiggedModel) -> Self {
        Self {
            positions: model.positions.iter().map(|p| [p.x, p.y, p.z]).collect(),
            skeleton: SkeletonData::from_skeleton(&model.skeleton),
            groups: model.groups.clone(),
            unweighted: model.unweighted.clone(),
        }
    }
}

/// Serialize an emitted model to JSON.
pub fn export_rigged_model(path: &Path, model: &RiggedModel) -> Result<()> {
    let data = RiggedModelData::from_model(model);
    let bytes = serde_json::to_vec_pretty(&data).context("failed to serialize rigged model")?;
    fs::write(path, bytes)
        .with_context(|| format!("failed to write rigged model: {}", path.display()))?;
    info!(
        "exported {}: {} vertices, {} bones",
        path.display(),
        data.positions.len(),
        data.skeleton.names.len()
    );
    Ok(())
}
