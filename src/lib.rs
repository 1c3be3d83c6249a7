//! Automatic character rigging core.
//!
//! Turns a flat, autoregressively generated token sequence into a joint
//! skeleton, extracts and normalizes per-vertex bone influences from a
//! mesh/armature pairing, and merges the result onto a target mesh by
//! bone-name correspondence. Mesh I/O crosses the [`asset`] boundary as
//! explicit values; everything in [`rig`] is pure and synchronous.

pub mod asset;
pub mod error;
pub mod rig;

pub use error::RigError;
