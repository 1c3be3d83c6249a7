use serde::{Deserialize, Serialize};

use crate::error::RigError;

use super::types::{BoneClass, Skeleton};

// ─── Vocabulary layout ────────────────────────────────────────────────────────

/// Printable ASCII range usable as bone-name characters.
const NAME_CHAR_FIRST: u32 = 0x20;
const NAME_CHAR_COUNT: u32 = 0x5f; // ' '..='~'

/// Closed token vocabulary shared by the sequence generator and this
/// decoder. Symbol ids are assigned in contiguous blocks:
///
/// ```text
/// 0                      end of sequence
/// 1                      end of bone
/// 2 .. +3*coord_bins     coordinates (x block, y block, z block)
/// .. +max_bones+1        parent refs (offset 0 = no parent)
/// .. +95                 name characters (printable ASCII)
/// .. +class_count        class tags
/// ```
///
/// The layout is read-only for the lifetime of the process; every decode and
/// encode call borrows it immutably.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VocabularyLayout {
    /// Quantization bins per coordinate axis.
    pub coord_bins: u32,
    /// Parent-reference address space; also the hard bone-count ceiling.
    pub max_bones: u32,
    /// Number of semantic class ids.
    pub class_count: u32,
    /// Lower bound of the coordinate range bins map into.
    pub coord_min: f32,
    /// Upper bound of the coordinate range bins map into.
    pub coord_max: f32,
}

impl Default for VocabularyLayout {
    fn default() -> Self {
        Self {
            coord_bins: 256,
            max_bones: 256,
            class_count: BoneClass::COUNT as u32,
            coord_min: -1.0,
            coord_max: 1.0,
        }
    }
}

const END_OF_SEQUENCE: u32 = 0;
const END_OF_BONE: u32 = 1;
const COORD_BASE: u32 = 2;

impl VocabularyLayout {
    fn parent_base(&self) -> u32 {
        COORD_BASE + 3 * self.coord_bins
    }

    fn name_base(&self) -> u32 {
        self.parent_base() + self.max_bones + 1
    }

    fn class_base(&self) -> u32 {
        self.name_base() + NAME_CHAR_COUNT
    }

    /// Total number of symbol ids this layout declares.
    pub fn vocab_size(&self) -> u32 {
        self.class_base() + self.class_count
    }

    /// Map a quantization bin to the center of its coordinate interval.
    pub fn dequantize(&self, bin: u32) -> f32 {
        let span = self.coord_max - self.coord_min;
        self.coord_min + (bin as f32 + 0.5) * span / self.coord_bins as f32
    }

    /// Map a coordinate into its quantization bin. `None` when the value
    /// falls outside the declared range; encoding never clamps silently.
    pub fn quantize(&self, value: f32) -> Option<u32> {
        if !value.is_finite() || value < self.coord_min || value > self.coord_max {
            return None;
        }
        let span = self.coord_max - self.coord_min;
        let bin = ((value - self.coord_min) / span * self.coord_bins as f32) as u32;
        Some(bin.min(self.coord_bins - 1))
    }

    fn coordinate_symbol(&self, axis: Axis, bin: u32) -> u32 {
        COORD_BASE + axis.index() as u32 * self.coord_bins + bin
    }

    fn parent_symbol(&self, parent: Option<usize>) -> u32 {
        match parent {
            None => self.parent_base(),
            Some(index) => self.parent_base() + 1 + index as u32,
        }
    }

    fn name_symbol(&self, ch: char) -> Option<u32> {
        let code = ch as u32;
        if (NAME_CHAR_FIRST..NAME_CHAR_FIRST + NAME_CHAR_COUNT).contains(&code) {
            Some(self.name_base() + (code - NAME_CHAR_FIRST))
        } else {
            None
        }
    }

    fn class_symbol(&self, id: u8) -> u32 {
        self.class_base() + id as u32
    }

    /// Classify a raw symbol id. `None` for ids outside the vocabulary.
    fn classify(&self, symbol: u32) -> Option<RawField> {
        if symbol == END_OF_SEQUENCE {
            return Some(RawField::EndOfSequence);
        }
        if symbol == END_OF_BONE {
            return Some(RawField::EndOfBone);
        }
        if symbol < self.parent_base() {
            let offset = symbol - COORD_BASE;
            let axis = Axis::from_index((offset / self.coord_bins) as usize)?;
            return Some(RawField::Coordinate {
                axis,
                bin: offset % self.coord_bins,
            });
        }
        if symbol < self.name_base() {
            let offset = symbol - self.parent_base();
            return Some(RawField::ParentRef(if offset == 0 {
                None
            } else {
                Some((offset - 1) as usize)
            }));
        }
        if symbol < self.class_base() {
            let code = NAME_CHAR_FIRST + (symbol - self.name_base());
            return Some(RawField::NameChar(char::from_u32(code)?));
        }
        if symbol < self.vocab_size() {
            return Some(RawField::ClassTag((symbol - self.class_base()) as u8));
        }
        None
    }
}

// ─── Typed fields ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            _ => None,
        }
    }
}

/// A decoded, typed field. The closed set makes an unhandled symbol kind a
/// compile-time-checkable omission in every downstream match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Coordinate { axis: Axis, value: f32 },
    ParentRef(Option<usize>),
    NameChar(char),
    ClassTag(u8),
    EndOfBone,
    EndOfSequence,
}

/// Pre-dequantization classification used internally by the decoder.
enum RawField {
    Coordinate { axis: Axis, bin: u32 },
    ParentRef(Option<usize>),
    NameChar(char),
    ClassTag(u8),
    EndOfBone,
    EndOfSequence,
}

// ─── Token stream file ────────────────────────────────────────────────────────

/// Serialized token stream as produced by the sequence generator: the
/// declared vocabulary plus the raw symbol ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStreamData {
    pub vocabulary: VocabularyLayout,
    pub symbols: Vec<u32>,
}

// ─── Decoder ──────────────────────────────────────────────────────────────────

/// Decode a raw symbol sequence into typed fields.
///
/// Decoding is positional and stateless per symbol with one exception: a
/// running counter enforces that coordinate components arrive in x, y, z
/// order within each bone. Symbols outside the vocabulary range and symbols
/// after the end-of-sequence marker are hard errors, never silently dropped;
/// silent drift between generator and decoder is exactly the mismatch class
/// this guards against.
pub fn decode(symbols: &[u32], vocab: &VocabularyLayout) -> Result<Vec<Field>, RigError> {
    let mut fields = Vec::with_capacity(symbols.len());
    let mut coord_count = 0usize;
    let mut finished = false;

    for (position, &symbol) in symbols.iter().enumerate() {
        if finished {
            return Err(RigError::MalformedSequence {
                position,
                reason: format!("symbol {symbol} arrived after end-of-sequence"),
            });
        }

        let raw = vocab
            .classify(symbol)
            .ok_or_else(|| RigError::MalformedSequence {
                position,
                reason: format!(
                    "symbol {symbol} is outside the vocabulary range (size {})",
                    vocab.vocab_size()
                ),
            })?;

        let field = match raw {
            RawField::Coordinate { axis, bin } => {
                let expected = Axis::from_index(coord_count % 3).unwrap_or(Axis::X);
                if axis != expected {
                    return Err(RigError::MalformedSequence {
                        position,
                        reason: format!(
                            "coordinate axis {axis:?} arrived where {expected:?} was expected"
                        ),
                    });
                }
                coord_count += 1;
                Field::Coordinate {
                    axis,
                    value: vocab.dequantize(bin),
                }
            }
            RawField::ParentRef(parent) => Field::ParentRef(parent),
            RawField::NameChar(ch) => Field::NameChar(ch),
            RawField::ClassTag(id) => Field::ClassTag(id),
            RawField::EndOfBone => {
                coord_count = 0;
                Field::EndOfBone
            }
            RawField::EndOfSequence => {
                finished = true;
                Field::EndOfSequence
            }
        };
        fields.push(field);
    }

    Ok(fields)
}

// ─── Encoder ──────────────────────────────────────────────────────────────────

/// Re-encode a skeleton into the flat symbol form, the exact inverse of
/// [`decode`] + [`super::skeleton::build`]. Skeletons that do not fit the
/// vocabulary (too many bones, out-of-range coordinates, non-ASCII names)
/// are rejected rather than clamped.
pub fn encode(skeleton: &Skeleton, vocab: &VocabularyLayout) -> Result<Vec<u32>, RigError> {
    if skeleton.len() > vocab.max_bones as usize {
        return Err(RigError::MalformedSequence {
            position: 0,
            reason: format!(
                "skeleton has {} bones but the vocabulary addresses at most {}",
                skeleton.len(),
                vocab.max_bones
            ),
        });
    }

    let mut symbols = Vec::new();
    for (bone_index, bone) in skeleton.bones.iter().enumerate() {
        for (point_index, point) in [bone.head, bone.tail].into_iter().enumerate() {
            for (axis, value) in [
                (Axis::X, point.x),
                (Axis::Y, point.y),
                (Axis::Z, point.z),
            ] {
                let bin = vocab.quantize(value).ok_or_else(|| RigError::MalformedSequence {
                    position: symbols.len(),
                    reason: format!(
                        "bone {bone_index} {} coordinate {value} is outside [{}, {}]",
                        if point_index == 0 { "head" } else { "tail" },
                        vocab.coord_min,
                        vocab.coord_max
                    ),
                })?;
                symbols.push(vocab.coordinate_symbol(axis, bin));
            }
        }

        symbols.push(vocab.parent_symbol(bone.parent));

        for ch in bone.name.chars() {
            let symbol = vocab
                .name_symbol(ch)
                .ok_or_else(|| RigError::MalformedSequence {
                    position: symbols.len(),
                    reason: format!("bone {bone_index} name contains unencodable character {ch:?}"),
                })?;
            symbols.push(symbol);
        }

        symbols.push(vocab.class_symbol(bone.class.id()));
        symbols.push(END_OF_BONE);
    }
    symbols.push(END_OF_SEQUENCE);

    Ok(symbols)
}
