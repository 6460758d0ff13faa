//! Recipe codec.
//!
//! A recipe is an opaque, versioned encoding of a decision log, bound to the
//! structural shape of the expression that produced it. The payload is a
//! hand-rolled big-endian binary format rendered as hex: a version byte, an
//! eight-byte prefix of the expression's shape digest, the decision count,
//! then one tagged entry per decision. Decoding against a structurally
//! different expression fails fast instead of desynchronizing decision
//! consumption mid-replay.

use crate::decision::{Decision, DecisionLog};
use crate::source::SourceError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const RECIPE_VERSION: u8 = 1;
const SHAPE_PREFIX_LEN: usize = 8;

const KIND_INDEX: u8 = 0;
const KIND_VALUE: u8 = 1;

/// Why a recipe could not be decoded or reproduced. All of these are fatal
/// to the `reproduce` call; a recipe never silently yields a wrong case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipeError {
    #[error("recipe is not valid hex or is truncated")]
    Malformed,

    #[error("recipe version {found} is not supported (expected {RECIPE_VERSION})")]
    UnsupportedVersion { found: u8 },

    #[error("recipe was produced by a structurally different expression")]
    ShapeMismatch,

    #[error("recipe carries {left_over} decisions the expression never consumed")]
    ExcessDecisions { left_over: usize },

    #[error("recipe replay diverged from the expression: {0}")]
    ReplayFailed(#[from] SourceError),

    #[error("recipe replay starved: {0}")]
    ReplayStarved(String),
}

/// Encode a decision log against the shape digest of its expression.
pub fn encode(log: &DecisionLog, shape_digest: &[u8; 32]) -> String {
    let mut buffer = Vec::with_capacity(1 + SHAPE_PREFIX_LEN + 4 + 21 * log.len());
    buffer.push(RECIPE_VERSION);
    buffer.extend_from_slice(&shape_digest[..SHAPE_PREFIX_LEN]);
    // Writes into a Vec cannot fail.
    let _ = buffer.write_u32::<BigEndian>(log.len() as u32);
    for decision in log.decisions() {
        match *decision {
            Decision::Index { index, cost } => {
                buffer.push(KIND_INDEX);
                let _ = buffer.write_u32::<BigEndian>(index as u32);
                let _ = buffer.write_u32::<BigEndian>(cost);
            }
            Decision::Value { value, shrunk, cost } => {
                buffer.push(KIND_VALUE);
                let _ = buffer.write_i64::<BigEndian>(value);
                let _ = buffer.write_i64::<BigEndian>(shrunk);
                let _ = buffer.write_u32::<BigEndian>(cost);
            }
        }
    }
    hex::encode(buffer)
}

/// Decode a recipe, verifying the version and the expression shape.
pub fn decode(recipe: &str, shape_digest: &[u8; 32]) -> Result<DecisionLog, RecipeError> {
    let bytes = hex::decode(recipe.trim()).map_err(|_| RecipeError::Malformed)?;
    let mut cursor = Cursor::new(bytes);

    let version = cursor.read_u8().map_err(|_| RecipeError::Malformed)?;
    if version != RECIPE_VERSION {
        return Err(RecipeError::UnsupportedVersion { found: version });
    }

    let mut prefix = [0u8; SHAPE_PREFIX_LEN];
    std::io::Read::read_exact(&mut cursor, &mut prefix).map_err(|_| RecipeError::Malformed)?;
    if prefix != shape_digest[..SHAPE_PREFIX_LEN] {
        return Err(RecipeError::ShapeMismatch);
    }

    let count = cursor.read_u32::<BigEndian>().map_err(|_| RecipeError::Malformed)? as usize;
    // The count is untrusted input. Each decision occupies at least a kind
    // byte plus eight payload bytes, so a count promising more than the
    // remaining payload could hold is malformed; checking before the
    // allocation keeps a hostile count from requesting gigabytes.
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if count as u64 * 9 > remaining {
        return Err(RecipeError::Malformed);
    }
    let mut decisions = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = cursor.read_u8().map_err(|_| RecipeError::Malformed)?;
        let decision = match kind {
            KIND_INDEX => {
                let index = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| RecipeError::Malformed)? as usize;
                let cost = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| RecipeError::Malformed)?;
                Decision::Index { index, cost }
            }
            KIND_VALUE => {
                let value = cursor
                    .read_i64::<BigEndian>()
                    .map_err(|_| RecipeError::Malformed)?;
                let shrunk = cursor
                    .read_i64::<BigEndian>()
                    .map_err(|_| RecipeError::Malformed)?;
                let cost = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| RecipeError::Malformed)?;
                Decision::Value { value, shrunk, cost }
            }
            _ => return Err(RecipeError::Malformed),
        };
        decisions.push(decision);
    }

    if cursor.position() != cursor.get_ref().len() as u64 {
        return Err(RecipeError::Malformed);
    }

    Ok(DecisionLog::from_decisions(decisions))
}
