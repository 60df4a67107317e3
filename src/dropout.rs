//! Dropout mask generation.

use rand::RngCore;

use crate::bit_mask::BitMask;
use crate::{Error, Result};

/// Validate a dropout ratio.
pub fn validate_ratio(ratio: f32) -> Result<()> {
    if !(ratio.is_finite() && (0.0..=1.0).contains(&ratio)) {
        return Err(Error::InvalidConfig(format!(
            "dropout ratio must be in [0,1], got {ratio}"
        )));
    }
    Ok(())
}

/// Clear `mask` and mark `floor(len * ratio)` distinct indices as dropped.
///
/// For ratios above one half the complement is drawn instead and the mask is inverted
/// afterwards, so at most `len / 2` draws are ever needed.
pub fn generate<R: RngCore + ?Sized>(mask: &mut BitMask, ratio: f32, rng: &mut R) -> Result<()> {
    validate_ratio(ratio)?;
    mask.clear_all();

    let len = mask.len();
    if len == 0 {
        return Ok(());
    }

    let keep_strategy = ratio > 0.5;
    let dropped = (len as f32 * ratio) as usize;
    let to_mark = if keep_strategy { len - dropped } else { dropped };

    if to_mark == len {
        mask.set_all();
    } else {
        let mut marked = 0;
        while marked < to_mark {
            let index = rng.next_u32() as usize % len;
            if !mask.get(index)? {
                mask.set(index)?;
                marked += 1;
            }
        }
    }

    if keep_strategy {
        mask.invert();
    }
    Ok(())
}
