//! Group nesting rebuilt from the flat layer list
//!
//! The file stores groups as marker layers: a hidden divider below the
//! group's children and a folder layer above them. Walking the list from
//! the top down, a folder opens a level and a divider closes it.

use crate::error::PsdError;
use crate::psd::Layer;

/// Part a layer plays in the group structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Normal,
    GroupStart { expanded: bool },
    GroupEnd,
}

/// Check that every folder has a matching divider
pub fn validate_balance(layers: &[Layer]) -> Result<(), PsdError> {
    let mut depth = 0i32;
    for (index, layer) in layers.iter().enumerate().rev() {
        match layer.group_role() {
            GroupRole::GroupStart { .. } => depth += 1,
            GroupRole::GroupEnd => depth -= 1,
            GroupRole::Normal => {}
        }
        if depth < 0 {
            return Err(PsdError::UnbalancedGroupMarkers { index, depth });
        }
    }
    if depth != 0 {
        return Err(PsdError::UnbalancedGroupMarkers { index: 0, depth });
    }
    Ok(())
}

/// Index of the enclosing folder for every layer
///
/// A divider's parent is the folder it closes.
pub fn parent_map(layers: &[Layer]) -> Result<Vec<Option<usize>>, PsdError> {
    validate_balance(layers)?;

    let mut parents = vec![None; layers.len()];
    let mut stack: Vec<usize> = Vec::new();
    for (index, layer) in layers.iter().enumerate().rev() {
        match layer.group_role() {
            GroupRole::GroupStart { .. } => {
                parents[index] = stack.last().copied();
                stack.push(index);
            }
            GroupRole::GroupEnd => {
                parents[index] = stack.pop();
            }
            GroupRole::Normal => parents[index] = stack.last().copied(),
        }
    }
    Ok(parents)
}

/// Nesting depth of every layer; top-level layers are 0
pub fn depths(layers: &[Layer]) -> Result<Vec<usize>, PsdError> {
    let parents = parent_map(layers)?;
    let mut depths = vec![0usize; layers.len()];
    // Parents always have a higher index, so fill from the top down
    for index in (0..layers.len()).rev() {
        let own = match layers[index].group_role() {
            GroupRole::GroupEnd => 1,
            _ => 0,
        };
        depths[index] = parents[index].map_or(0, |p| depths[p] + 1).saturating_sub(own);
    }
    Ok(depths)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::psd::{ColorMode, Rect};

    fn plain(name: &str) -> Layer {
        Layer::new(name, Rect::default())
    }

    /// Document order (bottom first) for:
    /// Outer { a, Inner { b } }, top
    fn nested() -> Vec<Layer> {
        vec![
            Layer::group_end(ColorMode::Rgb), // 0 closes Outer
            plain("a"),
            Layer::group_end(ColorMode::Rgb), // 2 closes Inner
            plain("b"),
            Layer::group_start("Inner", true, ColorMode::Rgb),
            Layer::group_start("Outer", false, ColorMode::Rgb),
            plain("top"),
        ]
    }

    #[test]
    fn test_balanced() {
        assert!(validate_balance(&nested()).is_ok());
        assert!(validate_balance(&[]).is_ok());
    }

    #[test]
    fn test_unclosed_group() {
        let layers = vec![plain("a"), Layer::group_start("G", true, ColorMode::Rgb)];
        let err = validate_balance(&layers).unwrap_err();
        assert!(matches!(
            err,
            PsdError::UnbalancedGroupMarkers { depth: 1, .. }
        ));
    }

    #[test]
    fn test_stray_divider() {
        let layers = vec![plain("a"), Layer::group_end(ColorMode::Rgb), plain("b")];
        let err = validate_balance(&layers).unwrap_err();
        assert!(matches!(
            err,
            PsdError::UnbalancedGroupMarkers { index: 1, depth: -1 }
        ));
    }

    #[test]
    fn test_parent_map() {
        let parents = parent_map(&nested()).unwrap();
        assert_eq!(
            parents,
            vec![Some(5), Some(5), Some(4), Some(4), Some(5), None, None]
        );
    }

    #[test]
    fn test_depths() {
        assert_eq!(depths(&nested()).unwrap(), vec![0, 1, 1, 2, 1, 0, 0]);
    }
}
