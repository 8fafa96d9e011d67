//! Grid cell set for the current selection.

use serde::Serialize;
use signal_map_geohash::{GeohashCell, children, parent, siblings, validate};
use strum_macros::{AsRefStr, Display};

use crate::GridError;

/// Why a cell is part of the grid. Roles are listed strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GridRole {
    /// Child of the selected cell (the drill-down focus).
    Children,
    /// Sibling of the selected cell.
    Siblings,
    /// Sibling of one of the selected cell's ancestors.
    Context,
    /// Cell with prediction data.
    Prediction,
}

/// One rendered grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct GridItem {
    /// The cell.
    pub cell: GeohashCell,
    /// Its role in the grid.
    pub role: GridRole,
}

fn items(hashes: Vec<String>, role: GridRole) -> Result<Vec<GridItem>, GridError> {
    hashes
        .into_iter()
        .map(|hash| {
            Ok(GridItem {
                cell: GeohashCell::new(hash)?,
                role,
            })
        })
        .collect()
}

/// Builds the grid.
///
/// Prediction mode with at least one predicted cell always wins and
/// ignores `selected`. Otherwise the grid is the children of `selected`,
/// then its siblings, then the siblings of each ancestor from the parent
/// up to the single-character level.
///
/// # Errors
///
/// Returns [`GridError::MissingSelection`] when the hierarchical grid is
/// needed but nothing is selected, and [`GridError::InvalidGeohash`] when
/// the selection or a predicted cell is not a valid geohash.
pub fn build_grid(
    selected: Option<&str>,
    prediction_hashes: &[String],
    prediction_mode: bool,
) -> Result<Vec<GridItem>, GridError> {
    if prediction_mode && !prediction_hashes.is_empty() {
        return items(prediction_hashes.to_vec(), GridRole::Prediction);
    }

    let selected = selected.ok_or(GridError::MissingSelection)?;
    validate(selected)?;

    let mut grid = items(children(selected), GridRole::Children)?;
    grid.extend(items(siblings(selected), GridRole::Siblings)?);

    let mut ancestor = parent(selected);
    while !ancestor.is_empty() {
        grid.extend(items(siblings(&ancestor), GridRole::Context)?);
        ancestor = parent(&ancestor);
    }

    log::trace!("Built grid of {} cells around {selected}", grid.len());

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use signal_map_geohash::{ZoomPrecisionMap, encode};
    use signal_map_query_models::{Rectangle, Viewport};

    fn count(grid: &[GridItem], role: GridRole) -> usize {
        grid.iter().filter(|item| item.role == role).count()
    }

    #[test]
    fn selection_yields_children_siblings_and_context() {
        let grid = build_grid(Some("u4pr"), &[], false).unwrap();
        assert_eq!(count(&grid, GridRole::Children), 32);
        assert_eq!(count(&grid, GridRole::Siblings), 31);
        assert_eq!(count(&grid, GridRole::Context), 31 * 3);
        assert_eq!(count(&grid, GridRole::Prediction), 0);

        assert_eq!(grid[0].cell.hash(), "u4pr0");
        assert_eq!(grid[0].role, GridRole::Children);
        assert_eq!(grid[32].role, GridRole::Siblings);
    }

    #[test]
    fn no_duplicate_cell_role_pairs() {
        let grid = build_grid(Some("ezs42"), &[], false).unwrap();
        let mut seen = BTreeSet::new();
        for item in &grid {
            assert!(
                seen.insert((item.cell.hash().to_string(), item.role.to_string())),
                "duplicate {} / {}",
                item.cell.hash(),
                item.role
            );
        }
        assert!(!grid.iter().any(|item| item.cell.hash() == "ezs42"));
    }

    #[test]
    fn context_rings_get_coarser() {
        let grid = build_grid(Some("ezs"), &[], false).unwrap();
        let precisions: Vec<usize> = grid
            .iter()
            .filter(|item| item.role == GridRole::Context)
            .map(|item| item.cell.precision())
            .collect();
        assert_eq!(precisions.len(), 62);
        assert!(precisions[..31].iter().all(|&p| p == 2));
        assert!(precisions[31..].iter().all(|&p| p == 1));
    }

    #[test]
    fn single_character_selection_has_no_context() {
        let grid = build_grid(Some("e"), &[], false).unwrap();
        assert_eq!(grid.len(), 63);
        assert_eq!(count(&grid, GridRole::Context), 0);
    }

    #[test]
    fn prediction_mode_ignores_selection() {
        let hashes = vec!["sx8d".to_string(), "sx8e".to_string()];
        let with_selection = build_grid(Some("u4pr"), &hashes, true).unwrap();
        let without_selection = build_grid(None, &hashes, true).unwrap();
        assert_eq!(with_selection, without_selection);
        assert_eq!(with_selection.len(), 2);
        assert!(with_selection
            .iter()
            .all(|item| item.role == GridRole::Prediction));
    }

    #[test]
    fn empty_prediction_data_falls_back_to_hierarchy() {
        let grid = build_grid(Some("u4"), &[], true).unwrap();
        assert_eq!(count(&grid, GridRole::Children), 32);
    }

    #[test]
    fn rejects_missing_or_invalid_selection() {
        assert_eq!(build_grid(None, &[], false), Err(GridError::MissingSelection));
        assert!(matches!(
            build_grid(Some("u4a"), &[], false),
            Err(GridError::InvalidGeohash(_))
        ));
        assert!(matches!(
            build_grid(None, &["bad!".to_string()], true),
            Err(GridError::InvalidGeohash(_))
        ));
    }

    #[test]
    fn default_viewport_selection_scenario() {
        let viewport = Viewport {
            rect: Rectangle::from_bounds(10.0, 10.0, 20.0, 20.0),
            zoom: 10,
        };
        let zoom_map = ZoomPrecisionMap::default();
        assert_eq!(zoom_map.zoom_to_precision(10), 4);

        let hash = zoom_map.viewport_geohash(&viewport).unwrap();
        assert_eq!(hash, encode(15.0, 15.0, 4).unwrap());

        let grid = build_grid(Some(&hash), &[], false).unwrap();
        assert_eq!(count(&grid, GridRole::Children), 32);
        assert_eq!(count(&grid, GridRole::Siblings), 31);
        let context_levels: BTreeSet<usize> = grid
            .iter()
            .filter(|item| item.role == GridRole::Context)
            .map(|item| item.cell.precision())
            .collect();
        assert_eq!(context_levels, BTreeSet::from([1, 2, 3]));
    }
}
