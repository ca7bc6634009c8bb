/// Fixed 3×3 partition of a localized puzzle region.
///
/// Cell labeling convention:
///   - index = row * 3 + col, row-major, 0..=8
///   - interior boundaries at `w / 3` and `2 * (w / 3)` (integer division)
///   - the last row/column absorbs the remainder so the cells tile the region exactly
use std::collections::BTreeSet;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::errors::{TileGridError, TileGridResult};
use crate::perception::types::{Point, Rect};
use crate::taxonomy::Category;

pub const GRID_ROWS: u32 = 3;
pub const GRID_COLS: u32 = 3;
pub const TILE_COUNT: usize = (GRID_ROWS * GRID_COLS) as usize;

/// One cell of the partition. Geometry is relative to the region it was cut from;
/// label fields stay empty until the labeler fills them.
#[derive(Debug, Clone, Serialize)]
pub struct Tile {
    pub index: u8,
    pub row: u32,
    pub col: u32,
    pub rect: Rect,
    pub center: Point,
    #[serde(skip)]
    pub crop: RgbImage,
    pub label: String,
    pub label_confidence: f64,
    pub normalized_label: String,
    pub categories: BTreeSet<Category>,
}

impl Tile {
    pub fn has_any(&self, categories: &BTreeSet<Category>) -> bool {
        !self.categories.is_disjoint(categories)
    }
}

/// Band boundaries along one axis: `[0, d/3, 2·(d/3), d]`.
pub fn band_bounds(extent: u32, bands: u32) -> Vec<u32> {
    let step = extent / bands;
    (0..bands)
        .map(|i| i * step)
        .chain(std::iter::once(extent))
        .collect()
}

/// Boundaries of a partitioned region, for audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub col_bounds: Vec<u32>,
    pub row_bounds: Vec<u32>,
}

impl GridGeometry {
    pub fn for_region(width: u32, height: u32) -> Self {
        Self {
            col_bounds: band_bounds(width, GRID_COLS),
            row_bounds: band_bounds(height, GRID_ROWS),
        }
    }
}

/// Cut `region` into nine tiles. Regions too small to give every cell at least
/// one pixel per axis are `InvalidRegion`.
pub fn partition(region: &RgbImage) -> TileGridResult<Vec<Tile>> {
    let (w, h) = region.dimensions();
    if w < GRID_COLS || h < GRID_ROWS {
        return Err(TileGridError::InvalidRegion { width: w, height: h });
    }
    let geometry = GridGeometry::for_region(w, h);

    let mut tiles = Vec::with_capacity(TILE_COUNT);
    for row in 0..GRID_ROWS {
        for col in 0..GRID_COLS {
            let (x1, x2) = (geometry.col_bounds[col as usize], geometry.col_bounds[col as usize + 1]);
            let (y1, y2) = (geometry.row_bounds[row as usize], geometry.row_bounds[row as usize + 1]);
            let rect = Rect::new(x1, y1, x2 - x1, y2 - y1);
            let crop = image::imageops::crop_imm(region, x1, y1, rect.width, rect.height).to_image();
            tiles.push(Tile {
                index: (row * GRID_COLS + col) as u8,
                row,
                col,
                center: Point::new(((x1 + x2) / 2) as i32, ((y1 + y2) / 2) as i32),
                rect,
                crop,
                label: String::new(),
                label_confidence: 0.0,
                normalized_label: String::new(),
                categories: BTreeSet::new(),
            });
        }
    }
    tracing::debug!(width = w, height = h, "region partitioned into 3x3 tiles");
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_px_region_absorbs_remainder() {
        let geometry = GridGeometry::for_region(100, 100);
        assert_eq!(geometry.col_bounds, vec![0, 33, 66, 100]);
        assert_eq!(geometry.row_bounds, vec![0, 33, 66, 100]);

        let tiles = partition(&RgbImage::new(100, 100)).unwrap();
        assert_eq!(tiles.len(), 9);
        assert_eq!(tiles[8].rect, Rect::new(66, 66, 34, 34));
        assert_eq!(tiles[0].rect, Rect::new(0, 0, 33, 33));
    }

    #[test]
    fn indices_are_row_major() {
        let tiles = partition(&RgbImage::new(90, 60)).unwrap();
        for tile in &tiles {
            assert_eq!(tile.index as u32, tile.row * 3 + tile.col);
        }
        assert_eq!((tiles[5].row, tiles[5].col), (1, 2));
        assert_eq!(tiles[5].center, Point::new(75, 30));
    }

    #[test]
    fn cells_cover_region_without_gaps() {
        let (w, h) = (101, 47);
        let tiles = partition(&RgbImage::new(w, h)).unwrap();
        let area: u32 = tiles.iter().map(|t| t.rect.width * t.rect.height).sum();
        assert_eq!(area, w * h);
        for t in &tiles {
            assert_eq!(t.crop.dimensions(), (t.rect.width, t.rect.height));
        }
        assert_eq!(tiles[2].rect.right(), w);
        assert_eq!(tiles[6].rect.bottom(), h);
    }

    #[test]
    fn crops_carry_region_pixels() {
        let region = RgbImage::from_fn(9, 9, |x, y| image::Rgb([x as u8, y as u8, 0]));
        let tiles = partition(&region).unwrap();
        assert_eq!(tiles[4].crop.get_pixel(0, 0), &image::Rgb([3, 3, 0]));
    }

    #[test]
    fn degenerate_region_is_rejected() {
        assert!(matches!(
            partition(&RgbImage::new(0, 50)),
            Err(TileGridError::InvalidRegion { width: 0, height: 50 })
        ));
        assert!(partition(&RgbImage::new(2, 50)).is_err());
    }
}
