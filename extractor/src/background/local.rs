//! Background re-estimated in a rectangular annulus around one object.

use super::tile::BackgroundTile;
use super::Background;
use crate::object::LocalBackground;
use crate::strip::RowWindow;
use shared::image_proc::AABB;

impl Background {
    /// Estimate the residual background around `bbox` from the rows held in
    /// `window` (background-subtracted values).
    ///
    /// The inner box is the object box grown by a quarter of its size (less
    /// for objects wider than half the image); the annulus is `thickness`
    /// pixels around it. When the annulus does not fit inside the image
    /// columns and the rows still held by `window`, or holds too few valid
    /// pixels, the result is a zero offset with the global sigma.
    pub fn local_background<W: RowWindow + ?Sized>(
        &self,
        bbox: &AABB,
        window: &W,
        thickness: usize,
    ) -> LocalBackground {
        let fallback = LocalBackground {
            level: 0.0,
            sigma: self.global_sigma(),
        };
        if !bbox.is_valid() {
            return fallback;
        }

        let (w, h) = (self.size().width as isize, self.size().height as isize);
        let (ox, oy) = (bbox.width() as isize, bbox.height() as isize);
        let grow_x = if ox < w / 2 { ox / 4 } else { (w - ox) / 4 };
        let grow_y = if oy < h / 2 { oy / 4 } else { (h - oy) / 4 };
        let d = thickness as isize;

        let xmin = bbox.min_col as isize - grow_x;
        let xmax = bbox.max_col as isize + 1 + grow_x;
        let ymin = bbox.min_row as isize - grow_y;
        let ymax = bbox.max_row as isize + 1 + grow_y;
        let (bxmin, bxmax) = (xmin - d, xmax + d);
        let (bymin, bymax) = (ymin - d, ymax + d);

        if bxmin < 0
            || bxmax >= w
            || bymin < window.first_row() as isize
            || bymax >= window.end_row() as isize
        {
            return fallback;
        }

        let mut pixels = Vec::with_capacity(((bxmax - bxmin) * (bymax - bymin)) as usize);
        for y in bymin..bymax {
            let Some(row) = window.row(y as usize) else {
                return fallback;
            };
            let inner_row = y >= ymin && y < ymax;
            for x in bxmin..bxmax {
                if inner_row && x >= xmin && x < xmax {
                    continue;
                }
                pixels.push(row[x as usize]);
            }
        }

        match BackgroundTile::from_pixels(&pixels) {
            Some(tile) => {
                let (level, sigma) = tile.backguess();
                LocalBackground { level, sigma }
            }
            None => fallback,
        }
    }
}
