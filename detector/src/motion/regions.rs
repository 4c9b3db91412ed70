use std::collections::VecDeque;

use serde::Serialize;

use super::frame::MotionMask;

/// Bounding box of one connected motion component and its pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: u32,
}

const NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const NEIGHBORS_4: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Connected motion regions of `mask` with at least `min_area` pixels.
///
/// Components are 8-connected. Only outer components are reported: one that
/// sits entirely inside a hole of another component is skipped. Results are
/// ordered by the raster position of each component's first pixel.
pub fn extract(mask: &MotionMask, min_area: u32) -> Vec<Region> {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let bits = mask.bits();
    let outside = outside_background(bits, w, h);

    let mut visited = vec![false; w * h];
    let mut queue = VecDeque::new();
    let mut regions = Vec::new();

    for start in 0..w * h {
        if !bits[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut area: u32 = 0;
        let mut external = false;

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            if !external {
                external = x == 0
                    || y == 0
                    || x == w - 1
                    || y == h - 1
                    || neighbors(x, y, w, h, &NEIGHBORS_4).any(|n| outside[n]);
            }
            for n in neighbors(x, y, w, h, &NEIGHBORS_8) {
                if bits[n] && !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if external && area >= min_area {
            regions.push(Region {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
                area,
            });
        }
    }
    regions
}

/// Background pixels 4-connected to the image border. Background enclosed by
/// a motion component (a hole) stays `false`.
fn outside_background(bits: &[bool], w: usize, h: usize) -> Vec<bool> {
    let mut outside = vec![false; w * h];
    let mut queue = VecDeque::new();
    let border = (0..w)
        .flat_map(|x| [x, (h - 1) * w + x])
        .chain((0..h).flat_map(|y| [y * w, y * w + w - 1]));
    for idx in border {
        if !bits[idx] && !outside[idx] {
            outside[idx] = true;
            queue.push_back(idx);
        }
    }
    while let Some(idx) = queue.pop_front() {
        for n in neighbors(idx % w, idx / w, w, h, &NEIGHBORS_4) {
            if !bits[n] && !outside[n] {
                outside[n] = true;
                queue.push_back(n);
            }
        }
    }
    outside
}

fn neighbors<'a>(
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    offsets: &'a [(isize, isize)],
) -> impl Iterator<Item = usize> + 'a {
    offsets.iter().filter_map(move |&(dx, dy)| {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        (nx < w && ny < h).then_some(ny * w + nx)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a mask from rows of '#' (motion) and '.' (still).
    fn mask(rows: &[&str]) -> MotionMask {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let bits = rows
            .iter()
            .flat_map(|r| r.chars().map(|c| c == '#'))
            .collect();
        MotionMask::new(width, height, bits)
    }

    #[test]
    fn empty_mask_has_no_regions() {
        let m = mask(&["....", "....", "...."]);
        assert!(extract(&m, 0).is_empty());
    }

    #[test]
    fn single_block_bounding_box() {
        let m = mask(&[
            "......", //
            ".###..", //
            ".###..", //
            "......",
        ]);
        assert_eq!(
            extract(&m, 1),
            vec![Region {
                x: 1,
                y: 1,
                width: 3,
                height: 2,
                area: 6
            }]
        );
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let m = mask(&[
            "#...", //
            ".#..", //
            "..#.", //
            "....",
        ]);
        let regions = extract(&m, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 3);
        assert_eq!((regions[0].width, regions[0].height), (3, 3));
    }

    #[test]
    fn small_components_are_filtered() {
        let m = mask(&[
            "##......", //
            "##...#..", //
            "........", //
            "....####", //
            "....####",
        ]);
        let regions = extract(&m, 4);
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|r| r.area >= 4));
        for min_area in 0..12 {
            assert!(extract(&m, min_area).iter().all(|r| r.area >= min_area));
        }
    }

    #[test]
    fn regions_come_in_raster_order() {
        let m = mask(&[
            "....##", //
            "##....", //
            "......", //
            ".#....",
        ]);
        let regions = extract(&m, 1);
        let origins: Vec<(u32, u32)> = regions.iter().map(|r| (r.x, r.y)).collect();
        assert_eq!(origins, vec![(4, 0), (0, 1), (1, 3)]);
        assert_eq!(extract(&m, 1), regions);
    }

    #[test]
    fn component_inside_a_hole_is_not_reported() {
        let m = mask(&[
            ".........", //
            ".#######.", //
            ".#.....#.", //
            ".#..#..#.", //
            ".#.....#.", //
            ".#######.", //
            ".........",
        ]);
        let regions = extract(&m, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(
            regions[0],
            Region {
                x: 1,
                y: 1,
                width: 7,
                height: 5,
                area: 20
            }
        );
    }

    #[test]
    fn component_touching_the_border_is_external() {
        let m = mask(&["###", "#.#", "###"]);
        let regions = extract(&m, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 8);
    }

    #[test]
    fn gap_in_a_ring_exposes_the_inner_component() {
        let m = mask(&[
            ".........", //
            ".###.###.", //
            ".#.....#.", //
            ".#..#..#.", //
            ".#.....#.", //
            ".#######.", //
            ".........",
        ]);
        assert_eq!(extract(&m, 1).len(), 2);
    }
}
