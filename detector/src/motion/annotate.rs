use super::frame::Frame;
use super::regions::Region;

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: u32 = 2;

/// Outline every region on the frame in green, growing the border inwards
/// from the bounding box. Grayscale frames get white outlines.
pub fn draw_regions(frame: &mut Frame, regions: &[Region]) {
    for region in regions {
        draw_box(frame, region);
    }
}

fn draw_box(frame: &mut Frame, region: &Region) {
    let (width, height) = (frame.width(), frame.height());
    if region.width == 0 || region.height == 0 || region.x >= width || region.y >= height {
        return;
    }
    let x0 = region.x;
    let y0 = region.y;
    let x1 = (region.x + region.width - 1).min(width - 1);
    let y1 = (region.y + region.height - 1).min(height - 1);

    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_border = x - x0 < BOX_THICKNESS
                || x1 - x < BOX_THICKNESS
                || y - y0 < BOX_THICKNESS
                || y1 - y < BOX_THICKNESS;
            if on_border {
                paint(frame, x, y);
            }
        }
    }
}

fn paint(frame: &mut Frame, x: u32, y: u32) {
    let channels = frame.channels() as usize;
    let idx = (y as usize * frame.width() as usize + x as usize) * channels;
    let data = frame.data_mut();
    if idx + channels > data.len() {
        return;
    }
    match channels {
        1 => data[idx] = 255,
        _ => data[idx..idx + 3].copy_from_slice(&BOX_COLOR),
    }
}
