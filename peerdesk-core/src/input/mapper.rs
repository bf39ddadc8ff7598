//! Viewer pointer position to remote pixel mapping.
//!
//! The remote video is drawn with contain-fit: scaled uniformly to fit the
//! display rectangle and centred, leaving bars on one axis. A pointer
//! sample is first clamped into the drawn area (bars map to the nearest
//! edge), then scaled to video pixels and rounded.

use serde::{Deserialize, Serialize};

/// A pointer position relative to the display rectangle's top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub display_width: f64,
    pub display_height: f64,
    pub video_width: u32,
    pub video_height: u32,
}

/// Where the video actually lands inside the display rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayedRect {
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

/// A pixel in the remote video's native resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePoint {
    pub x: i32,
    pub y: i32,
}

/// Compute the contain-fit rectangle, or `None` for a degenerate size.
pub fn letterbox(
    display_width: f64,
    display_height: f64,
    video_width: u32,
    video_height: u32,
) -> Option<DisplayedRect> {
    if !(display_width > 0.0 && display_height > 0.0) || video_width == 0 || video_height == 0 {
        return None;
    }

    let vw = f64::from(video_width);
    let vh = f64::from(video_height);

    if vw / vh > display_width / display_height {
        // Wider than the box: full width, bars top and bottom.
        let height = display_width * vh / vw;
        Some(DisplayedRect {
            offset_x: 0.0,
            offset_y: (display_height - height) / 2.0,
            width: display_width,
            height,
        })
    } else {
        let width = display_height * vw / vh;
        Some(DisplayedRect {
            offset_x: (display_width - width) / 2.0,
            offset_y: 0.0,
            width,
            height: display_height,
        })
    }
}

/// Map a pointer sample to remote pixel coordinates.
///
/// Returns `None` when any dimension is zero; the event is not sent.
/// Results always satisfy `0 <= x < video_width` and `0 <= y < video_height`.
pub fn map_pointer(sample: &PointerSample) -> Option<RemotePoint> {
    let rect = letterbox(
        sample.display_width,
        sample.display_height,
        sample.video_width,
        sample.video_height,
    )?;

    let x = axis(sample.x, rect.offset_x, rect.width, sample.video_width);
    let y = axis(sample.y, rect.offset_y, rect.height, sample.video_height);
    Some(RemotePoint { x, y })
}

fn axis(raw: f64, offset: f64, extent: f64, native: u32) -> i32 {
    let local = if raw.is_finite() {
        (raw - offset).clamp(0.0, extent)
    } else {
        0.0
    };
    let scaled = (local / extent * f64::from(native)).round();
    let max = f64::from(native - 1);
    scaled.clamp(0.0, max) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f64, y: f64, dw: f64, dh: f64, vw: u32, vh: u32) -> PointerSample {
        PointerSample {
            x,
            y,
            display_width: dw,
            display_height: dh,
            video_width: vw,
            video_height: vh,
        }
    }

    #[test]
    fn wide_video_in_square_box_has_vertical_bars() {
        let rect = letterbox(1000.0, 1000.0, 1920, 1080).unwrap();
        assert_eq!(rect.width, 1000.0);
        assert_eq!(rect.height, 562.5);
        assert_eq!(rect.offset_y, 218.75);
        assert_eq!(rect.offset_x, 0.0);
    }

    #[test]
    fn tall_video_has_side_bars() {
        let rect = letterbox(1000.0, 500.0, 500, 500).unwrap();
        assert_eq!(rect.width, 500.0);
        assert_eq!(rect.offset_x, 250.0);
    }

    #[test]
    fn corners_and_centre() {
        let top_left = map_pointer(&sample(0.0, 218.75, 1000.0, 1000.0, 1920, 1080)).unwrap();
        assert_eq!(top_left, RemotePoint { x: 0, y: 0 });

        let bottom_right =
            map_pointer(&sample(1000.0, 781.25, 1000.0, 1000.0, 1920, 1080)).unwrap();
        assert_eq!(bottom_right, RemotePoint { x: 1919, y: 1079 });

        let centre = map_pointer(&sample(500.0, 500.0, 1000.0, 1000.0, 1920, 1080)).unwrap();
        assert_eq!(centre, RemotePoint { x: 960, y: 540 });
    }

    #[test]
    fn bars_clamp_to_nearest_edge() {
        let in_top_bar = map_pointer(&sample(500.0, 10.0, 1000.0, 1000.0, 1920, 1080)).unwrap();
        assert_eq!(in_top_bar, RemotePoint { x: 960, y: 0 });

        let outside = map_pointer(&sample(-50.0, 2000.0, 1000.0, 1000.0, 1920, 1080)).unwrap();
        assert_eq!(outside, RemotePoint { x: 0, y: 1079 });
    }

    #[test]
    fn zero_dimensions_produce_nothing() {
        assert!(map_pointer(&sample(1.0, 1.0, 0.0, 100.0, 1920, 1080)).is_none());
        assert!(map_pointer(&sample(1.0, 1.0, 100.0, 100.0, 0, 1080)).is_none());
        assert!(map_pointer(&sample(1.0, 1.0, 100.0, 100.0, 1920, 0)).is_none());
    }

    #[test]
    fn same_sample_maps_the_same() {
        let s = sample(123.4, 567.8, 1280.0, 720.0, 2560, 1440);
        assert_eq!(map_pointer(&s), map_pointer(&s));
    }

    #[test]
    fn results_stay_in_bounds() {
        for &(x, y) in &[(0.0, 0.0), (1279.9, 719.9), (640.0, 360.0), (9999.0, -9999.0)] {
            let p = map_pointer(&sample(x, y, 1280.0, 720.0, 3, 2)).unwrap();
            assert!((0..3).contains(&p.x));
            assert!((0..2).contains(&p.y));
        }
    }
}
