use anyhow::Result;
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

use crate::pose::{LandmarkSchema, Person};

/// Keypoints below this confidence are drawn in the low-confidence color and
/// excluded from skeleton lines.
const CONFIDENCE_THRESHOLD: f32 = 0.3;

// Colors are BGR
const KEYPOINT_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const SKELETON_COLOR: (f64, f64, f64) = (0.0, 255.0, 255.0);
const LOW_CONFIDENCE_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0);
const BBOX_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);

fn scalar((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

/// Draw skeleton annotations for every person onto the frame in place.
/// Callers pass a copy when the raw frame must stay untouched.
pub fn draw_persons(frame: &mut Mat, persons: &[Person], schema: LandmarkSchema) -> Result<()> {
    let width = frame.cols() as u32;
    let height = frame.rows() as u32;

    for person in persons {
        if let Some(bbox) = &person.bbox {
            let x = ((bbox.center_x - bbox.width / 2.0) * width as f32) as i32;
            let y = ((bbox.center_y - bbox.height / 2.0) * height as f32) as i32;
            let w = (bbox.width * width as f32) as i32;
            let h = (bbox.height * height as f32) as i32;
            imgproc::rectangle(
                frame,
                Rect::new(x, y, w, h),
                scalar(BBOX_COLOR),
                1,
                imgproc::LINE_8,
                0,
            )?;
        }

        for &(start, end) in schema.connections() {
            let (Some(a), Some(b)) = (person.landmarks.get(start), person.landmarks.get(end))
            else {
                continue;
            };
            if a.is_valid(CONFIDENCE_THRESHOLD) && b.is_valid(CONFIDENCE_THRESHOLD) {
                let (x1, y1) = a.to_pixel(width, height);
                let (x2, y2) = b.to_pixel(width, height);
                imgproc::line(
                    frame,
                    Point::new(x1, y1),
                    Point::new(x2, y2),
                    scalar(SKELETON_COLOR),
                    2,
                    imgproc::LINE_8,
                    0,
                )?;
            }
        }

        for lm in &person.landmarks {
            let (px, py) = lm.to_pixel(width, height);
            let color = if lm.is_valid(CONFIDENCE_THRESHOLD) {
                scalar(KEYPOINT_COLOR)
            } else {
                scalar(LOW_CONFIDENCE_COLOR)
            };
            imgproc::circle(frame, Point::new(px, py), 4, color, -1, imgproc::LINE_8, 0)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Landmark;
    use opencv::core::{CV_8UC3, Vec3b};

    fn black_frame() -> Mat {
        Mat::new_rows_cols_with_default(64, 64, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_draw_modifies_frame() {
        let mut frame = black_frame();
        let landmarks: Vec<Landmark> = (0..17)
            .map(|i| Landmark::new(0.2 + 0.03 * i as f32, 0.5, 0.0, 0.9))
            .collect();
        let persons = vec![Person::new(1, landmarks, None)];
        draw_persons(&mut frame, &persons, LandmarkSchema::Coco17).unwrap();

        let mut touched = false;
        for y in 0..64 {
            for x in 0..64 {
                let px = frame.at_2d::<Vec3b>(y, x).unwrap();
                if px[0] != 0 || px[1] != 0 || px[2] != 0 {
                    touched = true;
                }
            }
        }
        assert!(touched);
    }

    #[test]
    fn test_draw_empty_is_noop() {
        let mut frame = black_frame();
        draw_persons(&mut frame, &[], LandmarkSchema::Coco17).unwrap();
        for y in 0..64 {
            for x in 0..64 {
                let px = frame.at_2d::<Vec3b>(y, x).unwrap();
                assert_eq!((px[0], px[1], px[2]), (0, 0, 0));
            }
        }
    }

    #[test]
    fn test_draw_tolerates_offscreen_points() {
        let mut frame = black_frame();
        let landmarks = vec![Landmark::new(0.99, 0.99, 0.0, 0.9); 17];
        let persons = vec![Person::new(1, landmarks, None)];
        draw_persons(&mut frame, &persons, LandmarkSchema::Coco17).unwrap();
    }
}
