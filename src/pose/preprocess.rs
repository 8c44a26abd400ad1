use anyhow::Result;
use ndarray::Array4;
use opencv::{
    core::{AlgorithmHint, Mat, Size, CV_32FC3},
    imgproc,
    prelude::*,
};

/// MoveNet input size
pub const MOVENET_INPUT_SIZE: i32 = 192;

/// YOLOv8-pose input size
pub const YOLO_INPUT_SIZE: i32 = 640;

/// Convert a BGR Mat into a MoveNet input tensor.
///
/// - BGR -> RGB
/// - resize to 192x192
/// - [1, 192, 192, 3] f32 tensor (0.0-255.0)
pub fn preprocess_for_movenet(frame: &Mat) -> Result<Array4<f32>> {
    let float_mat = to_rgb_float(frame, MOVENET_INPUT_SIZE)?;

    let size = MOVENET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for y in 0..MOVENET_INPUT_SIZE {
        for x in 0..MOVENET_INPUT_SIZE {
            let pixel = float_mat.at_2d::<opencv::core::Vec3f>(y, x)?;
            tensor[[0, y as usize, x as usize, 0]] = pixel[0];
            tensor[[0, y as usize, x as usize, 1]] = pixel[1];
            tensor[[0, y as usize, x as usize, 2]] = pixel[2];
        }
    }

    Ok(tensor)
}

/// Convert a BGR Mat into a YOLOv8-pose input tensor.
///
/// - BGR -> RGB
/// - resize to 640x640
/// - [0, 255] -> [0.0, 1.0], NCHW [1, 3, 640, 640]
pub fn preprocess_for_yolo(frame: &Mat) -> Result<Array4<f32>> {
    let float_mat = to_rgb_float(frame, YOLO_INPUT_SIZE)?;

    let size = YOLO_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..YOLO_INPUT_SIZE {
        for x in 0..YOLO_INPUT_SIZE {
            let pixel = float_mat.at_2d::<opencv::core::Vec3f>(y, x)?;
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] / 255.0;
            }
        }
    }

    Ok(tensor)
}

fn to_rgb_float(frame: &Mat, size: i32) -> Result<Mat> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(
        frame,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    let mut resized = Mat::default();
    imgproc::resize(
        &rgb,
        &mut resized,
        Size::new(size, size),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let mut float_mat = Mat::default();
    resized.convert_to(&mut float_mat, CV_32FC3, 1.0, 0.0)?;
    Ok(float_mat)
}
