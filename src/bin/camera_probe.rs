//! Probe local camera devices and report what OpenCV can open. Useful for
//! picking the `input.camera_id` config value.

use posecam::capture::enumerate_cameras;

fn main() {
    env_logger::init();

    println!("=== camera probe ===");
    let cameras = enumerate_cameras(8);
    if cameras.is_empty() {
        println!("no cameras found");
        return;
    }
    for cam in &cameras {
        println!(
            "index {}: {}x{} fps={} backend={}",
            cam.index, cam.width, cam.height, cam.fps, cam.backend
        );
    }
}
