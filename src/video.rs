use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

/// Best-effort write timeout; slow subscribers are dropped, never waited on.
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// Video channel boundary: one pixel buffer per call, fire-and-forget.
pub trait VideoSink: Send {
    fn publish(&mut self, frame: &Mat) -> Result<()>;
}

/// Publishes the video channel as a named JPEG stream over TCP. Subscribers
/// connect, receive one header line (`posecam <name> <width> <height>\n`),
/// then a big-endian u32 length prefix + JPEG bytes per frame. Subscribers
/// that stall or disconnect are dropped silently.
pub struct TcpJpegSink {
    listener: TcpListener,
    clients: Vec<TcpStream>,
    stream_name: String,
    jpeg_quality: i32,
}

impl TcpJpegSink {
    pub fn bind(bind_addr: &str, stream_name: &str, jpeg_quality: i32) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .with_context(|| format!("failed to bind video publisher on {bind_addr}"))?;
        listener.set_nonblocking(true)?;
        log::info!("[video] stream '{stream_name}' publishing on {bind_addr}");
        Ok(Self {
            listener,
            clients: Vec::new(),
            stream_name: stream_name.to_string(),
            jpeg_quality,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn accept_new(&mut self, width: i32, height: i32) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if stream.set_nodelay(true).is_err()
                        || stream.set_write_timeout(Some(WRITE_TIMEOUT)).is_err()
                    {
                        continue;
                    }
                    let header =
                        format!("posecam {} {} {}\n", self.stream_name, width, height);
                    if stream.write_all(header.as_bytes()).is_ok() {
                        log::info!("[video] subscriber connected: {peer}");
                        self.clients.push(stream);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[video] accept failed: {e}");
                    break;
                }
            }
        }
    }
}

impl VideoSink for TcpJpegSink {
    fn publish(&mut self, frame: &Mat) -> Result<()> {
        self.accept_new(frame.cols(), frame.rows());
        if self.clients.is_empty() {
            return Ok(());
        }

        let jpeg = jpeg_encode(frame, self.jpeg_quality)?;
        let len = (jpeg.len() as u32).to_be_bytes();

        self.clients.retain_mut(|client| {
            let ok = client.write_all(&len).is_ok() && client.write_all(&jpeg).is_ok();
            if !ok {
                log::info!("[video] subscriber dropped");
            }
            ok
        });
        Ok(())
    }
}

/// JPEG-compress a frame. imencode expects BGR 8UC3; BGRA is converted.
pub fn jpeg_encode(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf: Vector<u8> = Vector::new();

    let mat = if frame.channels() == 4 {
        let mut bgr = Mat::default();
        imgproc::cvt_color(
            frame,
            &mut bgr,
            imgproc::COLOR_BGRA2BGR,
            0,
            opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;
        bgr
    } else {
        frame.try_clone()?
    };

    imgcodecs::imencode(".jpg", &mat, &mut buf, &params).context("jpeg encode failed")?;
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use std::io::Read;

    fn test_frame() -> Mat {
        Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::new(30.0, 60.0, 90.0, 0.0))
            .unwrap()
    }

    #[test]
    fn test_jpeg_encode_produces_jpeg() {
        let bytes = jpeg_encode(&test_frame(), 80).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let mut sink = TcpJpegSink::bind("127.0.0.1:0", "test", 80).unwrap();
        sink.publish(&test_frame()).unwrap();
        assert_eq!(sink.client_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_header_and_frame() {
        let mut sink = TcpJpegSink::bind("127.0.0.1:0", "teststream", 80).unwrap();
        let addr = sink.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // First publish accepts the pending subscriber and sends the header,
        // then the frame
        sink.publish(&test_frame()).unwrap();
        assert_eq!(sink.client_count(), 1);

        let mut reader = std::io::BufReader::new(&mut client);
        let mut header = String::new();
        std::io::BufRead::read_line(&mut reader, &mut header).unwrap();
        assert_eq!(header, "posecam teststream 64 48\n");

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        assert!(len > 0);
        let mut jpeg = vec![0u8; len];
        reader.read_exact(&mut jpeg).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_disconnected_subscriber_is_dropped() {
        let mut sink = TcpJpegSink::bind("127.0.0.1:0", "test", 80).unwrap();
        let addr = sink.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        sink.publish(&test_frame()).unwrap();
        assert_eq!(sink.client_count(), 1);

        drop(client);
        // Writes into a closed socket may need a couple of frames to error
        for _ in 0..5 {
            sink.publish(&test_frame()).unwrap();
            if sink.client_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(sink.client_count(), 0);
    }
}
