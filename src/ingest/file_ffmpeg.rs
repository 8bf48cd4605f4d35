//! Local video file backend using FFmpeg.
//!
//! Frames are decoded in-memory and scaled to RGB24. Rewind seeks the input
//! back to the start and flushes the decoder.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::VideoBackend;
use crate::frame::Frame;

pub(crate) struct FfmpegFileBackend {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    position: u64,
    eof_sent: bool,
}

impl FfmpegFileBackend {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let frame_count = input_stream.frames().max(0) as u64;
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        if frame_count == 0 {
            log::warn!(
                "{}: container does not report a frame count; counting the first pass",
                path
            );
        }

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count,
            position: 0,
            eof_sent: false,
        })
    }

    fn take_decoded(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Ok(Some(Frame::from_rgb(width, height, pixels)?))
    }
}

impl VideoBackend for FfmpegFileBackend {
    fn describe(&self) -> String {
        format!("{} (ffmpeg)", self.path)
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("seek to start of '{}'", self.path))?;
        self.decoder.flush();
        self.eof_sent = false;
        self.position = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.take_decoded()? {
                self.position += 1;
                return Ok(frame);
            }
            if self.eof_sent {
                anyhow::bail!("end of file after {} frames", self.position);
            }

            let mut sent = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                sent = true;
                break;
            }
            if !sent {
                self.decoder
                    .send_eof()
                    .context("flush ffmpeg decoder at end of file")?;
                self.eof_sent = true;
            }
        }
    }

    fn release(&mut self) {
        self.decoder.flush();
        log::debug!("{}: ffmpeg input closed", self.path);
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
