//! FFmpeg-backed video file decoding.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, decoder, format, frame, media, software::scaling};
use std::path::Path;
use tracing::info;

use super::{FrameSource, RgbFrame};
use crate::error::{Error, Result};

/// Filter for the decode → RGB24 conversion.
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;

/// Decodes the best video stream of a file into RGB24 frames, one packet
/// at a time.
pub struct VideoFileSource {
    ictx: format::context::Input,
    decoder: decoder::Video,
    to_rgb: scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    decoded: frame::Video,
    rgb: frame::Video,
    frame_count: i64,
    eof_sent: bool,
}

impl VideoFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ffmpeg::init().map_err(backend("failed to initialise FFmpeg"))?;

        let ictx = format::input(&path).map_err(backend("could not open input file"))?;
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| Error::invalid("no video stream found in input"))?;
        let stream_index = stream.index();

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .map_err(backend("failed to build decoder context"))?
            .decoder()
            .video()
            .map_err(backend("failed to open video decoder"))?;

        let width = decoder.width();
        let height = decoder.height();
        let src_pixel_fmt = decoder.format();
        info!(width, height, ?src_pixel_fmt, "opened input video stream");

        let to_rgb = scaling::Context::get(
            src_pixel_fmt,
            width,
            height,
            format::Pixel::RGB24,
            width,
            height,
            SCALE_FLAGS,
        )
        .map_err(backend("failed to create to-RGB scaler"))?;

        Ok(Self {
            ictx,
            decoder,
            to_rgb,
            stream_index,
            width,
            height,
            decoded: frame::Video::empty(),
            rgb: frame::Video::empty(),
            frame_count: 0,
            eof_sent: false,
        })
    }

    fn take_decoded(&mut self) -> Result<Option<RgbFrame>> {
        if self.decoder.receive_frame(&mut self.decoded).is_err() {
            return Ok(None);
        }
        self.to_rgb
            .run(&self.decoded, &mut self.rgb)
            .map_err(backend("to-RGB scaling failed"))?;

        // Compact to a plain Vec<u8> (remove stride padding if any)
        let stride = self.rgb.stride(0);
        let raw = self.rgb.data(0);
        let row_len = self.width as usize * 3;
        let mut data = Vec::with_capacity(row_len * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * stride;
            data.extend_from_slice(&raw[start..start + row_len]);
        }

        let pts = self.decoded.pts().unwrap_or(self.frame_count);
        self.frame_count += 1;
        Ok(Some(RgbFrame::new(data, self.width, self.height, pts)))
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        loop {
            if let Some(frame) = self.take_decoded()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(backend("decoder send_packet"))?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
                Err(e) => return Err(Error::invalid(format!("failed to read packet: {e}"))),
            }
        }
    }
}

fn backend(context: &'static str) -> impl Fn(ffmpeg::Error) -> Error {
    move |e| Error::invalid(format!("{context}: {e}"))
}
