//! Video decoder using FFmpeg
//!
//! Decodes the best video stream of a file into NV12 [`PixelFrame`]s using the
//! ffmpeg-next crate. Frames in other pixel formats are converted by swscale;
//! NV12 output from the codec is copied through untouched.

use std::path::Path;

use thiserror::Error;

use super::orientation::AffineTransform;
use super::time::{MediaTime, MICROS_TIMESCALE};
use super::{FrameSize, PixelFrame, SeekTolerance};

/// Errors that can occur during video decoding
#[derive(Error, Debug)]
pub enum VideoDecoderError {
    /// Failed to open the video file
    #[error("Failed to open video file: {0}")]
    OpenFailed(String),
    /// No video stream found in the file
    #[error("No video stream found in file")]
    NoVideoStream,
    #[error("Failed to create decoder: {0}")]
    DecoderCreationFailed(String),
    #[error("Failed to create scaler: {0}")]
    ScalerCreationFailed(String),
    #[error("Decoding failed: {0}")]
    DecodeFailed(String),
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

/// Stream metadata gathered when the file is opened
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Natural (unrotated) frame size
    pub size: FrameSize,
    pub frame_rate: f64,
    /// Zero when the container does not declare one
    pub duration: MediaTime,
    pub codec_name: String,
    /// Display matrix from the container
    pub transform: AffineTransform,
}

/// Video decoder that reads NV12 frames from a video file
pub struct VideoDecoder {
    /// The input format context
    input: ffmpeg_next::format::context::Input,
    /// Index of the video stream
    video_stream_index: usize,
    /// Video decoder
    decoder: ffmpeg_next::decoder::Video,
    /// Converter to NV12, created lazily for non-NV12 codec output
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    /// Stream time base for timestamp conversion
    time_base: ffmpeg_next::Rational,
    info: MediaInfo,
    /// Frames before this time are dropped (exact seek)
    discard_before: Option<MediaTime>,
    next_sequence: u64,
    /// Whether we've reached end of file
    eof: bool,
}

impl VideoDecoder {
    /// Open a video file for decoding
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VideoDecoderError> {
        // Initialize FFmpeg (safe to call multiple times)
        ffmpeg_next::init()?;

        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let input = ffmpeg_next::format::input(&path)
            .map_err(|_| VideoDecoderError::OpenFailed(path_str.clone()))?;

        let video_stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(VideoDecoderError::NoVideoStream)?;

        let video_stream_index = video_stream.index();
        let time_base = video_stream.time_base();

        let frame_rate = video_stream.avg_frame_rate();
        let frame_rate_f64 = if frame_rate.denominator() > 0 && frame_rate.numerator() > 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            30.0 // Default fallback
        };

        let duration = if video_stream.duration() > 0 {
            stream_time(video_stream.duration(), time_base)
        } else if input.duration() > 0 {
            MediaTime::new(input.duration(), ffmpeg_next::ffi::AV_TIME_BASE)
        } else {
            MediaTime::ZERO
        };

        let transform = read_display_transform(&video_stream);

        let context = ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = context.decoder().video().map_err(|e| {
            VideoDecoderError::DecoderCreationFailed(format!("Failed to create video decoder: {}", e))
        })?;

        let codec_name = decoder
            .codec()
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let size = FrameSize::new(decoder.width(), decoder.height());

        tracing::info!(
            "Opened video: {} @ {:.2}fps, duration: {:.2}s, codec: {}, source format: {:?}",
            size,
            frame_rate_f64,
            duration.as_seconds(),
            codec_name,
            decoder.format()
        );

        Ok(Self {
            input,
            video_stream_index,
            decoder,
            scaler: None,
            time_base,
            info: MediaInfo {
                size,
                frame_rate: frame_rate_f64,
                duration,
                codec_name,
                transform,
            },
            discard_before: None,
            next_sequence: 0,
            eof: false,
        })
    }

    /// Decode the next displayable frame, returning None at end of file
    pub fn decode_next_frame(&mut self) -> Result<Option<PixelFrame>, VideoDecoderError> {
        let mut decoded_frame = ffmpeg_next::frame::Video::empty();

        loop {
            // First, try to receive any pending frames from the decoder
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => {
                    let pts = decoded_frame.timestamp().or(decoded_frame.pts()).unwrap_or(0);
                    let timestamp = stream_time(pts, self.time_base);

                    if let Some(target) = self.discard_before {
                        if timestamp < target {
                            continue;
                        }
                        self.discard_before = None;
                    }

                    return self.to_pixel_frame(&decoded_frame, timestamp).map(Some);
                }
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                }) => {
                    // Need more input - read next packet
                }
                Err(ffmpeg_next::Error::Eof) => {
                    self.eof = true;
                    return Ok(None);
                }
                Err(e) => {
                    return Err(VideoDecoderError::DecodeFailed(e.to_string()));
                }
            }

            if self.eof {
                return Ok(None);
            }

            // Read next packet and send to decoder
            loop {
                match self.input.packets().next() {
                    Some((stream, packet)) => {
                        if stream.index() == self.video_stream_index {
                            self.decoder.send_packet(&packet)?;
                            break;
                        }
                    }
                    None => {
                        self.decoder.send_eof()?;
                        self.eof = true;
                        break;
                    }
                }
            }
        }
    }

    /// Convert (if needed) and pack a decoded frame into tightly strided NV12
    fn to_pixel_frame(
        &mut self,
        decoded: &ffmpeg_next::frame::Video,
        timestamp: MediaTime,
    ) -> Result<PixelFrame, VideoDecoderError> {
        let size = self.info.size;
        let converted;
        let nv12 = if decoded.format() == ffmpeg_next::format::Pixel::NV12 {
            decoded
        } else {
            // Recreate scaler if the source format changed
            let stale = self
                .scaler
                .as_ref()
                .map_or(true, |s| s.input().format != decoded.format());
            if stale {
                self.scaler = Some(
                    ffmpeg_next::software::scaling::Context::get(
                        decoded.format(),
                        size.width,
                        size.height,
                        ffmpeg_next::format::Pixel::NV12,
                        size.width,
                        size.height,
                        ffmpeg_next::software::scaling::Flags::BILINEAR,
                    )
                    .map_err(|e| VideoDecoderError::ScalerCreationFailed(e.to_string()))?,
                );
            }
            let mut out = ffmpeg_next::frame::Video::empty();
            if let Some(scaler) = self.scaler.as_mut() {
                scaler.run(decoded, &mut out)?;
            }
            converted = out;
            &converted
        };

        let chroma = size.chroma_420();
        let luma_row = size.width as usize;
        let chroma_row = chroma.width as usize * 2;
        let mut packed = Vec::with_capacity(size.pixel_count() + chroma.pixel_count() * 2);
        pack_rows(&mut packed, nv12.data(0), nv12.stride(0), luma_row, size.height as usize)?;
        pack_rows(&mut packed, nv12.data(1), nv12.stride(1), chroma_row, chroma.height as usize)?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        PixelFrame::from_nv12(size, packed, timestamp, sequence)
            .map_err(|e| VideoDecoderError::DecodeFailed(e.to_string()))
    }

    /// Seek to `time`, flushing decoder state
    ///
    /// With [`SeekTolerance::Exact`] the frames between the preceding keyframe
    /// and the target are decoded and dropped.
    pub fn seek(&mut self, time: MediaTime, tolerance: SeekTolerance) -> Result<(), VideoDecoderError> {
        // FFmpeg's input.seek() uses AV_TIME_BASE (microseconds)
        let timestamp_us = time.rescale(MICROS_TIMESCALE).value.max(0);
        self.input.seek(timestamp_us, ..timestamp_us)?;
        self.decoder.flush();
        self.eof = false;
        self.discard_before = match tolerance {
            SeekTolerance::Exact => Some(time),
            SeekTolerance::Keyframe => None,
        };
        Ok(())
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Check if we've reached end of file
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

fn stream_time(pts: i64, time_base: ffmpeg_next::Rational) -> MediaTime {
    MediaTime::new(pts.saturating_mul(time_base.numerator() as i64), time_base.denominator())
}

/// Append `rows` rows of `row_bytes` from a strided plane
fn pack_rows(
    out: &mut Vec<u8>,
    data: &[u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), VideoDecoderError> {
    if rows == 0 {
        return Ok(());
    }
    if stride < row_bytes || data.len() < stride * (rows - 1) + row_bytes {
        return Err(VideoDecoderError::DecodeFailed(format!(
            "plane of {} bytes too small for {} rows of {}",
            data.len(),
            rows,
            row_bytes
        )));
    }
    if stride == row_bytes {
        out.extend_from_slice(&data[..row_bytes * rows]);
    } else {
        for y in 0..rows {
            let row_start = y * stride;
            out.extend_from_slice(&data[row_start..row_start + row_bytes]);
        }
    }
    Ok(())
}

fn read_display_transform(stream: &ffmpeg_next::format::stream::Stream) -> AffineTransform {
    for side_data in stream.side_data() {
        if side_data.kind() == ffmpeg_next::packet::side_data::Type::DisplayMatrix {
            if let Some(transform) = parse_display_matrix(side_data.data()) {
                return transform;
            }
        }
    }

    // Older muxers only tag the clockwise rotation
    stream
        .metadata()
        .get("rotate")
        .and_then(|v| v.parse::<f64>().ok())
        .map(AffineTransform::rotation)
        .unwrap_or(AffineTransform::IDENTITY)
}

/// Parse a 3x3 display matrix (16.16 fixed point, row major `a b u / c d v / x y w`)
pub fn parse_display_matrix(bytes: &[u8]) -> Option<AffineTransform> {
    if bytes.len() < 36 {
        return None;
    }
    let mut m = [0i32; 9];
    for (i, chunk) in bytes.chunks_exact(4).take(9).enumerate() {
        m[i] = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    let fixed = |v: i32| v as f64 / 65536.0;
    Some(AffineTransform {
        a: fixed(m[0]),
        b: fixed(m[1]),
        c: fixed(m[3]),
        d: fixed(m[4]),
        tx: fixed(m[6]),
        ty: fixed(m[7]),
    })
}
