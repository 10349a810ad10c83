// libav adapter - FFmpeg codec backend via ffmpeg-next
//
// Demuxing reads packets of one selected stream, decoders and encoders are
// driven through the send/receive API with EAGAIN mapped to "busy" and
// "try again later", and the muxer writes an MP4 with global headers. All
// timestamps cross the port boundary in microseconds.

use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::media;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::mathematics::rescale::TIME_BASE;
use ffmpeg::Rational;
use std::path::Path;
use tracing::debug;

use crate::domain::model::{AudioEncoderSettings, TrackInfo, VideoEncoderSettings};
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::CodecBackend;

mod codec_io;
mod demux;
mod mux;

pub use codec_io::{LibavDecoder, LibavEncoder, LibavSurface};
pub use demux::LibavDemuxer;
pub use mux::LibavMuxer;

/// Microsecond time base used across the port boundary
pub(crate) const MICROS: Rational = TIME_BASE;

/// FFmpeg-backed codec backend
#[derive(Debug, Clone)]
pub struct LibavBackend {
    decoder_threads: usize,
}

impl LibavBackend {
    /// Initialize FFmpeg and quiet its own logging to errors only
    pub fn new(decoder_threads: usize) -> CompressResult<Self> {
        ffmpeg::init()?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        debug!(decoder_threads, "libav backend ready");
        Ok(Self {
            decoder_threads: decoder_threads.max(1),
        })
    }

    /// Track listing without opening any codec
    pub fn probe(&self, source: &Path) -> CompressResult<Vec<TrackInfo>> {
        use crate::ports::Demuxer;

        let demuxer = LibavDemuxer::open(source)?;
        (0..demuxer.track_count()?)
            .map(|index| demuxer.track_info(index))
            .collect()
    }
}

impl CodecBackend for LibavBackend {
    type Params = codec::Parameters;
    type Demuxer = LibavDemuxer;
    type Surface = LibavSurface;
    type Decoder = LibavDecoder;
    type Encoder = LibavEncoder;
    type Muxer = LibavMuxer;

    fn open_demuxer(&self, source: &Path) -> CompressResult<LibavDemuxer> {
        LibavDemuxer::open(source)
    }

    fn create_video_encoder(&self, settings: &VideoEncoderSettings) -> CompressResult<LibavEncoder> {
        LibavEncoder::video(settings)
    }

    fn create_audio_encoder(&self, settings: &AudioEncoderSettings) -> CompressResult<LibavEncoder> {
        LibavEncoder::audio(settings)
    }

    fn create_decoder(
        &self,
        demuxer: &LibavDemuxer,
        track: usize,
        surface: Option<&LibavSurface>,
    ) -> CompressResult<LibavDecoder> {
        LibavDecoder::open(demuxer, track, surface, self.decoder_threads)
    }

    fn create_muxer(&self, destination: &Path) -> CompressResult<LibavMuxer> {
        LibavMuxer::create(destination)
    }
}

/// Whether an FFmpeg error only means "not now"
pub(crate) fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == EAGAIN)
}

/// Mime style identifier for a stream, in the `video/...` / `audio/...` form
pub(crate) fn mime_for(medium: media::Type, id: codec::Id) -> String {
    let known = match (medium, id) {
        (media::Type::Video, codec::Id::H264) => Some("video/avc"),
        (media::Type::Video, codec::Id::HEVC) => Some("video/hevc"),
        (media::Type::Video, codec::Id::MPEG4) => Some("video/mp4v-es"),
        (media::Type::Video, codec::Id::VP8) => Some("video/x-vnd.on2.vp8"),
        (media::Type::Video, codec::Id::VP9) => Some("video/x-vnd.on2.vp9"),
        (media::Type::Video, codec::Id::AV1) => Some("video/av01"),
        (media::Type::Audio, codec::Id::AAC) => Some("audio/mp4a-latm"),
        (media::Type::Audio, codec::Id::MP3) => Some("audio/mpeg"),
        (media::Type::Audio, codec::Id::OPUS) => Some("audio/opus"),
        (media::Type::Audio, codec::Id::VORBIS) => Some("audio/vorbis"),
        (media::Type::Audio, codec::Id::FLAC) => Some("audio/flac"),
        _ => None,
    };
    if let Some(mime) = known {
        return mime.to_string();
    }
    let family = match medium {
        media::Type::Video => "video",
        media::Type::Audio => "audio",
        media::Type::Subtitle => "text",
        _ => "application",
    };
    format!("{family}/{}", id.name())
}

pub(crate) fn ffmpeg_err(stage: Stage) -> impl Fn(ffmpeg::Error) -> CompressError {
    move |e| CompressError::codec(stage, e)
}

pub(crate) fn configure_err(stage: Stage) -> impl Fn(ffmpeg::Error) -> CompressError {
    move |e| CompressError::configure(stage, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_mapping() {
        assert_eq!(mime_for(media::Type::Video, codec::Id::H264), "video/avc");
        assert_eq!(mime_for(media::Type::Audio, codec::Id::AAC), "audio/mp4a-latm");
        assert!(mime_for(media::Type::Audio, codec::Id::PCM_S16LE).starts_with("audio/"));
        assert!(mime_for(media::Type::Subtitle, codec::Id::SUBRIP).starts_with("text/"));
    }

    #[test]
    fn test_eagain_is_not_fatal() {
        assert!(is_again(&ffmpeg::Error::Other { errno: EAGAIN }));
        assert!(!is_again(&ffmpeg::Error::Eof));
    }
}
