// MP4 writer

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, encoder};
use ffmpeg::format::context::Output;
use ffmpeg::{Packet, Rational};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{configure_err, ffmpeg_err, MICROS};
use crate::domain::model::{NegotiatedFormat, Sample};
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::{Muxer, NativeResource};

pub struct LibavMuxer {
    path: PathBuf,
    output: Option<Output>,
    time_bases: Vec<Rational>,
    header_written: bool,
}

impl LibavMuxer {
    pub fn create(path: &Path) -> CompressResult<Self> {
        let output = ffmpeg::format::output(&path).map_err(configure_err(Stage::Muxer))?;
        debug!(path = %path.display(), "muxer created");
        Ok(Self {
            path: path.to_path_buf(),
            output: Some(output),
            time_bases: Vec::new(),
            header_written: false,
        })
    }

    fn output_mut(&mut self) -> CompressResult<&mut Output> {
        let path = &self.path;
        self.output.as_mut().ok_or_else(|| CompressError::ResourceReleased {
            resource: format!("muxer for {}", path.display()),
        })
    }
}

impl NativeResource for LibavMuxer {
    fn stop(&mut self) -> CompressResult<()> {
        if !self.header_written {
            return Ok(());
        }
        self.output_mut()?
            .write_trailer()
            .map_err(ffmpeg_err(Stage::Muxer))?;
        self.header_written = false;
        debug!(path = %self.path.display(), "muxer trailer written");
        Ok(())
    }

    fn release(&mut self) -> CompressResult<()> {
        self.output = None;
        Ok(())
    }
}

impl Muxer for LibavMuxer {
    type Params = codec::Parameters;

    fn add_track(&mut self, format: &NegotiatedFormat<codec::Parameters>) -> CompressResult<usize> {
        let output = self.output_mut()?;
        let mut stream = output
            .add_stream(encoder::find(format.params.id()))
            .map_err(configure_err(Stage::Muxer))?;
        stream.set_parameters(format.params.clone());
        stream.set_time_base(MICROS);
        let index = stream.index();
        debug!(index, kind = %format.kind(), codec = %format.summary.codec, "muxer track added");
        Ok(index)
    }

    fn start(&mut self) -> CompressResult<()> {
        let output = self.output_mut()?;
        output.write_header().map_err(ffmpeg_err(Stage::Muxer))?;
        // The container may pick its own stream time bases while writing the header
        let time_bases = output.streams().map(|stream| stream.time_base()).collect();
        self.time_bases = time_bases;
        self.header_written = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &Sample) -> CompressResult<()> {
        let time_base = *self
            .time_bases
            .get(track)
            .ok_or_else(|| CompressError::codec(Stage::Muxer, format!("unknown track {track}")))?;

        let mut packet = Packet::copy(&sample.data);
        packet.set_pts(Some(sample.pts_us));
        packet.set_dts(Some(sample.dts_us.unwrap_or(sample.pts_us)));
        if sample.flags.key_frame {
            packet.set_flags(codec::packet::Flags::KEY);
        }
        packet.set_stream(track);
        packet.rescale_ts(MICROS, time_base);

        let output = self.output_mut()?;
        packet
            .write_interleaved(output)
            .map_err(ffmpeg_err(Stage::Muxer))
    }
}
