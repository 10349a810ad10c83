// Packet reader for one selected stream

use ffmpeg_next as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::{media, Packet, Rational, Rescale};
use std::path::{Path, PathBuf};

use super::{mime_for, MICROS};
use crate::domain::model::{Sample, SampleFlags, TrackInfo};
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::{Demuxer, NativeResource};

pub struct LibavDemuxer {
    path: PathBuf,
    input: Option<Input>,
    stage: Stage,
    selected: Option<(usize, Rational)>,
}

impl LibavDemuxer {
    pub fn open(path: &Path) -> CompressResult<Self> {
        let input = ffmpeg::format::input(&path).map_err(|e| CompressError::SourceUnreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            input: Some(input),
            stage: Stage::VideoDemuxer,
            selected: None,
        })
    }

    pub(crate) fn input(&self) -> CompressResult<&Input> {
        self.input.as_ref().ok_or_else(|| CompressError::ResourceReleased {
            resource: format!("demuxer for {}", self.path.display()),
        })
    }

    fn input_mut(&mut self) -> CompressResult<&mut Input> {
        let path = &self.path;
        self.input.as_mut().ok_or_else(|| CompressError::ResourceReleased {
            resource: format!("demuxer for {}", path.display()),
        })
    }
}

impl NativeResource for LibavDemuxer {
    fn release(&mut self) -> CompressResult<()> {
        self.input = None;
        Ok(())
    }
}

impl Demuxer for LibavDemuxer {
    fn track_count(&self) -> CompressResult<usize> {
        Ok(self.input()?.nb_streams() as usize)
    }

    fn track_info(&self, index: usize) -> CompressResult<TrackInfo> {
        let input = self.input()?;
        let stream = input
            .stream(index)
            .ok_or_else(|| CompressError::codec(self.stage, format!("no stream {index}")))?;
        let params = stream.parameters();
        let medium = params.medium();

        let duration_us = if stream.duration() > 0 {
            Some(stream.duration().rescale(stream.time_base(), MICROS))
        } else if input.duration() > 0 {
            Some(input.duration())
        } else {
            None
        };

        // SAFETY: codecpar stays valid while `input` is borrowed; plain field reads.
        let (width, height, sample_rate, channels) = unsafe {
            let raw = &*params.as_ptr();
            (raw.width, raw.height, raw.sample_rate, raw.ch_layout.nb_channels)
        };
        let (width, height) = match medium {
            media::Type::Video if width > 0 && height > 0 => (Some(width as u32), Some(height as u32)),
            _ => (None, None),
        };
        let (sample_rate, channels) = match medium {
            media::Type::Audio => (
                (sample_rate > 0).then_some(sample_rate as u32),
                (channels > 0).then_some(channels as u16),
            ),
            _ => (None, None),
        };

        Ok(TrackInfo {
            index,
            mime: mime_for(medium, params.id()),
            duration_us,
            sample_rate,
            channels,
            width,
            height,
        })
    }

    fn select_track(&mut self, index: usize) -> CompressResult<()> {
        let info = self.track_info(index)?;
        if let Some(kind) = info.kind() {
            self.stage = Stage::demuxer(kind);
        }
        let time_base = self
            .input()?
            .stream(index)
            .map(|s| s.time_base())
            .ok_or_else(|| CompressError::codec(self.stage, format!("no stream {index}")))?;
        self.selected = Some((index, time_base));
        Ok(())
    }

    fn read_sample(&mut self) -> CompressResult<Option<Sample>> {
        let stage = self.stage;
        let (selected, time_base) = self
            .selected
            .ok_or_else(|| CompressError::codec(stage, "no track selected"))?;
        let input = self.input_mut()?;

        loop {
            let mut packet = Packet::empty();
            match packet.read(input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(CompressError::codec(stage, e)),
            }
            if packet.stream() != selected {
                continue;
            }

            let pts = packet.pts().or(packet.dts()).unwrap_or(0);
            let sample = Sample {
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                pts_us: pts.rescale(time_base, MICROS),
                dts_us: packet.dts().map(|dts| dts.rescale(time_base, MICROS)),
                flags: if packet.is_key() {
                    SampleFlags::KEY_FRAME
                } else {
                    SampleFlags::default()
                },
            };
            return Ok(Some(sample));
        }
    }
}
