//! Track selection by media type

use crate::domain::model::MediaKind;
use crate::error::CompressResult;
use crate::ports::Demuxer;

/// Index of the first track of `kind`, or `None` when the source has none.
/// Demuxer query failures propagate unchanged.
pub fn select_track<D: Demuxer + ?Sized>(demuxer: &D, kind: MediaKind) -> CompressResult<Option<usize>> {
    for index in 0..demuxer.track_count()? {
        if demuxer.track_info(index)?.is(kind) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Sample, TrackInfo};
    use crate::error::{CompressError, Stage};
    use crate::ports::NativeResource;

    struct Listing(Vec<&'static str>, bool);

    impl NativeResource for Listing {
        fn release(&mut self) -> CompressResult<()> {
            Ok(())
        }
    }

    impl Demuxer for Listing {
        fn track_count(&self) -> CompressResult<usize> {
            if self.1 {
                return Err(CompressError::codec(Stage::VideoDemuxer, "unreadable"));
            }
            Ok(self.0.len())
        }

        fn track_info(&self, index: usize) -> CompressResult<TrackInfo> {
            Ok(TrackInfo {
                index,
                mime: self.0[index].to_string(),
                duration_us: None,
                sample_rate: None,
                channels: None,
                width: None,
                height: None,
            })
        }

        fn select_track(&mut self, _index: usize) -> CompressResult<()> {
            Ok(())
        }

        fn read_sample(&mut self) -> CompressResult<Option<Sample>> {
            Ok(None)
        }
    }

    #[test]
    fn test_first_matching_track_wins() {
        let demuxer = Listing(vec!["text/vtt", "audio/mp4a-latm", "video/avc", "video/hevc"], false);
        assert_eq!(select_track(&demuxer, MediaKind::Video).unwrap(), Some(2));
        assert_eq!(select_track(&demuxer, MediaKind::Audio).unwrap(), Some(1));
    }

    #[test]
    fn test_missing_kind_is_none() {
        let demuxer = Listing(vec!["video/avc"], false);
        assert_eq!(select_track(&demuxer, MediaKind::Audio).unwrap(), None);
    }

    #[test]
    fn test_query_failure_propagates() {
        let demuxer = Listing(vec![], true);
        assert!(select_track(&demuxer, MediaKind::Video).is_err());
    }
}
