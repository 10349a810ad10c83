//! Exactly-once stop/release of native resources

use tracing::{debug, warn};

use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::NativeResource;

/// Owns one native resource from creation until it is closed.
///
/// `close` stops the resource if it was started, then releases it. It runs at
/// most once; dropping an unclosed guard closes it and logs any failure
/// instead of propagating it.
pub struct Guarded<R: NativeResource> {
    stage: Stage,
    resource: Option<R>,
    started: bool,
}

impl<R: NativeResource> Guarded<R> {
    pub fn new(stage: Stage, resource: R) -> Self {
        debug!(%stage, "resource created");
        Self {
            stage,
            resource: Some(resource),
            started: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.resource.is_none()
    }

    pub fn get(&self) -> CompressResult<&R> {
        self.resource
            .as_ref()
            .ok_or_else(|| CompressError::ResourceReleased {
                resource: self.stage.to_string(),
            })
    }

    pub fn get_mut(&mut self) -> CompressResult<&mut R> {
        let stage = self.stage;
        self.resource
            .as_mut()
            .ok_or_else(|| CompressError::ResourceReleased {
                resource: stage.to_string(),
            })
    }

    /// Run the resource's start call and remember that it needs stopping
    pub fn start_with<F>(&mut self, start: F) -> CompressResult<()>
    where
        F: FnOnce(&mut R) -> CompressResult<()>,
    {
        start(self.get_mut()?)?;
        self.started = true;
        debug!(stage = %self.stage, "resource started");
        Ok(())
    }

    /// Stop (if started) and release. Release is attempted even when stop
    /// fails; the first failure is returned.
    pub fn close(&mut self) -> CompressResult<()> {
        let Some(mut resource) = self.resource.take() else {
            return Ok(());
        };

        let stopped = if self.started {
            self.started = false;
            resource.stop()
        } else {
            Ok(())
        };
        let released = resource.release();
        debug!(stage = %self.stage, "resource released");

        stopped.and(released)
    }
}

impl<R: NativeResource> Drop for Guarded<R> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(stage = %self.stage, error = %e, "cleanup failed");
        }
    }
}

/// Keeps the first failure of a multi-step shutdown while later steps still run
#[derive(Debug, Default)]
pub struct FirstError(Option<CompressError>);

impl FirstError {
    pub fn record(&mut self, result: CompressResult<()>) {
        if let Err(e) = result {
            if self.0.is_some() {
                warn!(error = %e, "additional cleanup failure");
            } else {
                self.0 = Some(e);
            }
        }
    }

    pub fn into_result(self) -> CompressResult<()> {
        self.0.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Counts {
        stops: u32,
        releases: u32,
    }

    struct Probe {
        counts: Arc<Mutex<Counts>>,
        fail_stop: bool,
    }

    impl NativeResource for Probe {
        fn stop(&mut self) -> CompressResult<()> {
            self.counts.lock().unwrap().stops += 1;
            if self.fail_stop {
                return Err(CompressError::codec(Stage::VideoEncoder, "stop failed"));
            }
            Ok(())
        }

        fn release(&mut self) -> CompressResult<()> {
            self.counts.lock().unwrap().releases += 1;
            Ok(())
        }
    }

    fn probe(fail_stop: bool) -> (Probe, Arc<Mutex<Counts>>) {
        let counts = Arc::new(Mutex::new(Counts::default()));
        (
            Probe {
                counts: counts.clone(),
                fail_stop,
            },
            counts,
        )
    }

    #[test]
    fn test_unstarted_resource_is_released_without_stop() {
        let (resource, counts) = probe(false);
        let mut guard = Guarded::new(Stage::VideoDecoder, resource);
        guard.close().unwrap();
        guard.close().unwrap();
        drop(guard);

        let counts = counts.lock().unwrap();
        assert_eq!(counts.stops, 0);
        assert_eq!(counts.releases, 1);
    }

    #[test]
    fn test_drop_closes_started_resource_once() {
        let (resource, counts) = probe(false);
        let mut guard = Guarded::new(Stage::Muxer, resource);
        guard.start_with(|_| Ok(())).unwrap();
        drop(guard);

        let counts = counts.lock().unwrap();
        assert_eq!(counts.stops, 1);
        assert_eq!(counts.releases, 1);
    }

    #[test]
    fn test_release_runs_even_if_stop_fails() {
        let (resource, counts) = probe(true);
        let mut guard = Guarded::new(Stage::VideoEncoder, resource);
        guard.start_with(|_| Ok(())).unwrap();
        assert!(guard.close().is_err());
        assert!(guard.is_closed());
        assert!(matches!(
            guard.get_mut(),
            Err(CompressError::ResourceReleased { .. })
        ));

        let counts = counts.lock().unwrap();
        assert_eq!(counts.releases, 1);
    }
}
