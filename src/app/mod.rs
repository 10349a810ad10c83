// Application layer - Use case interactors

pub mod compress_interactor;
pub mod container;
pub mod inspect_interactor;
pub mod observer;

// Re-export interactors
pub use compress_interactor::{run_job, CompressInteractor, Compressor, JobHandle};
pub use container::AppContainer;
pub use inspect_interactor::{InspectInteractor, InspectReport};
pub use observer::{ChannelObserver, JobEvent, LogObserver};
