//! Remote control input: pointer mapping and throttling on the viewing
//! side, injection on the sharing side.

pub mod injector;
pub mod mapper;
pub mod throttle;

pub use injector::{InputInjector, RecordingInjector, UnavailableInjector};
pub use mapper::{DisplayedRect, PointerSample, RemotePoint, letterbox, map_pointer};
pub use throttle::{DEFAULT_MOVE_INTERVAL, MoveThrottle};
