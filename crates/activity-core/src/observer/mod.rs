pub mod application;
pub mod player;
pub mod video;

pub use application::{ApplicationObserver, NavigationEvent};
pub use player::{PlayerEvent, PlayerObserver};
pub use video::{VideoElementObserver, VideoEvent};
