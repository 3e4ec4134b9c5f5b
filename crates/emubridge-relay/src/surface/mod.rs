//! Child display surface.
//!
//! The controlling context owns at most one child surface. It is opened (or
//! reused) per launch, receives a placeholder and a bootstrap, and is mounted
//! with the session's display and input endpoints once the bootstrap is
//! ready. Surfaces talk back through a [`SurfaceLink`].

mod controller;
mod headless;
mod types;

pub use controller::{ChildSurfaceController, OpenedSurface};
pub use headless::{HeadlessSurface, HeadlessSurfaceHost};
pub use types::{
    MountState, Surface, SurfaceEnvelope, SurfaceError, SurfaceHost, SurfaceId, SurfaceLink,
    SurfaceMessage, SurfaceOptions, SurfaceState,
};
