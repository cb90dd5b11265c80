//! trackfit Core - Kalman track fitting through a layered detector geometry
//!
//! The library is organised leaves first:
//! 1. **Identifiers**: packed 64-bit geometry IDs and measurement source links
//! 2. **Geometry**: closed surface variant, volume bounds with boundary
//!    surfaces, and an arena of volumes, layers and surfaces
//! 3. **Event data**: bound parameters, measurements and track states
//! 4. **Fitting**: the propagation seams, the gain matrix updator and the
//!    [`KalmanActor`] that drives the forward filter step by step
//!
//! The propagation engine itself (field integration, navigation) is not part
//! of this crate; it plugs in through [`Stepper`] and [`PropagatorState`].

pub mod geometry;
pub mod identifier;
pub mod kalman;
pub mod propagator;
pub mod surface;
pub mod track_state;
pub mod updator;
pub mod volume;

// Re-export key types for convenience
pub use geometry::{GeometryBuilder, GeometryError, LayerId, SurfaceId, TrackingGeometry, VolumeId};
pub use identifier::{GeometryId, Identifier};
pub use kalman::{ActorStatus, FitError, FitResult, KalmanActor, MeasurementSurfaces};
pub use propagator::{Actor, NavigationState, PropagatorState, Stepper};
pub use surface::{Intersection, Surface, SurfaceKind, SurfaceType};
pub use track_state::{BoundParameters, Measurement, TrackState};
pub use updator::{Calibrator, GainMatrixUpdator, Updator, VoidCalibrator, VoidUpdator};
pub use volume::{BoundarySurface, TrackingVolume, VolumeBounds};
