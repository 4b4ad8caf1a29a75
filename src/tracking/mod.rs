//! Person tracking: raw detector output and the fused subject store
//!
//! Detections are associated to tracks by nearest center. A track
//! becomes a subject once confirmed over several frames. Ids are never
//! reused, and a track that goes unmatched for longer than the grace
//! period is evicted.

mod detection;
mod repository;

pub use detection::{BoundingBox, FaceIdentity, Point, RawDetection};
pub use repository::{
    SubjectId, SubjectRepository, TrackState, TrackedSubject, TrackingStats, UpsertReport,
};
