use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid buffer geometry: {0}")]
    Geometry(#[from] crate::geometry::GeometryError),
}
