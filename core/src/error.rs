use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o failure")]
    Io(#[from] io::Error),

    #[error("unable to grow file-backed storage")]
    Allocation(#[source] io::Error),

    #[error("write overlaps more than {} live ranges", crate::domain::MAX_AFFECTED)]
    TooManyOverlaps,

    #[error("path must contain a {{}} placeholder")]
    MissingPlaceholder,
}
