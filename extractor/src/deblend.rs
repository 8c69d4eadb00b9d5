//! Interface to an external deblender.
//!
//! The extractor only decides *when* to deblend and what to do with the
//! result; splitting one detection into several sources is left to an
//! implementation of [`Deblender`].

use crate::finalize::bitmap::ObjectBitmap;
use crate::object::Detection;
use crate::scanner::ClosedObject;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeblendError {
    #[error("Deblending produced more than {limit} sub-objects")]
    TooManyObjects { limit: usize },

    #[error("Deblending failed: {0}")]
    Failed(String),
}

/// Splits a closed object into sub-objects.
pub trait Deblender {
    /// Return the sub-objects of `object`.
    ///
    /// `bitmap` covers the object's bounding box. An empty result keeps the
    /// object whole; an error keeps it whole and flags it
    /// [`DEBLEND_OVERFLOW`](crate::object::ObjectFlags::DEBLEND_OVERFLOW).
    fn parcel_out(
        &mut self,
        object: &ClosedObject<'_>,
        bitmap: &ObjectBitmap<'_>,
    ) -> Result<Vec<Detection>, DeblendError>;
}
