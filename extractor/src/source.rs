//! Row-at-a-time pixel sources.
//!
//! The extractor never needs a whole image in memory: a [`PixelSource`]
//! hands out one row per call and can be rewound once so the background
//! model and the detection pass can each read the image front to back.

use crate::background::Background;
use crate::error::{ExtractionError, Result};
use ndarray::Array2;
use shared::ImageSize;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Sequential supplier of image rows.
pub trait PixelSource {
    /// Image dimensions; every row has `size().width` samples.
    fn size(&self) -> ImageSize;

    /// Fill `row` with the next image row.
    ///
    /// Returns [`ExtractionError::ShortRead`] when fewer samples than the
    /// row width are available.
    fn next_row(&mut self, row: &mut [f32]) -> Result<()>;

    /// Restart at the first row.
    fn rewind(&mut self) -> Result<()>;
}

/// Source backed by an in-memory array of shape (height, width).
#[derive(Debug, Clone)]
pub struct ArraySource {
    data: Array2<f32>,
    next: usize,
}

impl ArraySource {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data, next: 0 }
    }

    /// Convert a double-precision image, e.g. a synthetic field.
    pub fn from_f64(data: &Array2<f64>) -> Self {
        Self::new(data.mapv(|v| v as f32))
    }
}

impl PixelSource for ArraySource {
    fn size(&self) -> ImageSize {
        ImageSize::of_array(&self.data)
    }

    fn next_row(&mut self, row: &mut [f32]) -> Result<()> {
        let width = self.data.ncols();
        if self.next >= self.data.nrows() {
            return Err(ExtractionError::ShortRead {
                row: self.next,
                expected: width,
                got: 0,
            });
        }
        for (dst, src) in row.iter_mut().zip(self.data.row(self.next).iter()) {
            *dst = *src;
        }
        self.next += 1;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        Ok(())
    }
}

/// Headerless little-endian `f32` raster, one row after another.
pub struct RawFileSource<R> {
    reader: R,
    size: ImageSize,
    next: usize,
    bytes: Vec<u8>,
}

impl RawFileSource<BufReader<File>> {
    /// Open a raw file whose dimensions are known out of band.
    pub fn open<P: AsRef<Path>>(path: P, size: ImageSize) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), size))
    }
}

impl<R: Read + Seek> RawFileSource<R> {
    pub fn new(reader: R, size: ImageSize) -> Self {
        Self {
            reader,
            size,
            next: 0,
            bytes: vec![0; size.width * 4],
        }
    }

    fn fill(&mut self) -> Result<usize> {
        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> PixelSource for RawFileSource<R> {
    fn size(&self) -> ImageSize {
        self.size
    }

    fn next_row(&mut self, row: &mut [f32]) -> Result<()> {
        let filled = self.fill()?;
        if filled < self.bytes.len() || self.next >= self.size.height {
            return Err(ExtractionError::ShortRead {
                row: self.next,
                expected: self.size.width,
                got: filled / 4,
            });
        }
        for (dst, chunk) in row.iter_mut().zip(self.bytes.chunks_exact(4)) {
            *dst = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.next += 1;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.next = 0;
        Ok(())
    }
}

/// Write an array as a headerless little-endian `f32` raster.
pub fn write_raw_f32<P: AsRef<Path>>(path: P, data: &Array2<f32>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for v in data.iter() {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Adapter subtracting the interpolated background from every row.
pub struct BackgroundSubtracted<'a, S> {
    source: S,
    background: &'a Background,
    next: usize,
    back: Vec<f32>,
}

impl<'a, S: PixelSource> BackgroundSubtracted<'a, S> {
    pub fn new(source: S, background: &'a Background) -> Result<Self> {
        let size = source.size();
        if size != background.size() {
            return Err(ExtractionError::SizeMismatch {
                expected: background.size(),
                got: size,
            });
        }
        Ok(Self {
            source,
            background,
            next: 0,
            back: vec![0.0; size.width],
        })
    }
}

impl<S: PixelSource> PixelSource for BackgroundSubtracted<'_, S> {
    fn size(&self) -> ImageSize {
        self.source.size()
    }

    fn next_row(&mut self, row: &mut [f32]) -> Result<()> {
        self.source.next_row(row)?;
        self.background.back_row(self.next, &mut self.back);
        for (v, b) in row.iter_mut().zip(self.back.iter()) {
            *v -= *b;
        }
        self.next += 1;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        self.source.rewind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_array_source_rows_and_rewind() {
        let mut source = ArraySource::new(array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(source.size(), ImageSize::from_width_height(2, 2));

        let mut row = [0.0f32; 2];
        source.next_row(&mut row).unwrap();
        assert_eq!(row, [1.0, 2.0]);
        source.next_row(&mut row).unwrap();
        assert_eq!(row, [3.0, 4.0]);
        assert!(matches!(
            source.next_row(&mut row),
            Err(ExtractionError::ShortRead { row: 2, .. })
        ));

        source.rewind().unwrap();
        source.next_row(&mut row).unwrap();
        assert_eq!(row, [1.0, 2.0]);
    }

    #[test]
    fn test_raw_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.raw");
        let data = array![[0.5f32, -1.0, 2.0], [4.0, 8.0, 16.0]];
        write_raw_f32(&path, &data).unwrap();

        let mut source = RawFileSource::open(&path, ImageSize::from_width_height(3, 2)).unwrap();
        let mut row = [0.0f32; 3];
        source.next_row(&mut row).unwrap();
        assert_eq!(row, [0.5, -1.0, 2.0]);
        source.next_row(&mut row).unwrap();
        assert_eq!(row, [4.0, 8.0, 16.0]);
    }

    #[test]
    fn test_raw_short_read_reports_partial_row() {
        let mut bytes = Vec::new();
        for v in [1.0f32, 2.0, 3.0, 4.0, 5.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut source = RawFileSource::new(Cursor::new(bytes), ImageSize::from_width_height(3, 2));
        let mut row = [0.0f32; 3];
        source.next_row(&mut row).unwrap();

        let err = source.next_row(&mut row).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::ShortRead {
                row: 1,
                expected: 3,
                got: 2
            }
        ));
    }
}
